//! Intent classification: the first pipeline stage.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, Message, ProviderError};
use crate::prompts::render_intent_prompt;
use crate::structured::{parse_structured, ParseError};
use crate::transcript::Transcript;

/// Hard cap on generation for a classification.
///
/// The answer is a one-field JSON object; anything longer is the model
/// wandering off the schema.
const CLASSIFY_MAX_OUTPUT_TOKENS: u32 = 64;

/// The closed set of query intents.
///
/// `No` is a valid classification meaning "out of domain" - the orchestrator
/// halts with a user-facing message, but classification itself succeeded.
/// `Sql` means the query needs fresh data; the chart kinds are restyle
/// intents that reuse the previous fetch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    No,
    Sql,
    Bar,
    Line,
    Pie,
    Area,
    Radar,
    Funnel,
    Heatmap,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::No => "no",
            Intent::Sql => "sql",
            Intent::Bar => "bar",
            Intent::Line => "line",
            Intent::Pie => "pie",
            Intent::Area => "area",
            Intent::Radar => "radar",
            Intent::Funnel => "funnel",
            Intent::Heatmap => "heatmap",
        }
    }

    /// Parse a classifier token. Unknown tokens are rejected, not defaulted.
    pub fn parse(token: &str) -> Option<Intent> {
        match token.trim().to_lowercase().as_str() {
            "no" => Some(Intent::No),
            "sql" => Some(Intent::Sql),
            "bar" => Some(Intent::Bar),
            "line" => Some(Intent::Line),
            "pie" => Some(Intent::Pie),
            "area" => Some(Intent::Area),
            "radar" => Some(Intent::Radar),
            "funnel" => Some(Intent::Funnel),
            "heatmap" => Some(Intent::Heatmap),
            _ => None,
        }
    }

    /// Whether this intent needs a fresh fetch from the data source.
    pub fn requires_fetch(&self) -> bool {
        matches!(self, Intent::Sql)
    }

    /// The render-kind key requested by a restyle intent.
    pub fn render_kind(&self) -> Option<&'static str> {
        match self {
            Intent::No | Intent::Sql => None,
            other => Some(other.as_str()),
        }
    }
}

/// Raw JSON structure from the classifier response.
#[derive(Debug, Deserialize)]
struct IntentJson {
    intent: String,
}

/// Errors from intent classification.
///
/// Not retried automatically; the caller re-invokes the pipeline if desired.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("classifier returned unknown intent: {0}")]
    UnknownIntent(String),
}

/// Classifies a query into one of the closed [`Intent`] set via the LLM.
pub struct IntentClassifier {
    gateway: Arc<dyn ChatGateway>,
    model: ChatModel,
}

impl IntentClassifier {
    pub fn new(gateway: Arc<dyn ChatGateway>, model: ChatModel) -> Self {
        Self { gateway, model }
    }

    /// Classify `query`, threading the intent-stage transcript through.
    ///
    /// An empty transcript gets the system preamble (describing the closed
    /// intent set) injected first. The query and the raw classification are
    /// appended; history is never replaced.
    pub async fn classify(
        &self,
        query: &str,
        mut transcript: Transcript,
    ) -> Result<(Intent, Transcript), ClassifyError> {
        let (system, user) = render_intent_prompt(query);

        if transcript.is_empty() {
            transcript.push_system(system);
        }

        let mut messages = transcript.messages();
        messages.push(Message::user(&user));

        let req = ChatRequest::new(
            self.model.clone(),
            messages,
            Attribution::new("intent::classify"),
        )
        .max_tokens(CLASSIFY_MAX_OUTPUT_TOKENS)
        .json();

        let resp = self.gateway.chat(req).await?;

        let parsed: IntentJson = parse_structured(&resp.content)?;
        let intent = Intent::parse(&parsed.intent)
            .ok_or_else(|| ClassifyError::UnknownIntent(parsed.intent.clone()))?;

        transcript.push_user(user);
        transcript.push_assistant(resp.content);

        Ok((intent, transcript))
    }
}
