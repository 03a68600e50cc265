//! Chart-config generation: turns a fetched result set into a [`ChartSpec`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dispatch::FetchResult;
use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, Message};
use crate::intent::Intent;
use crate::prompts::render_chart_prompt;
use crate::structured::parse_structured;
use crate::transcript::Transcript;

const CONFIG_MAX_OUTPUT_TOKENS: u32 = 256;

/// Rows included in the prompt sample. Enough for the model to see shape and
/// value ranges without shipping the whole result set.
const SAMPLE_ROWS: usize = 20;

/// Display configuration for one chart, as produced by the config stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSpec {
    /// Render-kind key: "bar", "line", "pie", ...
    pub kind: String,
    pub title: String,
    /// Column providing category labels.
    pub x_field: String,
    /// Numeric columns to plot.
    pub y_fields: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChartGenError {
    #[error("chart config generation failed: {0}")]
    Provider(#[from] crate::gateway::ProviderError),
    #[error("chart config parse failed: {0}")]
    Parse(#[from] crate::structured::ParseError),
    #[error("chart config missing fields: {0}")]
    Incomplete(String),
}

/// Generates a [`ChartSpec`] from the query, its resolved intent, and the
/// fetched rows. The config-stage transcript threads through, same as the
/// other two LLM stages.
pub struct ConfigGenerator {
    gateway: Arc<dyn ChatGateway>,
    model: ChatModel,
}

impl ConfigGenerator {
    pub fn new(gateway: Arc<dyn ChatGateway>, model: ChatModel) -> Self {
        Self { gateway, model }
    }

    pub async fn generate(
        &self,
        query: &str,
        intent: Intent,
        result: &FetchResult,
        mut transcript: Transcript,
    ) -> Result<(ChartSpec, Transcript), ChartGenError> {
        let requested_kind = intent.render_kind().unwrap_or("auto");
        let columns = result
            .columns
            .iter()
            .map(|c| format!("{} ({})", c.name, c.data_type))
            .collect::<Vec<_>>()
            .join(", ");
        let sample: Vec<_> = result.rows.iter().take(SAMPLE_ROWS).collect();
        let rows_sample = serde_json::to_string(&sample).unwrap_or_default();

        let (system, user) = render_chart_prompt(query, requested_kind, &columns, &rows_sample);
        if transcript.is_empty() {
            transcript.push_system(system);
        }
        let mut messages = transcript.messages();
        messages.push(Message::user(&user));

        let req = ChatRequest::new(
            self.model.clone(),
            messages,
            Attribution::new("chartgen::generate"),
        )
        .max_tokens(CONFIG_MAX_OUTPUT_TOKENS)
        .json();

        let resp = self.gateway.chat(req).await?;
        let spec: ChartSpec = parse_structured(&resp.content)?;
        if spec.kind.is_empty() || spec.x_field.is_empty() || spec.y_fields.is_empty() {
            return Err(ChartGenError::Incomplete(resp.content));
        }

        transcript.push_user(user);
        transcript.push_assistant(resp.content);
        Ok((spec, transcript))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_spec_round_trips_from_model_json() {
        let raw = r#"{"kind": "bar", "title": "Monthly sales", "x_field": "month", "y_fields": ["revenue", "units"]}"#;
        let spec: ChartSpec = parse_structured(raw).unwrap();
        assert_eq!(spec.kind, "bar");
        assert_eq!(spec.y_fields.len(), 2);
    }
}
