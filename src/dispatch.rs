//! Fetch-strategy dispatch: string-keyed polymorphic source handlers.
//!
//! Every handler presents the same contract - take a [`FetchConfig`], return
//! a [`FetchOutcome`] - whether it queries a database, a retrieval index, or
//! a web search. Callers never branch on handler identity. An unregistered
//! fetch type is a hard [`DispatchError::UnsupportedFetchType`] naming the
//! offending key; there is deliberately no default handler to fall back to
//! (contrast with the render-kind registry, which resolves to a sentinel).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, Message};
use crate::prompts::render_sql_prompt;
use crate::store::{infer_columns, ColumnMeta, DataStore, Row};
use crate::structured::parse_structured;
use crate::transcript::{Transcript, TranscriptEntry};

/// Hard cap on generation for a SQL statement.
const SQL_MAX_OUTPUT_TOKENS: u32 = 512;

// =============================================================================
// Types
// =============================================================================

/// Instruction for one fetch, built from the query and its resolved intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// The user's query text.
    pub query: String,
    /// Dispatch key: "sql", "rag", "web", ...
    pub fetch_type: String,
    /// Identity of the data source being queried.
    pub source_id: String,
}

/// Rows plus metadata from one fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub rows: Vec<Row>,
    pub columns: Vec<ColumnMeta>,
    /// The query text actually executed against the store (e.g. generated SQL).
    pub executed_query: Option<String>,
    pub total_rows: usize,
}

impl FetchResult {
    pub fn new(rows: Vec<Row>, executed_query: Option<String>) -> Self {
        let columns = infer_columns(&rows);
        let total_rows = rows.len();
        Self {
            rows,
            columns,
            executed_query,
            total_rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Uniform handler output: the result plus the transcript entries the
/// handler appended while producing it.
///
/// Entries are returned separately (not merged into the caller's transcript)
/// so that coalesced callers sharing one computation can each extend their
/// own fetch log with the same messages.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub result: FetchResult,
    pub messages: Vec<TranscriptEntry>,
}

/// Errors from fetch dispatch.
///
/// `Clone` because a coalesced fetch fans its failure out to every caller
/// awaiting the same in-flight computation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// The fetch key has no registered handler. Configuration bug upstream.
    #[error("unsupported fetch type: {0}")]
    UnsupportedFetchType(String),
    /// The LLM step of a handler failed (e.g. SQL generation).
    #[error("fetch generation failed: {0}")]
    Generation(String),
    /// The underlying data store failed.
    #[error("store error: {0}")]
    Store(String),
    /// The store answered with zero rows; nothing to chart, nothing cached.
    #[error("query returned no rows")]
    EmptyResult,
}

// =============================================================================
// Registry
// =============================================================================

/// A fetch-strategy handler. Polymorphic over the same capability set
/// regardless of what it queries.
#[async_trait]
pub trait SourceHandler: Send + Sync {
    async fn fetch(
        &self,
        config: &FetchConfig,
        prior: &Transcript,
    ) -> Result<FetchOutcome, DispatchError>;
}

/// Maps fetch-strategy keys to handlers.
///
/// An explicit instance constructed at startup and passed by reference -
/// never a module-level singleton - so tests get isolated registries.
#[derive(Default)]
pub struct SourceDispatchRegistry {
    handlers: HashMap<String, Arc<dyn SourceHandler>>,
}

impl SourceDispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Re-registering a key replaces the prior handler.
    pub fn register(&mut self, key: impl Into<String>, handler: Arc<dyn SourceHandler>) {
        self.handlers.insert(key.into(), handler);
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Dispatch a fetch to the handler for `config.fetch_type`.
    ///
    /// Unknown keys fail loudly, naming the key.
    pub async fn dispatch(
        &self,
        config: &FetchConfig,
        prior: &Transcript,
    ) -> Result<FetchOutcome, DispatchError> {
        let handler = self
            .handlers
            .get(&config.fetch_type)
            .ok_or_else(|| DispatchError::UnsupportedFetchType(config.fetch_type.clone()))?;
        handler.fetch(config, prior).await
    }
}

// =============================================================================
// SQL handler
// =============================================================================

/// Raw JSON structure from the SQL-generation response.
#[derive(Debug, Deserialize)]
struct SqlJson {
    sql: String,
}

/// Built-in handler for the "sql" fetch type: LLM generates SQL from the
/// query and the store's schema, the store executes it.
pub struct SqlSourceHandler {
    gateway: Arc<dyn ChatGateway>,
    model: ChatModel,
    store: Arc<dyn DataStore>,
}

impl SqlSourceHandler {
    pub fn new(gateway: Arc<dyn ChatGateway>, model: ChatModel, store: Arc<dyn DataStore>) -> Self {
        Self {
            gateway,
            model,
            store,
        }
    }
}

#[async_trait]
impl SourceHandler for SqlSourceHandler {
    async fn fetch(
        &self,
        config: &FetchConfig,
        prior: &Transcript,
    ) -> Result<FetchOutcome, DispatchError> {
        let schema = self.store.schema();
        let (system, user) = render_sql_prompt(&schema, &config.query);

        // Thread the fetch-stage transcript through; appended entries go back
        // to the caller via the outcome.
        let mut transcript = prior.clone();
        let before = transcript.len();

        if transcript.is_empty() {
            transcript.push_system(system);
        }

        let mut messages = transcript.messages();
        messages.push(Message::user(&user));

        let req = ChatRequest::new(
            self.model.clone(),
            messages,
            Attribution::new("dispatch::sql"),
        )
        .max_tokens(SQL_MAX_OUTPUT_TOKENS)
        .json();

        let resp = self
            .gateway
            .chat(req)
            .await
            .map_err(|e| DispatchError::Generation(e.to_string()))?;

        let parsed: SqlJson =
            parse_structured(&resp.content).map_err(|e| DispatchError::Generation(e.to_string()))?;
        let sql = parsed.sql.trim().to_string();
        if sql.is_empty() {
            return Err(DispatchError::Generation("empty SQL statement".into()));
        }

        let rows = self
            .store
            .execute(&sql)
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))?;
        if rows.is_empty() {
            return Err(DispatchError::EmptyResult);
        }

        transcript.push_user(user);
        transcript.push_assistant(resp.content);
        let messages = transcript.entries()[before..].to_vec();

        Ok(FetchOutcome {
            result: FetchResult::new(rows, Some(sql)),
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Stage;
    use serde_json::json;

    struct FixedHandler;

    #[async_trait]
    impl SourceHandler for FixedHandler {
        async fn fetch(
            &self,
            _config: &FetchConfig,
            _prior: &Transcript,
        ) -> Result<FetchOutcome, DispatchError> {
            let mut row = Row::new();
            row.insert("x".into(), json!(1));
            Ok(FetchOutcome {
                result: FetchResult::new(vec![row], None),
                messages: Vec::new(),
            })
        }
    }

    fn config(fetch_type: &str) -> FetchConfig {
        FetchConfig {
            query: "q".into(),
            fetch_type: fetch_type.into(),
            source_id: "ds".into(),
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_registered_handler() {
        let mut registry = SourceDispatchRegistry::new();
        registry.register("sql", Arc::new(FixedHandler));

        let outcome = registry
            .dispatch(&config("sql"), &Transcript::new(Stage::Fetch))
            .await
            .unwrap();
        assert_eq!(outcome.result.total_rows, 1);
    }

    #[tokio::test]
    async fn dispatch_unknown_key_names_the_key() {
        let registry = SourceDispatchRegistry::new();
        let err = registry
            .dispatch(&config("graphql"), &Transcript::new(Stage::Fetch))
            .await
            .unwrap_err();
        match err {
            DispatchError::UnsupportedFetchType(key) => assert_eq!(key, "graphql"),
            other => panic!("expected UnsupportedFetchType, got {other:?}"),
        }
    }

    #[test]
    fn fetch_result_infers_columns_and_counts() {
        let mut row = Row::new();
        row.insert("month".into(), json!("Jan"));
        row.insert("revenue".into(), json!(10));
        let result = FetchResult::new(vec![row], Some("SELECT 1".into()));
        assert_eq!(result.total_rows, 1);
        assert_eq!(result.columns.len(), 2);
        assert!(!result.is_empty());
    }
}
