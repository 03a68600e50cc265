//! Pipeline orchestration: classify, fetch (or reuse), configure.
//!
//! `process` is the single entry point and never returns `Err` - every fatal
//! condition is folded into an error-shaped [`RenderConfig`] so callers
//! always have something to display. Stage progress is observable through
//! [`PipelineObserver`]: the loading snapshot is emitted synchronously before
//! the first await, the terminal snapshot (populated or error) at the end.
//!
//! State machine per run: Idle -> Classifying -> (Selecting -> Fetching) |
//! SkipFetch -> Configuring -> Done, with Error reachable from any
//! non-terminal state. Stages within a run are strictly sequential; across
//! runs, identical in-flight fetches coalesce in the cache.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::cache::{fingerprint, CacheStatus, ResultCache};
use crate::chartgen::{ChartSpec, ConfigGenerator};
use crate::dispatch::{DispatchError, FetchConfig, FetchResult, SourceDispatchRegistry};
use crate::intent::{Intent, IntentClassifier};
use crate::store::Row;
use crate::transcript::SessionTranscripts;

// =============================================================================
// Types
// =============================================================================

/// Stage-derived facts attached to a finished config.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenderMetadata {
    pub executed_query: Option<String>,
    pub resolved_intent: Option<Intent>,
    pub row_count: usize,
    pub elapsed_ms: u64,
}

/// The single output shape of a run. Exactly one of loading, error, or
/// populated holds at any observation point.
#[derive(Debug, Clone, Serialize)]
pub struct RenderConfig {
    pub id: Uuid,
    pub query: String,
    pub format: String,
    pub rows: Vec<Row>,
    pub chart: Option<ChartSpec>,
    pub is_loading: bool,
    pub is_error: bool,
    pub error_message: Option<String>,
    pub metadata: RenderMetadata,
}

impl RenderConfig {
    pub fn loading(query: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            format: format.into(),
            rows: Vec::new(),
            chart: None,
            is_loading: true,
            is_error: false,
            error_message: None,
            metadata: RenderMetadata::default(),
        }
    }

    pub fn error(
        query: impl Into<String>,
        format: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            format: format.into(),
            rows: Vec::new(),
            chart: None,
            is_loading: false,
            is_error: true,
            error_message: Some(message.into()),
            metadata: RenderMetadata::default(),
        }
    }

    pub fn populated(
        query: impl Into<String>,
        format: impl Into<String>,
        rows: Vec<Row>,
        chart: ChartSpec,
        metadata: RenderMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            format: format.into(),
            rows,
            chart: Some(chart),
            is_loading: false,
            is_error: false,
            error_message: None,
            metadata,
        }
    }

    pub fn is_populated(&self) -> bool {
        !self.is_loading && !self.is_error
    }
}

/// One user query plus the session state it runs in.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub query: String,
    pub source_id: String,
    pub fetch_type: String,
    pub format_hint: Option<String>,
    pub session_id: Option<Uuid>,
    pub transcripts: SessionTranscripts,
}

impl ProcessRequest {
    pub fn new(query: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            source_id: source_id.into(),
            fetch_type: "sql".to_string(),
            format_hint: None,
            session_id: None,
            transcripts: SessionTranscripts::new(),
        }
    }

    pub fn fetch_type(mut self, fetch_type: impl Into<String>) -> Self {
        self.fetch_type = fetch_type.into();
        self
    }

    pub fn format_hint(mut self, format: impl Into<String>) -> Self {
        self.format_hint = Some(format.into());
        self
    }

    pub fn session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn transcripts(mut self, transcripts: SessionTranscripts) -> Self {
        self.transcripts = transcripts;
        self
    }
}

/// Result of a run: the terminal config plus the three stage transcripts,
/// updated through every stage that completed.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub config: RenderConfig,
    pub transcripts: SessionTranscripts,
}

/// Why a run ended in an error config.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("intent classification failed: {0}")]
    ClassificationFailed(String),
    /// The classifier resolved `Intent::No`. Terminal, not a fault.
    #[error("query is out of domain")]
    OutOfDomain,
    #[error("unsupported fetch type: {0}")]
    UnsupportedFetchType(String),
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    #[error("chart config generation failed: {0}")]
    ConfigGenerationFailed(String),
}

impl PipelineError {
    /// The uniform text placed in the error config for users.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::ClassificationFailed(_) => {
                "Could not understand the request. Please try again.".to_string()
            }
            PipelineError::OutOfDomain => {
                "This request is outside the scope of data visualization.".to_string()
            }
            PipelineError::UnsupportedFetchType(key) => {
                format!("No data-source handler is configured for '{key}'.")
            }
            PipelineError::FetchFailed(_) => {
                "Fetching the data failed. Please try again.".to_string()
            }
            PipelineError::ConfigGenerationFailed(_) => {
                "Generating the chart configuration failed. Please try again.".to_string()
            }
        }
    }
}

// =============================================================================
// Observer
// =============================================================================

/// Receives config snapshots as a run progresses. Implementations must be
/// cheap; snapshots are emitted on the run's own task.
pub trait PipelineObserver: Send + Sync {
    fn on_snapshot(&self, config: &RenderConfig);
}

pub struct NoopObserver;

impl PipelineObserver for NoopObserver {
    fn on_snapshot(&self, _config: &RenderConfig) {}
}

// =============================================================================
// Pipeline
// =============================================================================

pub struct Pipeline {
    classifier: IntentClassifier,
    dispatch: Arc<SourceDispatchRegistry>,
    cache: Arc<ResultCache>,
    generator: ConfigGenerator,
    observer: Arc<dyn PipelineObserver>,
}

/// Assembles a [`Pipeline`] from explicitly injected components. The cache
/// and observer default to a fresh cache and no-op observer.
pub struct PipelineBuilder {
    classifier: IntentClassifier,
    dispatch: Arc<SourceDispatchRegistry>,
    generator: ConfigGenerator,
    cache: Option<Arc<ResultCache>>,
    observer: Option<Arc<dyn PipelineObserver>>,
}

impl PipelineBuilder {
    pub fn new(
        classifier: IntentClassifier,
        dispatch: Arc<SourceDispatchRegistry>,
        generator: ConfigGenerator,
    ) -> Self {
        Self {
            classifier,
            dispatch,
            generator,
            cache: None,
            observer: None,
        }
    }

    pub fn cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            classifier: self.classifier,
            dispatch: self.dispatch,
            cache: self.cache.unwrap_or_default(),
            generator: self.generator,
            observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
        }
    }
}

impl Pipeline {
    /// Run one query through the full pipeline.
    ///
    /// Never errors past this boundary: failures come back as an error
    /// config with a user-facing message. The returned transcripts reflect
    /// every stage that completed before the run ended; a stage that failed
    /// leaves its transcript untouched.
    pub async fn process(&self, req: ProcessRequest) -> ProcessOutcome {
        let started = Instant::now();
        let format = req
            .format_hint
            .clone()
            .unwrap_or_else(|| "chart".to_string());

        let loading = RenderConfig::loading(&req.query, &format);
        self.observer.on_snapshot(&loading);
        tracing::debug!(session = ?req.session_id, query = %req.query, "pipeline run started");

        let (mut config, transcripts) = match self.run(&req, &format, started).await {
            Ok(done) => done,
            Err((err, transcripts)) => {
                tracing::warn!(error = %err, session = ?req.session_id, query = %req.query, "pipeline run failed");
                let mut config = RenderConfig::error(&req.query, &format, err.user_message());
                config.metadata.elapsed_ms = started.elapsed().as_millis() as u64;
                (config, transcripts)
            }
        };
        config.metadata.elapsed_ms = started.elapsed().as_millis() as u64;

        self.observer.on_snapshot(&config);
        ProcessOutcome { config, transcripts }
    }

    /// Invalidate cached results, for one source or all of them.
    pub fn clear_cache(&self, source_id: Option<&str>) {
        self.cache.clear(source_id);
    }

    async fn run(
        &self,
        req: &ProcessRequest,
        format: &str,
        started: Instant,
    ) -> Result<(RenderConfig, SessionTranscripts), (PipelineError, SessionTranscripts)> {
        let mut transcripts = req.transcripts.clone();

        // Classifying.
        let (intent, intent_log) = match self
            .classifier
            .classify(&req.query, transcripts.intent.clone())
            .await
        {
            Ok(out) => out,
            Err(e) => {
                return Err((
                    PipelineError::ClassificationFailed(e.to_string()),
                    transcripts,
                ))
            }
        };
        transcripts.intent = intent_log;

        // Out-of-domain halts here. The classification itself succeeded, so
        // the intent transcript keeps its new entries.
        if intent == Intent::No {
            return Err((PipelineError::OutOfDomain, transcripts));
        }

        // Selecting -> Fetching, or SkipFetch for restyle intents.
        let result = if intent.requires_fetch() {
            self.fetch(req, &mut transcripts).await?
        } else {
            self.reuse_cached(req, &transcripts)?
        };

        // Configuring.
        let (chart, config_log) = match self
            .generator
            .generate(&req.query, intent, &result, transcripts.config.clone())
            .await
        {
            Ok(out) => out,
            Err(e) => {
                return Err((
                    PipelineError::ConfigGenerationFailed(e.to_string()),
                    transcripts,
                ))
            }
        };
        transcripts.config = config_log;

        // Done.
        let metadata = RenderMetadata {
            executed_query: result.executed_query.clone(),
            resolved_intent: Some(intent),
            row_count: result.total_rows,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        let config = RenderConfig::populated(&req.query, format, result.rows, chart, metadata);
        Ok((config, transcripts))
    }

    /// Fetch through the coalescing cache. At most one underlying dispatch
    /// runs per fingerprint across concurrent runs.
    async fn fetch(
        &self,
        req: &ProcessRequest,
        transcripts: &mut SessionTranscripts,
    ) -> Result<FetchResult, (PipelineError, SessionTranscripts)> {
        let fetch_config = FetchConfig {
            query: req.query.clone(),
            fetch_type: req.fetch_type.clone(),
            source_id: req.source_id.clone(),
        };
        let key = fingerprint(&req.source_id, &req.query);

        let dispatch = Arc::clone(&self.dispatch);
        let prior = transcripts.fetch.clone();
        let (outcome, status) = self
            .cache
            .get_or_compute(&key, move || async move {
                dispatch.dispatch(&fetch_config, &prior).await
            })
            .await;

        if status != CacheStatus::Computed {
            tracing::debug!(?status, %key, "fetch served without a new dispatch");
        }

        match outcome {
            Ok(outcome) => {
                transcripts.fetch.extend(outcome.messages);
                Ok(outcome.result)
            }
            Err(DispatchError::UnsupportedFetchType(kind)) => Err((
                PipelineError::UnsupportedFetchType(kind),
                transcripts.clone(),
            )),
            Err(e) => Err((PipelineError::FetchFailed(e.to_string()), transcripts.clone())),
        }
    }

    /// Restyle intents reuse the previous result for this source; no
    /// dispatch is invoked. The exact (source, query) entry wins if present,
    /// otherwise the newest entry for the source.
    fn reuse_cached(
        &self,
        req: &ProcessRequest,
        transcripts: &SessionTranscripts,
    ) -> Result<FetchResult, (PipelineError, SessionTranscripts)> {
        let key = fingerprint(&req.source_id, &req.query);
        self.cache
            .get(&key)
            .or_else(|| self.cache.latest_for_source(&req.source_id))
            .ok_or_else(|| {
                (
                    PipelineError::FetchFailed(
                        "no fetch result available to restyle".to_string(),
                    ),
                    transcripts.clone(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_states_are_mutually_exclusive() {
        let loading = RenderConfig::loading("q", "chart");
        assert!(loading.is_loading && !loading.is_error && !loading.is_populated());

        let error = RenderConfig::error("q", "chart", "boom");
        assert!(error.is_error && !error.is_loading && !error.is_populated());
        assert_eq!(error.error_message.as_deref(), Some("boom"));

        let populated = RenderConfig::populated(
            "q",
            "chart",
            Vec::new(),
            ChartSpec {
                kind: "bar".into(),
                title: "t".into(),
                x_field: "x".into(),
                y_fields: vec!["y".into()],
            },
            RenderMetadata::default(),
        );
        assert!(populated.is_populated());
    }

    #[test]
    fn user_messages_name_the_fetch_key() {
        let err = PipelineError::UnsupportedFetchType("graphql".into());
        assert!(err.user_message().contains("graphql"));
    }

    #[test]
    fn request_builder_defaults() {
        let req = ProcessRequest::new("q", "sales");
        assert_eq!(req.fetch_type, "sql");
        assert!(req.format_hint.is_none());
        assert!(req.transcripts.intent.is_empty());
    }
}
