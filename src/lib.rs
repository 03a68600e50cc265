#![forbid(unsafe_code)]

//! # vizier
//!
//! Turns a free-text user query into a rendered visualization config by
//! running it through a staged pipeline: classify intent, dispatch to a data
//! source, fetch data, then generate a display configuration.
//!
//! The load-bearing pieces are not the chart drawing (renderers are external
//! collaborators behind a trait) but the machinery around the pipeline:
//!
//! - [`cache::ResultCache`] — fingerprint-keyed result cache with request
//!   coalescing: identical in-flight queries share exactly one computation.
//! - [`dispatch::SourceDispatchRegistry`] — string-keyed polymorphic dispatch
//!   to fetch handlers ("sql", "rag", ...), failing loudly on unknown keys.
//! - [`render::RenderKindRegistry`] — visualization-kind lookup that resolves
//!   to a renderer/processor pair, falling back to a sentinel instead of
//!   erroring (the deliberate opposite of the dispatch registry).
//! - [`pipeline::Pipeline`] — the orchestrator state machine tying the stages
//!   together and folding every failure into an error-shaped render config.

pub mod cache;
pub mod chartgen;
pub mod dispatch;
pub mod gateway;
pub mod intent;
pub mod pipeline;
pub mod prompts;
pub mod render;
pub mod store;
pub mod structured;
pub mod transcript;

pub use cache::{fingerprint, CacheStatus, ResultCache};
pub use dispatch::{
    DispatchError, FetchConfig, FetchOutcome, FetchResult, SourceDispatchRegistry, SourceHandler,
    SqlSourceHandler,
};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use intent::{Intent, IntentClassifier};
pub use pipeline::{
    Pipeline, PipelineBuilder, PipelineError, PipelineObserver, ProcessOutcome, ProcessRequest,
    RenderConfig,
};
pub use render::{register_builtin_kinds, RenderKindRegistry, RenderResolution};
pub use transcript::{SessionTranscripts, Stage, Transcript};
