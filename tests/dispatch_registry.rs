use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use vizier::store::Row;
use vizier::transcript::{Stage, Transcript};
use vizier::{
    DispatchError, FetchConfig, FetchOutcome, FetchResult, SourceDispatchRegistry, SourceHandler,
};

/// Handler that tags every row with its own name, to make routing visible.
struct TaggedHandler(&'static str);

#[async_trait]
impl SourceHandler for TaggedHandler {
    async fn fetch(
        &self,
        config: &FetchConfig,
        _prior: &Transcript,
    ) -> Result<FetchOutcome, DispatchError> {
        let mut row = Row::new();
        row.insert("handler".into(), json!(self.0));
        row.insert("query".into(), json!(config.query));
        Ok(FetchOutcome {
            result: FetchResult::new(vec![row], None),
            messages: Vec::new(),
        })
    }
}

fn config(fetch_type: &str) -> FetchConfig {
    FetchConfig {
        query: "total revenue per month".into(),
        fetch_type: fetch_type.into(),
        source_id: "sales".into(),
    }
}

#[tokio::test]
async fn handlers_are_interchangeable_behind_the_trait() {
    let mut registry = SourceDispatchRegistry::new();
    registry.register("sql", Arc::new(TaggedHandler("sql")));
    registry.register("rag", Arc::new(TaggedHandler("rag")));

    for key in ["sql", "rag"] {
        let outcome = registry
            .dispatch(&config(key), &Transcript::new(Stage::Fetch))
            .await
            .unwrap();
        assert_eq!(outcome.result.rows[0]["handler"], json!(key));
    }
    assert_eq!(registry.keys(), vec!["rag".to_string(), "sql".to_string()]);
}

#[tokio::test]
async fn unsupported_fetch_type_is_an_error_naming_the_key() {
    let mut registry = SourceDispatchRegistry::new();
    registry.register("sql", Arc::new(TaggedHandler("sql")));

    let err = registry
        .dispatch(&config("web"), &Transcript::new(Stage::Fetch))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("web"));
    match err {
        DispatchError::UnsupportedFetchType(key) => assert_eq!(key, "web"),
        other => panic!("expected UnsupportedFetchType, got {other:?}"),
    }
}

#[tokio::test]
async fn re_registering_a_key_replaces_the_handler() {
    let mut registry = SourceDispatchRegistry::new();
    registry.register("sql", Arc::new(TaggedHandler("first")));
    registry.register("sql", Arc::new(TaggedHandler("second")));

    let outcome = registry
        .dispatch(&config("sql"), &Transcript::new(Stage::Fetch))
        .await
        .unwrap();
    assert_eq!(outcome.result.rows[0]["handler"], json!("second"));
    assert_eq!(registry.keys().len(), 1);
}
