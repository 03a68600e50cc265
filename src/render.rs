//! Render-kind registry: opaque kind strings resolved to renderer/processor
//! pairs at runtime.
//!
//! Resolution never fails. An unregistered kind comes back as the
//! [`RenderResolution::Unregistered`] sentinel and the caller shows a
//! placeholder; a registry can be extended at runtime without touching any
//! call site. This is the opposite policy from the fetch dispatch registry,
//! where an unknown key is a hard error - a missing fetch handler is a
//! configuration bug, a missing render kind is a presentation gap.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chartgen::ChartSpec;
use crate::store::Row;

// =============================================================================
// Processed data
// =============================================================================

/// One named series of numeric values, aligned with the label axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
}

/// Validated label/series form. Renderers consume only this, never raw rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedData {
    pub labels: Vec<String>,
    pub series: Vec<Series>,
}

/// Outcome of a data processor: chartable data or a description of why the
/// rows do not fit the chart spec.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    Ready(ProcessedData),
    Invalid { error: String },
}

/// Pure transform from raw rows to chartable form.
pub trait DataProcessor: Send + Sync {
    fn process(&self, rows: &[Row], spec: &ChartSpec) -> Processed;
}

/// Draws processed data. Drawing internals are out of scope for the core;
/// implementations here produce a textual description.
pub trait Renderer: Send + Sync {
    fn render(&self, data: &ProcessedData, spec: &ChartSpec) -> String;
}

// =============================================================================
// Registry
// =============================================================================

/// What a registered render kind dispatches to.
#[derive(Clone)]
pub struct RenderEntry {
    pub renderer: Arc<dyn Renderer>,
    pub processor: Arc<dyn DataProcessor>,
}

/// Resolution result. Never an error.
pub enum RenderResolution {
    Found(RenderEntry),
    Unregistered { kind: String },
}

/// Maps render-kind keys to entries. Explicit instance, no global state;
/// re-registering a kind replaces it, which is how tests and hot-swaps
/// override a builtin.
#[derive(Default)]
pub struct RenderKindRegistry {
    entries: HashMap<String, RenderEntry>,
}

impl RenderKindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, entry: RenderEntry) {
        self.entries.insert(kind.into(), entry);
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.entries.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn resolve(&self, kind: &str) -> RenderResolution {
        match self.entries.get(kind) {
            Some(entry) => RenderResolution::Found(entry.clone()),
            None => RenderResolution::Unregistered {
                kind: kind.to_string(),
            },
        }
    }
}

// =============================================================================
// Builtins
// =============================================================================

/// Shared processor for every builtin kind: labels from `x_field`, one series
/// per `y_field`. Rows missing a field or carrying a non-numeric value make
/// the whole set invalid, naming the offending column.
pub struct SeriesProcessor;

impl DataProcessor for SeriesProcessor {
    fn process(&self, rows: &[Row], spec: &ChartSpec) -> Processed {
        let mut labels = Vec::with_capacity(rows.len());
        for row in rows {
            match row.get(&spec.x_field) {
                Some(v) => labels.push(match v.as_str() {
                    Some(s) => s.to_string(),
                    None => v.to_string(),
                }),
                None => {
                    return Processed::Invalid {
                        error: format!("rows have no column '{}'", spec.x_field),
                    }
                }
            }
        }

        let mut series = Vec::with_capacity(spec.y_fields.len());
        for field in &spec.y_fields {
            let mut values = Vec::with_capacity(rows.len());
            for row in rows {
                match row.get(field).and_then(|v| v.as_f64()) {
                    Some(n) => values.push(n),
                    None => {
                        return Processed::Invalid {
                            error: format!("column '{field}' is missing or not numeric"),
                        }
                    }
                }
            }
            series.push(Series {
                name: field.clone(),
                values,
            });
        }

        Processed::Ready(ProcessedData { labels, series })
    }
}

/// Text stand-in for a drawing backend.
pub struct TextRenderer;

impl Renderer for TextRenderer {
    fn render(&self, data: &ProcessedData, spec: &ChartSpec) -> String {
        format!(
            "[{} chart] {} | {} categories, {} series",
            spec.kind,
            spec.title,
            data.labels.len(),
            data.series.len()
        )
    }
}

pub const BUILTIN_KINDS: &[&str] = &["bar", "line", "pie", "area", "radar", "funnel", "heatmap"];

/// Install the builtin kinds, all sharing one processor and one renderer.
pub fn register_builtin_kinds(registry: &mut RenderKindRegistry) {
    let processor: Arc<dyn DataProcessor> = Arc::new(SeriesProcessor);
    let renderer: Arc<dyn Renderer> = Arc::new(TextRenderer);
    for kind in BUILTIN_KINDS {
        registry.register(
            *kind,
            RenderEntry {
                renderer: Arc::clone(&renderer),
                processor: Arc::clone(&processor),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(kind: &str) -> ChartSpec {
        ChartSpec {
            kind: kind.into(),
            title: "t".into(),
            x_field: "month".into(),
            y_fields: vec!["revenue".into()],
        }
    }

    fn row(month: &str, revenue: serde_json::Value) -> Row {
        let mut r = Row::new();
        r.insert("month".into(), json!(month));
        r.insert("revenue".into(), revenue);
        r
    }

    #[test]
    fn builtin_kinds_all_resolve() {
        let mut registry = RenderKindRegistry::new();
        register_builtin_kinds(&mut registry);
        for kind in BUILTIN_KINDS {
            assert!(matches!(
                registry.resolve(kind),
                RenderResolution::Found(_)
            ));
        }
        assert_eq!(registry.kinds().len(), BUILTIN_KINDS.len());
    }

    #[test]
    fn unknown_kind_is_a_sentinel_not_an_error() {
        let registry = RenderKindRegistry::new();
        match registry.resolve("hologram") {
            RenderResolution::Unregistered { kind } => assert_eq!(kind, "hologram"),
            RenderResolution::Found(_) => panic!("empty registry resolved a kind"),
        }
    }

    #[test]
    fn series_processor_builds_aligned_series() {
        let rows = vec![row("Jan", json!(10)), row("Feb", json!(12.5))];
        match SeriesProcessor.process(&rows, &spec("bar")) {
            Processed::Ready(data) => {
                assert_eq!(data.labels, vec!["Jan", "Feb"]);
                assert_eq!(data.series[0].values, vec![10.0, 12.5]);
            }
            Processed::Invalid { error } => panic!("unexpected invalid: {error}"),
        }
    }

    #[test]
    fn series_processor_rejects_non_numeric_values() {
        let rows = vec![row("Jan", json!("lots"))];
        match SeriesProcessor.process(&rows, &spec("bar")) {
            Processed::Invalid { error } => assert!(error.contains("revenue")),
            Processed::Ready(_) => panic!("non-numeric column accepted"),
        }
    }

    #[test]
    fn register_replaces_existing_kind() {
        struct Upside;
        impl Renderer for Upside {
            fn render(&self, _: &ProcessedData, _: &ChartSpec) -> String {
                "upside-down".into()
            }
        }

        let mut registry = RenderKindRegistry::new();
        register_builtin_kinds(&mut registry);
        registry.register(
            "bar",
            RenderEntry {
                renderer: Arc::new(Upside),
                processor: Arc::new(SeriesProcessor),
            },
        );

        let data = ProcessedData {
            labels: vec![],
            series: vec![],
        };
        match registry.resolve("bar") {
            RenderResolution::Found(entry) => {
                assert_eq!(entry.renderer.render(&data, &spec("bar")), "upside-down");
            }
            RenderResolution::Unregistered { .. } => panic!("bar vanished"),
        }
    }
}
