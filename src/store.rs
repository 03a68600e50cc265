//! Data-store collaborator interface.
//!
//! The pipeline consumes rows plus column metadata and nothing else: no
//! connection management, no transactions, no SQL validation. Production
//! callers implement [`DataStore`] over their warehouse; tests and the CLI
//! use [`StaticTableStore`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One result row: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Schema description used to build SQL-generation prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnMeta>,
}

impl TableSchema {
    /// Render a compact one-table description for the prompt.
    pub fn describe(&self) -> String {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} ({})", c.name, c.data_type))
            .collect();
        format!("table {}: {}", self.table, cols.join(", "))
    }
}

/// Errors from the data-store collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("query execution failed: {0}")]
    Execution(String),
    #[error("data source unavailable: {0}")]
    Unavailable(String),
}

/// The relational data store, seen only through generated SQL text.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Execute SQL text, returning rows.
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, StoreError>;

    /// Schema description for prompt construction.
    fn schema(&self) -> TableSchema;
}

/// Infer column metadata from the first row of a result set.
pub fn infer_columns(rows: &[Row]) -> Vec<ColumnMeta> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    first
        .iter()
        .map(|(name, value)| {
            let data_type = match value {
                Value::Number(_) => "number",
                Value::Bool(_) => "boolean",
                Value::String(_) => "text",
                Value::Null => "null",
                Value::Array(_) => "array",
                Value::Object(_) => "object",
            };
            ColumnMeta::new(name.clone(), data_type)
        })
        .collect()
}

/// In-memory table that answers any SQL with its fixed rows.
///
/// A collaborator stand-in for demos and tests, not a SQL engine: the
/// generated SQL is recorded as executed text but not interpreted.
#[derive(Debug, Clone)]
pub struct StaticTableStore {
    schema: TableSchema,
    rows: Vec<Row>,
}

impl StaticTableStore {
    pub fn new(schema: TableSchema, rows: Vec<Row>) -> Self {
        Self { schema, rows }
    }

    /// Load from a JSON file containing an array of flat objects.
    ///
    /// The table name is taken from the file stem; column types are inferred
    /// from the first row.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))?;
        let rows: Vec<Row> = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))?;
        let table = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("table")
            .to_string();
        let columns = infer_columns(&rows);
        Ok(Self::new(TableSchema { table, columns }, rows))
    }
}

#[async_trait]
impl DataStore for StaticTableStore {
    async fn execute(&self, _sql: &str) -> Result<Vec<Row>, StoreError> {
        Ok(self.rows.clone())
    }

    fn schema(&self) -> TableSchema {
        self.schema.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn infer_columns_from_first_row() {
        let rows = vec![row(&[
            ("month", json!("Jan")),
            ("revenue", json!(1200)),
            ("flagged", json!(false)),
        ])];
        let cols = infer_columns(&rows);
        assert_eq!(cols.len(), 3);
        assert!(cols.contains(&ColumnMeta::new("month", "text")));
        assert!(cols.contains(&ColumnMeta::new("revenue", "number")));
        assert!(cols.contains(&ColumnMeta::new("flagged", "boolean")));
    }

    #[test]
    fn infer_columns_empty_rows() {
        assert!(infer_columns(&[]).is_empty());
    }

    #[test]
    fn schema_describe_is_compact() {
        let schema = TableSchema {
            table: "sales".into(),
            columns: vec![
                ColumnMeta::new("month", "text"),
                ColumnMeta::new("revenue", "number"),
            ],
        };
        assert_eq!(
            schema.describe(),
            "table sales: month (text), revenue (number)"
        );
    }

    #[test]
    fn from_json_file_names_table_after_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.json");
        std::fs::write(&path, r#"[{"month": "Jan", "revenue": 1200}]"#).unwrap();

        let store = StaticTableStore::from_json_file(&path).unwrap();
        let schema = store.schema();
        assert_eq!(schema.table, "sales");
        assert_eq!(schema.columns.len(), 2);
    }

    #[test]
    fn from_json_file_rejects_non_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"month": "Jan"}"#).unwrap();
        assert!(StaticTableStore::from_json_file(&path).is_err());
    }

    #[tokio::test]
    async fn static_store_returns_fixed_rows() {
        let rows = vec![row(&[("x", json!(1))]), row(&[("x", json!(2))])];
        let store = StaticTableStore::new(
            TableSchema {
                table: "t".into(),
                columns: infer_columns(&rows),
            },
            rows,
        );
        let out = store.execute("SELECT anything").await.unwrap();
        assert_eq!(out.len(), 2);
    }
}
