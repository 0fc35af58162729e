use super::statement::SqlStatement;
use crate::config::DEFAULT_MODEL;
use crate::dataset::{DatasetHandle, SchemaDescriptor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Per-request runtime options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub refresh: bool,
    pub use_agent: bool,
    pub model_name: String,
    /// When false, both strategies return raw rows only.
    pub synthesize: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: None,
            offset: None,
            refresh: false,
            use_agent: false,
            model_name: DEFAULT_MODEL.to_owned(),
            synthesize: true,
        }
    }
}

/// One incoming query. Immutable once built.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    request_id: Uuid,
    raw_query: String,
    table_name: String,
    schema: Arc<SchemaDescriptor>,
    dataset: DatasetHandle,
    options: QueryOptions,
}

impl QueryRequest {
    pub fn new(
        raw_query: impl Into<String>,
        table_name: impl Into<String>,
        dataset: DatasetHandle,
        options: QueryOptions,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            raw_query: raw_query.into(),
            table_name: table_name.into(),
            schema: Arc::clone(dataset.schema()),
            dataset,
            options,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn raw_query(&self) -> &str {
        &self.raw_query
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn dataset(&self) -> &DatasetHandle {
        &self.dataset
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The query already is SQL and is carried forward as-is.
    Sql(String),
    NaturalLanguage,
}

impl Classification {
    pub fn is_sql(&self) -> bool {
        matches!(self, Self::Sql(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Sql(_) => "sql",
            Self::NaturalLanguage => "natural_language",
        }
    }
}

/// Rows returned by the engine, after paging.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
}

impl ExecutionResult {
    /// Value of `column` in row `row`, if both exist.
    pub fn cell(&self, row: usize, column: &str) -> Option<&serde_json::Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(idx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Workflow,
    Agent,
}

impl Strategy {
    pub fn from_flag(use_agent: bool) -> Self {
        if use_agent { Self::Agent } else { Self::Workflow }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerMetadata {
    pub request_id: Uuid,
    pub strategy: Strategy,
    /// Only known when the classifier ran.
    pub classification: Option<&'static str>,
    /// Workflow states entered or agent tools invoked, in order.
    pub steps: Vec<String>,
    pub turns: usize,
    pub elapsed_ms: u64,
}

/// Terminal artifact of both strategies, serialized as one flat object.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEnvelope {
    #[serde(flatten)]
    pub sql: SqlStatement,
    #[serde(flatten)]
    pub execution: ExecutionResult,
    pub synthesized_text: Option<String>,
    #[serde(flatten)]
    pub metadata: AnswerMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_options_defaults_from_partial_json() {
        let options: QueryOptions =
            serde_json::from_value(json!({"limit": 5, "useAgent": true})).expect("valid options");
        assert_eq!(options.limit, Some(5));
        assert!(options.use_agent);
        assert!(options.synthesize);
        assert_eq!(options.model_name, DEFAULT_MODEL);
    }

    #[test]
    fn test_envelope_serializes_flat() {
        let envelope = AnswerEnvelope {
            sql: SqlStatement::from_user("SELECT title FROM dataset", "dataset"),
            execution: ExecutionResult {
                columns: vec!["title".to_owned()],
                rows: vec![vec![json!("Lucia Pizza of Avenue X")]],
                row_count: 1,
            },
            synthesized_text: None,
            metadata: AnswerMetadata {
                request_id: Uuid::nil(),
                strategy: Strategy::Workflow,
                classification: Some("sql"),
                steps: vec!["classified".to_owned()],
                turns: 0,
                elapsed_ms: 3,
            },
        };

        let value = serde_json::to_value(&envelope).expect("serializable");
        assert_eq!(value["sql"], "SELECT title FROM dataset");
        assert_eq!(value["tableName"], "dataset");
        assert_eq!(value["rowCount"], 1);
        assert_eq!(value["rows"][0][0], "Lucia Pizza of Avenue X");
        assert_eq!(value["synthesizedText"], serde_json::Value::Null);
        assert_eq!(value["strategy"], "workflow");
        assert_eq!(value["classification"], "sql");
    }

    #[test]
    fn test_cell_lookup() {
        let result = ExecutionResult {
            columns: vec!["a".to_owned(), "b".to_owned()],
            rows: vec![vec![json!(1), json!(2)]],
            row_count: 1,
        };
        assert_eq!(result.cell(0, "b"), Some(&json!(2)));
        assert_eq!(result.cell(1, "a"), None);
        assert_eq!(result.cell(0, "c"), None);
    }
}
