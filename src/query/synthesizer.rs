use super::prompts;
use super::statement::SqlStatement;
use super::types::ExecutionResult;
use crate::config::SynthesisConfig;
use crate::dataset::SchemaDescriptor;
use crate::error::{QueryError, Result};
use crate::llm::{LanguageModel, with_timeout};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Turns result rows into a prose answer.
pub struct Synthesizer {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    preview_rows: usize,
    preview_columns: usize,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration, config: &SynthesisConfig) -> Self {
        Self {
            model,
            timeout,
            preview_rows: config.preview_rows,
            preview_columns: config.preview_columns,
        }
    }

    /// # Errors
    ///
    /// Returns [`QueryError::Synthesis`] when the call fails or times out.
    /// Callers treat this as a degradation, never as fatal.
    pub async fn synthesize(
        &self,
        question: &str,
        sql: &SqlStatement,
        schema: &SchemaDescriptor,
        result: &ExecutionResult,
    ) -> Result<String> {
        let prompt = prompts::synthesis(sql.sql(), schema, &self.preview(result), question);
        with_timeout(self.timeout, self.model.complete(&prompt))
            .await
            .map(|text| text.trim().to_owned())
            .map_err(|e| QueryError::Synthesis(e.to_string()))
    }

    /// JSON records for the first rows and columns, with a note when cut.
    fn preview(&self, result: &ExecutionResult) -> String {
        let columns = &result.columns[..result.columns.len().min(self.preview_columns)];
        let records: Vec<Value> = result
            .rows
            .iter()
            .take(self.preview_rows)
            .map(|row| {
                let record: Map<String, Value> = columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                Value::Object(record)
            })
            .collect();

        let mut preview = Value::Array(records).to_string();
        if result.row_count > self.preview_rows {
            preview.push_str(&format!(
                " (showing {} of {} rows)",
                self.preview_rows, result.row_count
            ));
        }
        if result.columns.len() > columns.len() {
            preview.push_str(&format!(
                " (showing {} of {} columns)",
                columns.len(),
                result.columns.len()
            ));
        }
        preview
    }
}
