use super::prompts::{self, SQL_QUERY_LABEL, SQL_RESULT_LABEL};
use super::statement::{SqlStatement, check_references};
use crate::dataset::SchemaDescriptor;
use crate::error::{QueryError, Result};
use crate::llm::{LanguageModel, with_timeout};
use std::sync::Arc;
use std::time::Duration;

/// Pull the SQL out of a completion: text after a `SQLQuery:` label, before
/// any `SQLResult:` label, with markdown code fences removed.
pub fn extract_sql(response: &str) -> &str {
    let mut text = response;
    if let Some(start) = text.find(SQL_QUERY_LABEL) {
        text = &text[start + SQL_QUERY_LABEL.len()..];
    }
    if let Some(end) = text.find(SQL_RESULT_LABEL) {
        text = &text[..end];
    }
    strip_code_fence(text.trim()).trim()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let mut body = &text[open + 3..];
    // drop a language tag such as ```sql
    if let Some(newline) = body.find('\n')
        && body[..newline].trim().chars().all(char::is_alphanumeric)
    {
        body = &body[newline + 1..];
    }
    body.find("```").map_or(body, |close| &body[..close])
}

/// Natural language to SQL through the reasoning service.
pub struct Translator {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl Translator {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    /// Translate `raw_query` into one statement over `table_name`.
    ///
    /// Translations are never cached; every call goes to the reasoning service.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Translation`] when the call fails or times out,
    /// when the answer is not a single parseable query, or when it reads other
    /// tables or names columns missing from `schema`.
    pub async fn translate(
        &self,
        raw_query: &str,
        table_name: &str,
        schema: &SchemaDescriptor,
    ) -> Result<SqlStatement> {
        let prompt = prompts::text_to_sql(table_name, schema, raw_query);
        let response = with_timeout(self.timeout, self.model.complete(&prompt))
            .await
            .map_err(|e| QueryError::Translation(e.to_string()))?;

        let sql = extract_sql(&response);
        let (statement, ast) = SqlStatement::parse(sql, table_name).map_err(|e| {
            QueryError::Translation(format!("reasoning service returned invalid SQL `{sql}`: {e}"))
        })?;
        check_references(&ast, table_name, schema).map_err(QueryError::Translation)?;

        tracing::debug!(sql = statement.sql(), "Translated query");
        Ok(statement)
    }
}
