//! The closed tool set offered to the agent controller.
//!
//! Every tool takes a JSON arguments object and yields a text observation.
//! Tool failures come back as `Err` and are turned into observations by the
//! agent loop; they never abort the request on their own.

use super::Capabilities;
use crate::error::{QueryError, Result};
use crate::llm::ToolSpec;
use crate::query::{Classification, ExecutionResult, QueryRequest, SqlStatement, classify, execute};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Classify,
    Translate,
    Execute,
    Synthesize,
}

impl Tool {
    pub const ALL: [Self; 4] = [Self::Classify, Self::Translate, Self::Execute, Self::Synthesize];

    pub fn name(self) -> &'static str {
        match self {
            Self::Classify => "classify_query",
            Self::Translate => "translate_to_sql",
            Self::Execute => "execute_sql",
            Self::Synthesize => "synthesize_answer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn spec(self) -> ToolSpec {
        let query_param = |description: &str| {
            json!({
                "type": "object",
                "properties": {"query": {"type": "string", "description": description}},
                "required": ["query"]
            })
        };
        let (description, parameters) = match self {
            Self::Classify => (
                "Decide whether the input already is a SQL query. Returns `sql` or `natural_language`.",
                query_param("The user's input, verbatim."),
            ),
            Self::Translate => (
                "Translate a natural-language question into one SQL query over the table.",
                query_param("The question to translate; may be rephrased after a failed execution."),
            ),
            Self::Execute => (
                "Execute SQL against the table and return the resulting rows. \
                 Without `sql`, runs the last translated or classified query.",
                json!({
                    "type": "object",
                    "properties": {"sql": {"type": "string", "description": "SQL to run."}}
                }),
            ),
            Self::Synthesize => (
                "Write a natural-language answer to the question from the last executed query's rows.",
                query_param("The user's question."),
            ),
        };
        ToolSpec {
            name: self.name().to_owned(),
            description: description.to_owned(),
            parameters,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct QueryArgs {
    query: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SqlArgs {
    sql: Option<String>,
}

fn arguments<T: Default + DeserializeOwned>(tool: Tool, value: &Value) -> Result<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| QueryError::InvalidInput(format!("bad arguments for {}: {e}", tool.name())))
}

/// Per-request tool state: what has been classified, translated and executed.
pub struct Toolbox<'a> {
    request: &'a QueryRequest,
    capabilities: &'a Capabilities,
    observation_rows: usize,
    pending_sql: Option<SqlStatement>,
    executed: Option<(SqlStatement, ExecutionResult)>,
    classification: Option<&'static str>,
}

impl<'a> Toolbox<'a> {
    pub fn new(request: &'a QueryRequest, capabilities: &'a Capabilities, observation_rows: usize) -> Self {
        Self {
            request,
            capabilities,
            observation_rows,
            pending_sql: None,
            executed: None,
            classification: None,
        }
    }

    /// Tools available for this request.
    pub fn offered(&self) -> Vec<Tool> {
        Tool::ALL
            .into_iter()
            .filter(|tool| *tool != Tool::Synthesize || self.request.options().synthesize)
            .collect()
    }

    pub fn classification(&self) -> Option<&'static str> {
        self.classification
    }

    /// Last successful execution.
    pub fn into_executed(self) -> Option<(SqlStatement, ExecutionResult)> {
        self.executed
    }

    pub fn has_executed(&self) -> bool {
        self.executed.is_some()
    }

    /// # Errors
    ///
    /// Returns the capability's error, or [`QueryError::InvalidInput`] for bad
    /// arguments or a tool used out of order.
    pub async fn invoke(&mut self, tool: Tool, args: &Value) -> Result<String> {
        match tool {
            Tool::Classify => {
                let QueryArgs { query } = arguments(tool, args)?;
                let query = query.unwrap_or_else(|| self.request.raw_query().to_owned());
                let classification = classify(&query);
                if let Classification::Sql(sql) = &classification {
                    self.pending_sql = Some(SqlStatement::from_user(sql, self.request.table_name()));
                }
                self.classification = Some(classification.label());
                Ok(classification.label().to_owned())
            }
            Tool::Translate => {
                let QueryArgs { query } = arguments(tool, args)?;
                let question = query.as_deref().unwrap_or(self.request.raw_query());
                let sql = self.capabilities.translate(self.request, question).await?;
                let observation = sql.sql().to_owned();
                self.pending_sql = Some(sql);
                Ok(observation)
            }
            Tool::Execute => {
                let SqlArgs { sql } = arguments(tool, args)?;
                let statement = match sql {
                    Some(sql) => SqlStatement::from_user(&sql, self.request.table_name()),
                    None => self.pending_sql.clone().ok_or_else(|| {
                        QueryError::InvalidInput(
                            "no SQL to execute yet: pass `sql` or call translate_to_sql first"
                                .to_owned(),
                        )
                    })?,
                };
                let options = self.request.options();
                let result = execute(&statement, self.request.dataset(), options.limit, options.offset)?;
                let observation = self.observe(&result);
                self.executed = Some((statement, result));
                Ok(observation)
            }
            Tool::Synthesize => {
                let QueryArgs { query } = arguments(tool, args)?;
                let question = query.as_deref().unwrap_or(self.request.raw_query());
                let (sql, result) = self.executed.as_ref().ok_or_else(|| {
                    QueryError::InvalidInput("nothing to synthesize: call execute_sql first".to_owned())
                })?;
                self.capabilities
                    .synthesize(question, sql, self.request.schema(), result)
                    .await
            }
        }
    }

    fn observe(&self, result: &ExecutionResult) -> String {
        let shown: Vec<_> = result.rows.iter().take(self.observation_rows).collect();
        json!({
            "columns": result.columns,
            "rowCount": result.row_count,
            "rows": shown,
        })
        .to_string()
    }
}
