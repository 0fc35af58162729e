//! Autonomous agent loop.
//!
//! Each turn the controller sees the whole transcript and picks one tool or
//! finishes. Tool errors are appended as observations so the controller can
//! recover (for example by translating again after an execution error). The
//! loop ends on a final answer or when the turn budget runs out.

use super::tools::{Tool, Toolbox};
use super::{Capabilities, QueryPipeline, elapsed_ms};
use crate::error::{QueryError, Result};
use crate::llm::{AgentAction, ChatMessage, LanguageModel, with_timeout};
use crate::query::{AnswerEnvelope, AnswerMetadata, QueryRequest, Strategy, prompts};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct AgentLoop {
    capabilities: Capabilities,
    controller: Arc<dyn LanguageModel>,
    max_turns: usize,
    turn_timeout: Duration,
    observation_rows: usize,
}

impl AgentLoop {
    pub fn new(
        capabilities: Capabilities,
        controller: Arc<dyn LanguageModel>,
        max_turns: usize,
        turn_timeout: Duration,
        observation_rows: usize,
    ) -> Self {
        Self {
            capabilities,
            controller,
            max_turns,
            turn_timeout,
            observation_rows,
        }
    }
}

#[async_trait]
impl QueryPipeline for AgentLoop {
    fn strategy(&self) -> Strategy {
        Strategy::Agent
    }

    async fn run_pipeline(&self, request: &QueryRequest) -> Result<AnswerEnvelope> {
        let started = Instant::now();
        let mut toolbox = Toolbox::new(request, &self.capabilities, self.observation_rows);
        let specs: Vec<_> = toolbox.offered().into_iter().map(Tool::spec).collect();
        let mut transcript = vec![
            ChatMessage::System(prompts::agent_system(request.table_name(), request.schema())),
            ChatMessage::User(request.raw_query().to_owned()),
        ];
        let mut steps = Vec::new();

        for turn in 1..=self.max_turns {
            let action = with_timeout(
                self.turn_timeout,
                self.controller.next_action(&transcript, &specs),
            )
            .await?;

            let call = match action {
                AgentAction::Finish(text) => {
                    tracing::debug!(turn, "Agent finished");
                    let classification = toolbox.classification();
                    let Some((sql, execution)) = toolbox.into_executed() else {
                        return Err(QueryError::AgentIncomplete(text));
                    };
                    return Ok(AnswerEnvelope {
                        sql,
                        execution,
                        synthesized_text: request.options().synthesize.then_some(text),
                        metadata: AnswerMetadata {
                            request_id: request.request_id(),
                            strategy: Strategy::Agent,
                            classification,
                            steps,
                            turns: turn,
                            elapsed_ms: elapsed_ms(started),
                        },
                    });
                }
                AgentAction::Invoke(call) => call,
            };

            steps.push(call.name.clone());
            let offered = Tool::from_name(&call.name)
                .filter(|tool| specs.iter().any(|spec| spec.name == tool.name()));
            let observation = match offered {
                Some(tool) => {
                    tracing::debug!(turn, tool = tool.name(), "Agent invoking tool");
                    match toolbox.invoke(tool, &call.arguments).await {
                        Ok(observation) => observation,
                        Err(err) => {
                            tracing::debug!(turn, tool = tool.name(), error = %err, "Tool failed");
                            format!("Error ({}): {err}", err.kind())
                        }
                    }
                }
                None => format!("Error: unknown tool `{}`", call.name),
            };

            let call_id = call.id.clone();
            transcript.push(ChatMessage::ToolCall(call));
            transcript.push(ChatMessage::ToolResult {
                call_id,
                content: observation,
            });
        }

        tracing::warn!(
            max_turns = self.max_turns,
            executed = toolbox.has_executed(),
            "Agent turn budget exhausted"
        );
        Err(QueryError::AgentBudgetExceeded {
            max_turns: self.max_turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmConfig, SynthesisConfig};
    use crate::dataset::DatasetHandle;
    use crate::error::{ErrorKind, ExternalCallError, Result};
    use crate::llm::ScriptedModel;
    use crate::query::QueryOptions;
    use polars::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn pizza() -> DatasetHandle {
        let frame = df!(
            "title" => &["Smith Street Pizza", "Gravesend Pizza", "Lucia Pizza of Avenue X"],
            "totalScore" => &[4.8, 4.6, 4.9],
            "reviewsCount" => &[120i64, 80, 200]
        )
        .expect("frame");
        DatasetHandle::from_frame("pizza", frame).expect("handle")
    }

    fn agent(model: &Arc<ScriptedModel>, max_turns: usize) -> AgentLoop {
        let model = Arc::clone(model) as Arc<dyn LanguageModel>;
        AgentLoop::new(
            Capabilities::new(Arc::clone(&model), &LlmConfig::default(), &SynthesisConfig::default()),
            model,
            max_turns,
            Duration::from_secs(1),
            50,
        )
    }

    fn request(query: &str, options: QueryOptions) -> QueryRequest {
        QueryRequest::new(query, "dataset", pizza(), options)
    }

    #[tokio::test]
    async fn test_classify_execute_synthesize_finish() -> Result<()> {
        let query = "SELECT title FROM dataset WHERE totalScore > 4.7";
        let model = Arc::new(
            ScriptedModel::new()
                .invoke("classify_query", json!({"query": query}))
                .invoke("execute_sql", json!({}))
                .invoke("synthesize_answer", json!({"query": query}))
                .finish("Smith Street Pizza and Lucia Pizza of Avenue X.")
                .complete_with("Two places."),
        );

        let answer = agent(&model, 10)
            .run_pipeline(&request(query, QueryOptions::default()))
            .await?;

        assert_eq!(answer.sql.sql(), query);
        assert_eq!(answer.execution.row_count, 2);
        assert_eq!(
            answer.synthesized_text.as_deref(),
            Some("Smith Street Pizza and Lucia Pizza of Avenue X.")
        );
        assert_eq!(answer.metadata.turns, 4);
        assert_eq!(answer.metadata.classification, Some("sql"));
        assert_eq!(
            answer.metadata.steps,
            vec!["classify_query", "execute_sql", "synthesize_answer"]
        );

        let transcripts = model.transcripts();
        let last = transcripts.last().expect("four turns");
        assert!(matches!(
            last.last(),
            Some(ChatMessage::ToolResult { content, .. }) if content == "Two places."
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_execution_error_is_fed_back_and_recovered() -> Result<()> {
        let model = Arc::new(
            ScriptedModel::new()
                .invoke("execute_sql", json!({"sql": "SELECT nonexistent_col FROM dataset"}))
                .invoke("translate_to_sql", json!({"query": "titles of all places"}))
                .complete_with("SELECT title FROM dataset")
                .invoke("execute_sql", json!({}))
                .finish("Three places."),
        );

        let answer = agent(&model, 10)
            .run_pipeline(&request("SELECT nonexistent_col FROM dataset", QueryOptions::default()))
            .await?;

        assert_eq!(answer.sql.sql(), "SELECT title FROM dataset");
        assert_eq!(answer.execution.row_count, 3);

        let transcripts = model.transcripts();
        let second_turn = &transcripts[1];
        assert!(matches!(
            second_turn.last(),
            Some(ChatMessage::ToolResult { content, .. })
                if content.starts_with("Error (execution)") && content.contains("nonexistent_col")
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_table_functions_are_refused_as_observations() -> Result<()> {
        let model = Arc::new(
            ScriptedModel::new()
                .invoke("execute_sql", json!({"sql": "SELECT * FROM read_csv('/etc/passwd')"}))
                .invoke("execute_sql", json!({"sql": "SELECT title FROM dataset"}))
                .finish("Three places."),
        );

        let answer = agent(&model, 5)
            .run_pipeline(&request("list titles", QueryOptions::default()))
            .await?;
        assert_eq!(answer.sql.sql(), "SELECT title FROM dataset");
        assert_eq!(answer.execution.columns, vec!["title"]);

        let transcripts = model.transcripts();
        assert!(matches!(
            transcripts[1].last(),
            Some(ChatMessage::ToolResult { content, .. })
                if content.starts_with("Error (execution)") && content.contains("read_csv")
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let model = Arc::new(
            ScriptedModel::new()
                .invoke("classify_query", json!({"query": "q"}))
                .invoke("classify_query", json!({"query": "q"}))
                .invoke("classify_query", json!({"query": "q"})),
        );

        let err = agent(&model, 3)
            .run_pipeline(&request("q", QueryOptions::default()))
            .await
            .expect_err("never finishes");
        assert!(matches!(err, QueryError::AgentBudgetExceeded { max_turns: 3 }));
        assert_eq!(err.kind(), ErrorKind::AgentBudgetExceeded);
    }

    #[tokio::test]
    async fn test_finish_without_execution_is_incomplete() {
        let model = Arc::new(ScriptedModel::new().finish("I guess it's Lucia."));
        let err = agent(&model, 5)
            .run_pipeline(&request("best pizza?", QueryOptions::default()))
            .await
            .expect_err("no rows behind the answer");
        assert_eq!(err.kind(), ErrorKind::AgentIncomplete);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_out_of_order_calls_become_observations() -> Result<()> {
        let model = Arc::new(
            ScriptedModel::new()
                .invoke("drop_table", json!({}))
                .invoke("execute_sql", json!({}))
                .invoke("execute_sql", json!({"sql": "SELECT title FROM dataset"}))
                .finish("done"),
        );

        let answer = agent(&model, 5)
            .run_pipeline(&request("list titles", QueryOptions::default()))
            .await?;
        assert_eq!(answer.execution.row_count, 3);

        let transcripts = model.transcripts();
        let observations: Vec<_> = transcripts[3]
            .iter()
            .filter_map(|m| match m {
                ChatMessage::ToolResult { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert!(observations[0].contains("unknown tool"));
        assert!(observations[1].starts_with("Error (invalid_input)"));
        Ok(())
    }

    #[tokio::test]
    async fn test_raw_rows_mode_hides_synthesis_tool() -> Result<()> {
        let model = Arc::new(
            ScriptedModel::new()
                .invoke("synthesize_answer", json!({"query": "q"}))
                .invoke("execute_sql", json!({"sql": "SELECT title FROM dataset"}))
                .finish("ignored"),
        );
        let options = QueryOptions {
            synthesize: false,
            ..QueryOptions::default()
        };

        let answer = agent(&model, 5)
            .run_pipeline(&request("titles", options))
            .await?;

        assert!(answer.synthesized_text.is_none());
        assert!(model.offered_tools()[0].iter().all(|name| name != "synthesize_answer"));
        assert!(model.prompts().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_controller_failure_is_external_error() {
        let model = Arc::new(
            ScriptedModel::new().fail_action(ExternalCallError::Api("401 unauthorized".to_owned())),
        );
        let err = agent(&model, 5)
            .run_pipeline(&request("q", QueryOptions::default()))
            .await
            .expect_err("controller down");
        assert_eq!(err.kind(), ErrorKind::ExternalCall);
    }
}
