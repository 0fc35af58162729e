//! Deterministic workflow.
//!
//! ```text
//! Start -> Classified -> Translated    -> Executed -> Synthesized -> Done
//!                     \-> SkipTranslate -/          \-------------/
//! ```
//!
//! Any state may end in `Failed`. There is no retry and no backtracking: a
//! user-supplied SQL string that fails to execute is never reinterpreted as
//! natural language. A failed synthesis degrades to `Done` without text.

use super::{Capabilities, QueryPipeline, elapsed_ms};
use crate::error::{QueryError, Result};
use crate::query::{
    AnswerEnvelope, AnswerMetadata, Classification, ExecutionResult, QueryRequest, SqlStatement,
    Strategy, classify, execute,
};
use async_trait::async_trait;
use std::time::Instant;

struct Outcome {
    sql: SqlStatement,
    execution: ExecutionResult,
}

enum State {
    Start,
    Classified(Classification),
    Translated(SqlStatement),
    SkipTranslate(SqlStatement),
    Executed(Outcome),
    Synthesized(Outcome, String),
    Done(Outcome, Option<String>),
    Failed(QueryError),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Classified(_) => "classified",
            Self::Translated(_) => "translated",
            Self::SkipTranslate(_) => "skip_translate",
            Self::Executed(_) => "executed",
            Self::Synthesized(..) => "synthesized",
            Self::Done(..) => "done",
            Self::Failed(_) => "failed",
        }
    }
}

pub struct Workflow {
    capabilities: Capabilities,
}

impl Workflow {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    async fn step(&self, state: State, request: &QueryRequest) -> State {
        match state {
            State::Start => State::Classified(classify(request.raw_query())),

            State::Classified(Classification::Sql(sql)) => {
                State::SkipTranslate(SqlStatement::from_user(&sql, request.table_name()))
            }
            State::Classified(Classification::NaturalLanguage) => {
                match self
                    .capabilities
                    .translate(request, request.raw_query())
                    .await
                {
                    Ok(sql) => State::Translated(sql),
                    Err(err) => State::Failed(err),
                }
            }

            State::Translated(sql) | State::SkipTranslate(sql) => {
                let options = request.options();
                match execute(&sql, request.dataset(), options.limit, options.offset) {
                    Ok(execution) => State::Executed(Outcome { sql, execution }),
                    Err(err) => State::Failed(err),
                }
            }

            State::Executed(outcome) if request.options().synthesize => {
                match self
                    .capabilities
                    .synthesize(
                        request.raw_query(),
                        &outcome.sql,
                        request.schema(),
                        &outcome.execution,
                    )
                    .await
                {
                    Ok(text) => State::Synthesized(outcome, text),
                    Err(err) => {
                        tracing::warn!(error = %err, "Synthesis failed, returning raw rows");
                        State::Done(outcome, None)
                    }
                }
            }
            State::Executed(outcome) => State::Done(outcome, None),

            State::Synthesized(outcome, text) => State::Done(outcome, Some(text)),

            terminal @ (State::Done(..) | State::Failed(_)) => terminal,
        }
    }
}

#[async_trait]
impl QueryPipeline for Workflow {
    fn strategy(&self) -> Strategy {
        Strategy::Workflow
    }

    async fn run_pipeline(&self, request: &QueryRequest) -> Result<AnswerEnvelope> {
        let started = Instant::now();
        let mut steps = Vec::new();
        let mut classification = None;
        let mut state = State::Start;

        let (outcome, text) = loop {
            state = match state {
                State::Done(outcome, text) => break (outcome, text),
                State::Failed(err) => {
                    tracing::warn!(kind = %err.kind(), steps = ?steps, "Workflow failed: {err}");
                    return Err(err);
                }
                state => self.step(state, request).await,
            };
            if let State::Classified(c) = &state {
                classification = Some(c.label());
            }
            tracing::debug!(state = state.name(), "Workflow transition");
            steps.push(state.name().to_owned());
        };

        Ok(AnswerEnvelope {
            sql: outcome.sql,
            execution: outcome.execution,
            synthesized_text: text,
            metadata: AnswerMetadata {
                request_id: request.request_id(),
                strategy: Strategy::Workflow,
                classification,
                steps,
                turns: 0,
                elapsed_ms: elapsed_ms(started),
            },
        })
    }
}
