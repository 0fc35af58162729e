//! Strategies that sequence the query capabilities into one answer.
//!
//! Both strategies implement [`QueryPipeline`]; callers pick one with
//! [`pipeline_for`] from the request's `use_agent` flag and never branch on
//! the strategy themselves.
//!
//! - [`Workflow`]: fixed state machine, at most one call per capability
//! - [`AgentLoop`]: tool-calling controller with a turn budget

pub mod agent;
pub mod tools;
pub mod workflow;

use crate::config::{AppConfig, LlmConfig, SynthesisConfig};
use crate::dataset::SchemaDescriptor;
use crate::error::Result;
use crate::llm::LanguageModel;
use crate::query::{
    AnswerEnvelope, ExecutionResult, QueryRequest, SqlStatement, Strategy, Synthesizer, Translator,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

pub use agent::AgentLoop;
pub use tools::Tool;
pub use workflow::Workflow;

#[async_trait]
pub trait QueryPipeline: Send + Sync {
    fn strategy(&self) -> Strategy;

    /// Process one request end to end.
    ///
    /// # Errors
    ///
    /// Returns the fatal [`crate::error::QueryError`] of the strategy; a
    /// failed synthesis is never fatal.
    async fn run_pipeline(&self, request: &QueryRequest) -> Result<AnswerEnvelope>;
}

/// The model-backed capabilities shared by both strategies.
pub struct Capabilities {
    translator: Translator,
    synthesizer: Synthesizer,
}

impl Capabilities {
    pub fn new(model: Arc<dyn LanguageModel>, llm: &LlmConfig, synthesis: &SynthesisConfig) -> Self {
        Self {
            translator: Translator::new(Arc::clone(&model), llm.request_timeout()),
            synthesizer: Synthesizer::new(model, llm.request_timeout(), synthesis),
        }
    }

    /// # Errors
    ///
    /// See [`Translator::translate`].
    pub async fn translate(&self, request: &QueryRequest, question: &str) -> Result<SqlStatement> {
        self.translator
            .translate(question, request.table_name(), request.schema())
            .await
    }

    /// # Errors
    ///
    /// See [`Synthesizer::synthesize`].
    pub async fn synthesize(
        &self,
        question: &str,
        sql: &SqlStatement,
        schema: &SchemaDescriptor,
        execution: &ExecutionResult,
    ) -> Result<String> {
        self.synthesizer
            .synthesize(question, sql, schema, execution)
            .await
    }
}

/// Build the strategy selected by `strategy`.
pub fn pipeline_for(
    strategy: Strategy,
    model: Arc<dyn LanguageModel>,
    config: &AppConfig,
) -> Box<dyn QueryPipeline> {
    let capabilities = Capabilities::new(Arc::clone(&model), &config.llm, &config.synthesis);
    match strategy {
        Strategy::Workflow => Box::new(Workflow::new(capabilities)),
        Strategy::Agent => Box::new(AgentLoop::new(
            capabilities,
            model,
            config.agent.max_turns,
            config.llm.request_timeout(),
            config.synthesis.preview_rows,
        )),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
