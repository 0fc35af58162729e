//! Boundary to the external reasoning service.
//!
//! The pipeline only ever sees the [`LanguageModel`] trait: plain text
//! completion for translation and synthesis, and a single structured
//! next-step decision for the agent loop. The model never runs anything;
//! a returned [`AgentAction::Invoke`] is just a record that the agent loop
//! executes locally.

pub mod openai;
pub mod scripted;

use crate::error::ExternalCallError;
use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use openai::{OpenAiModel, OpenAiProvider};
pub use scripted::{ScriptedModel, ScriptedProvider};

/// Tool advertised to the agent controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// One structured tool invocation chosen by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Entry of the agent transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System(String),
    User(String),
    /// The controller's tool choice for a turn.
    ToolCall(ToolCall),
    /// Local observation fed back for a previous tool call.
    ToolResult { call_id: String, content: String },
}

/// The controller's decision for one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    Invoke(ToolCall),
    Finish(String),
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Single prompt in, text out.
    async fn complete(&self, prompt: &str) -> Result<String, ExternalCallError>;

    /// Ask the controller what to do next given the running transcript.
    async fn next_action(
        &self,
        transcript: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<AgentAction, ExternalCallError>;
}

/// Builds a model client per request (model name and key are per request).
pub trait ModelProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ExternalCallError::MissingCredential`] when no key is known.
    fn model(
        &self,
        model_name: &str,
        api_key: Option<&SecretString>,
    ) -> Result<Arc<dyn LanguageModel>, ExternalCallError>;
}

/// Bound a reasoning call by `timeout`.
///
/// # Errors
///
/// Returns [`ExternalCallError::Timeout`] if the call does not finish in time,
/// otherwise whatever the call itself returned.
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, ExternalCallError>
where
    F: Future<Output = Result<T, ExternalCallError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_elapsed| ExternalCallError::Timeout(timeout))?
}
