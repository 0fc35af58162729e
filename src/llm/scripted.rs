//! Deterministic stand-in for the reasoning service.
//!
//! Replies are queued up front and handed out in order; every prompt and
//! transcript the pipeline sends is recorded for later inspection.

use super::{AgentAction, ChatMessage, LanguageModel, ModelProvider, ToolCall, ToolSpec};
use crate::error::ExternalCallError;
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

type Scripted<T> = Mutex<VecDeque<Result<T, ExternalCallError>>>;

#[derive(Default)]
pub struct ScriptedModel {
    name: String,
    completions: Scripted<String>,
    actions: Scripted<AgentAction>,
    prompts: Mutex<Vec<String>>,
    transcripts: Mutex<Vec<Vec<ChatMessage>>>,
    offered_tools: Mutex<Vec<Vec<String>>>,
    call_ids: AtomicUsize,
    latency: Option<Duration>,
}

fn push<T>(queue: &Scripted<T>, item: Result<T, ExternalCallError>) {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push_back(item);
}

fn pop<T>(queue: &Scripted<T>, what: &str) -> Result<T, ExternalCallError> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
        .unwrap_or_else(|| Err(ExternalCallError::Api(format!("script exhausted: no {what} left"))))
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            name: "scripted".to_owned(),
            ..Self::default()
        }
    }

    /// Queue a text reply for the next `complete` call.
    #[must_use]
    pub fn complete_with(self, reply: impl Into<String>) -> Self {
        push(&self.completions, Ok(reply.into()));
        self
    }

    /// Queue a failure for the next `complete` call.
    #[must_use]
    pub fn fail_completion(self, err: ExternalCallError) -> Self {
        push(&self.completions, Err(err));
        self
    }

    /// Queue a tool invocation for the next agent turn.
    #[must_use]
    pub fn invoke(self, tool: &str, arguments: serde_json::Value) -> Self {
        let id = format!("call_{}", self.call_ids.fetch_add(1, Ordering::SeqCst) + 1);
        push(
            &self.actions,
            Ok(AgentAction::Invoke(ToolCall {
                id,
                name: tool.to_owned(),
                arguments,
            })),
        );
        self
    }

    /// Queue a final answer for the next agent turn.
    #[must_use]
    pub fn finish(self, text: impl Into<String>) -> Self {
        push(&self.actions, Ok(AgentAction::Finish(text.into())));
        self
    }

    #[must_use]
    pub fn fail_action(self, err: ExternalCallError) -> Self {
        push(&self.actions, Err(err));
        self
    }

    /// Delay every reply, for exercising timeouts.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn transcripts(&self) -> Vec<Vec<ChatMessage>> {
        self.transcripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Tool names offered on each agent turn.
    pub fn offered_tools(&self) -> Vec<Vec<String>> {
        self.offered_tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str) -> Result<String, ExternalCallError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_owned());
        self.pause().await;
        pop(&self.completions, "completion")
    }

    async fn next_action(
        &self,
        transcript: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<AgentAction, ExternalCallError> {
        self.transcripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transcript.to_vec());
        self.offered_tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tools.iter().map(|tool| tool.name.clone()).collect());
        self.pause().await;
        pop(&self.actions, "agent action")
    }
}

/// Hands out the same scripted model whatever name or key is requested.
pub struct ScriptedProvider {
    model: Arc<ScriptedModel>,
}

impl ScriptedProvider {
    pub fn new(model: Arc<ScriptedModel>) -> Self {
        Self { model }
    }
}

impl ModelProvider for ScriptedProvider {
    fn model(
        &self,
        _model_name: &str,
        _api_key: Option<&SecretString>,
    ) -> Result<Arc<dyn LanguageModel>, ExternalCallError> {
        Ok(Arc::clone(&self.model) as Arc<dyn LanguageModel>)
    }
}
