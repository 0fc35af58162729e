//! OpenAI chat-completions client.
//!
//! Implements [`LanguageModel`] on top of `async-openai`: plain prompts go out
//! as a single user message, agent turns as the full transcript plus function
//! tools with parallel tool calls disabled, so each turn yields at most one
//! tool invocation.

use super::{AgentAction, ChatMessage, LanguageModel, ModelProvider, ToolCall, ToolSpec};
use crate::config::LlmConfig;
use crate::error::ExternalCallError;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionResponseMessage, ChatCompletionTool, ChatCompletionToolArgs,
        ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionCall,
        FunctionObjectArgs,
    },
};
use async_trait::async_trait;
use secrecy::{ExposeSecret as _, SecretString};
use std::sync::Arc;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

fn api_error(err: OpenAIError) -> ExternalCallError {
    ExternalCallError::Api(err.to_string())
}

/// OpenAI-backed reasoning client for one model.
pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    model: String,
    config: LlmConfig,
}

impl OpenAiModel {
    pub fn new(api_key: &SecretString, model: impl Into<String>, config: LlmConfig) -> Self {
        let openai_config = OpenAIConfig::new().with_api_key(api_key.expose_secret());
        Self {
            client: Client::with_config(openai_config),
            model: model.into(),
            config,
        }
    }

    async fn chat(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<ChatCompletionResponseMessage, ExternalCallError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(messages)
            .max_completion_tokens(self.config.max_tokens);
        if let Some(temperature) = self.config.temperature {
            args.temperature(temperature);
        }
        if !tools.is_empty() {
            args.tools(tools).parallel_tool_calls(false);
        }
        let request = args.build().map_err(api_error)?;

        let response = self.client.chat().create(request).await.map_err(api_error)?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| ExternalCallError::MalformedResponse("no choices returned".to_owned()))
    }
}

fn to_request_message(
    message: &ChatMessage,
) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let converted = match message {
        ChatMessage::System(text) => ChatCompletionRequestSystemMessageArgs::default()
            .content(text.as_str())
            .build()?
            .into(),
        ChatMessage::User(text) => ChatCompletionRequestUserMessageArgs::default()
            .content(text.as_str())
            .build()?
            .into(),
        ChatMessage::ToolCall(call) => ChatCompletionRequestAssistantMessageArgs::default()
            .tool_calls(vec![ChatCompletionMessageToolCall {
                id: call.id.clone(),
                r#type: ChatCompletionToolType::Function,
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            }])
            .build()?
            .into(),
        ChatMessage::ToolResult { call_id, content } => {
            ChatCompletionRequestToolMessageArgs::default()
                .tool_call_id(call_id.as_str())
                .content(content.as_str())
                .build()?
                .into()
        }
    };
    Ok(converted)
}

fn to_tool(spec: &ToolSpec) -> Result<ChatCompletionTool, OpenAIError> {
    ChatCompletionToolArgs::default()
        .r#type(ChatCompletionToolType::Function)
        .function(
            FunctionObjectArgs::default()
                .name(spec.name.as_str())
                .description(spec.description.as_str())
                .parameters(spec.parameters.clone())
                .build()?,
        )
        .build()
}

fn to_action(message: ChatCompletionResponseMessage) -> Result<AgentAction, ExternalCallError> {
    if let Some(call) = message.tool_calls.and_then(|calls| calls.into_iter().next()) {
        let arguments = serde_json::from_str(&call.function.arguments).map_err(|e| {
            ExternalCallError::MalformedResponse(format!(
                "tool arguments for {} are not JSON: {e}",
                call.function.name
            ))
        })?;
        return Ok(AgentAction::Invoke(ToolCall {
            id: call.id,
            name: call.function.name,
            arguments,
        }));
    }

    message
        .content
        .map(AgentAction::Finish)
        .ok_or_else(|| {
            ExternalCallError::MalformedResponse("neither content nor tool call returned".to_owned())
        })
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ExternalCallError> {
        let message = to_request_message(&ChatMessage::User(prompt.to_owned())).map_err(api_error)?;
        self.chat(vec![message], Vec::new())
            .await?
            .content
            .ok_or_else(|| ExternalCallError::MalformedResponse("no content received".to_owned()))
    }

    async fn next_action(
        &self,
        transcript: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<AgentAction, ExternalCallError> {
        let messages = transcript
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()
            .map_err(api_error)?;
        let tools = tools
            .iter()
            .map(to_tool)
            .collect::<Result<Vec<_>, _>>()
            .map_err(api_error)?;

        to_action(self.chat(messages, tools).await?)
    }
}

/// Creates [`OpenAiModel`]s, falling back to `OPENAI_API_KEY`.
pub struct OpenAiProvider {
    config: LlmConfig,
}

impl OpenAiProvider {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }
}

impl ModelProvider for OpenAiProvider {
    fn model(
        &self,
        model_name: &str,
        api_key: Option<&SecretString>,
    ) -> Result<Arc<dyn LanguageModel>, ExternalCallError> {
        let env_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.is_empty())
            .map(|key| SecretString::new(key.into()));
        let key = api_key
            .filter(|key| !key.expose_secret().is_empty())
            .or(env_key.as_ref())
            .ok_or(ExternalCallError::MissingCredential)?;

        Ok(Arc::new(OpenAiModel::new(key, model_name, self.config.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_conversion() -> Result<(), OpenAIError> {
        let spec = ToolSpec {
            name: "execute_sql".to_owned(),
            description: "Run SQL".to_owned(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        };
        let tool = to_tool(&spec)?;
        assert_eq!(tool.function.name, "execute_sql");
        Ok(())
    }

    #[test]
    fn test_transcript_conversion_keeps_tool_ids() -> Result<(), OpenAIError> {
        let call = ToolCall {
            id: "call_1".to_owned(),
            name: "classify_query".to_owned(),
            arguments: serde_json::json!({"query": "SELECT 1"}),
        };
        let message = to_request_message(&ChatMessage::ToolCall(call))?;
        let json = serde_json::to_value(&message).expect("serializable");
        assert_eq!(json["tool_calls"][0]["id"], "call_1");
        assert_eq!(json["tool_calls"][0]["function"]["name"], "classify_query");

        let result = to_request_message(&ChatMessage::ToolResult {
            call_id: "call_1".to_owned(),
            content: "sql".to_owned(),
        })?;
        let json = serde_json::to_value(&result).expect("serializable");
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        Ok(())
    }

    #[test]
    fn test_every_transcript_role_converts() -> Result<(), OpenAIError> {
        let roles = [
            ChatMessage::System("rules".to_owned()),
            ChatMessage::User("question".to_owned()),
            ChatMessage::ToolCall(ToolCall {
                id: "call_2".to_owned(),
                name: "execute_sql".to_owned(),
                arguments: serde_json::json!({}),
            }),
            ChatMessage::ToolResult {
                call_id: "call_2".to_owned(),
                content: "3 rows".to_owned(),
            },
        ]
        .iter()
        .map(|message| {
            to_request_message(message)
                .map(|m| serde_json::to_value(&m).expect("serializable")["role"].clone())
        })
        .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(roles, ["system", "user", "assistant", "tool"]);
        Ok(())
    }

    #[test]
    fn test_provider_requires_a_key() {
        let provider = OpenAiProvider::new(LlmConfig::default());
        let blank = SecretString::new(String::new().into());
        if std::env::var(API_KEY_ENV).is_err() {
            let err = provider
                .model("gpt-4o-mini", Some(&blank))
                .err()
                .expect("no key anywhere");
            assert!(matches!(err, ExternalCallError::MissingCredential));
        }

        let key = SecretString::new("sk-test".to_owned().into());
        let model = provider.model("gpt-4o", Some(&key)).expect("key supplied");
        assert_eq!(model.model_name(), "gpt-4o");
    }
}
