//! Capability provider boundary
//!
//! The provider is treated as pure request/response: ordered messages plus a
//! capability schema in, exactly one of plain content or a single capability
//! invocation out. When the upstream API returns several tool calls, the
//! first is taken and the rest are dropped with a warning.

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::warn;

use crate::capability::CapabilitySpec;
use crate::error::{BotError, Result};
use crate::items::{CapabilityCall, Message, ModelResponse, Role};
use crate::usage::Usage;

/// Language-model boundary used by the agent runtime
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// One completion over the given messages and declared capabilities
    async fn complete(
        &self,
        messages: Vec<Message>,
        capabilities: Vec<CapabilitySpec>,
    ) -> Result<(ModelResponse, Usage)>;

    fn model_name(&self) -> &str;
}

/// OpenAI-backed provider via async-openai
pub struct OpenAIProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
        }
    }

    pub fn with_client(client: Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn convert_message(&self, msg: &Message) -> Result<ChatCompletionRequestMessage> {
        let converted = match msg.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(msg.content.clone())
                .build()?
                .into(),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content.clone())
                .build()?
                .into(),
            Role::Assistant => {
                let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                builder.content(msg.content.clone());
                if let Some(call) = &msg.call {
                    builder.tool_calls(vec![ChatCompletionMessageToolCall {
                        id: call.id.clone(),
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    }]);
                }
                builder.build()?.into()
            }
            Role::Function => ChatCompletionRequestToolMessageArgs::default()
                .content(msg.content.clone())
                .tool_call_id(msg.call_id.clone().unwrap_or_default())
                .build()?
                .into(),
        };
        Ok(converted)
    }

    fn convert_capabilities(&self, specs: &[CapabilitySpec]) -> Result<Vec<ChatCompletionTool>> {
        specs
            .iter()
            .map(|spec| {
                Ok(ChatCompletionToolArgs::default()
                    .r#type(ChatCompletionToolType::Function)
                    .function(
                        FunctionObjectArgs::default()
                            .name(&spec.name)
                            .description(&spec.description)
                            .parameters(spec.parameters.clone())
                            .build()?,
                    )
                    .build()?)
            })
            .collect()
    }
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    async fn complete(
        &self,
        messages: Vec<Message>,
        capabilities: Vec<CapabilitySpec>,
    ) -> Result<(ModelResponse, Usage)> {
        let converted: Result<Vec<ChatCompletionRequestMessage>> =
            messages.iter().map(|m| self.convert_message(m)).collect();

        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(&self.model).messages(converted?);
        if !capabilities.is_empty() {
            request.tools(self.convert_capabilities(&capabilities)?);
        }

        let response = self.client.chat().create(request.build()?).await?;

        let choice = response
            .choices
            .first()
            .ok_or(BotError::EmptyCompletion)?;

        // exactly one capability invocation per completion; extras are dropped
        let call = match &choice.message.tool_calls {
            Some(calls) if !calls.is_empty() => {
                if calls.len() > 1 {
                    warn!(
                        dropped = calls.len() - 1,
                        "provider returned multiple tool calls, keeping the first"
                    );
                }
                let first = &calls[0];
                Some(CapabilityCall {
                    id: first.id.clone(),
                    name: first.function.name.clone(),
                    arguments: serde_json::from_str(&first.function.arguments)
                        .unwrap_or(Value::Null),
                })
            }
            _ => None,
        };

        let model_response = ModelResponse {
            content: choice.message.content.clone(),
            call,
        };

        let usage = response
            .usage
            .map(|u| Usage::new(u.prompt_tokens as usize, u.completion_tokens as usize))
            .unwrap_or_else(Usage::empty);

        Ok((model_response, usage))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Deterministic provider for tests and demos
///
/// Pops queued responses in order; an exhausted queue yields a neutral
/// plain-content reply, mirroring a provider that declines to call any
/// capability.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ModelResponse>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_message(self, content: impl Into<String>) -> Self {
        self.push(ModelResponse::message(content));
        self
    }

    pub fn with_capability(self, name: impl Into<String>, arguments: Value) -> Self {
        self.push(ModelResponse::capability(CapabilityCall::new(
            name, arguments,
        )));
        self
    }

    pub fn push(&self, response: ModelResponse) {
        self.responses
            .lock()
            .expect("scripted provider lock")
            .push_back(response);
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("scripted provider lock").len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(
        &self,
        _messages: Vec<Message>,
        _capabilities: Vec<CapabilitySpec>,
    ) -> Result<(ModelResponse, Usage)> {
        let next = self
            .responses
            .lock()
            .expect("scripted provider lock")
            .pop_front();
        let response =
            next.unwrap_or_else(|| ModelResponse::message("Wie kann ich Ihnen weiterhelfen?"));
        Ok((response, Usage::new(10, 5)))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
