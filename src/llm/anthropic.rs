use anthropic_ai_sdk::client::AnthropicClient;
use anthropic_ai_sdk::types::message::{
    ContentBlock, CreateMessageParams, CreateMessageResponse, Message, MessageClient, MessageError,
    RequiredMessageParams, Role,
};
use async_trait::async_trait;

use crate::config::LlmSettings;
use crate::error::LlmError;
use crate::llm::{ChatMessage, ChatRole, LlmInvoker};

const PROVIDER: &str = "anthropic";

/// Runtime configuration for [`AnthropicInvoker`].
#[derive(Debug, Clone)]
pub struct AnthropicInvokerConfig {
    /// Anthropic API key.
    pub api_key: String,
    /// Model id (for example `claude-sonnet-4-5`).
    pub model: String,
    /// Anthropic API version header value.
    pub api_version: String,
    /// Optional base URL override for proxies or compatible endpoints.
    pub api_base_url: Option<String>,
    /// Maximum output tokens per call.
    pub max_tokens: u32,
    /// Optional sampling temperature.
    pub temperature: Option<f32>,
}

impl AnthropicInvokerConfig {
    /// Creates a config with sensible defaults.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_version: AnthropicClient::DEFAULT_API_VERSION.to_string(),
            api_base_url: None,
            max_tokens: 4096,
            temperature: None,
        }
    }
}

impl From<&LlmSettings> for AnthropicInvokerConfig {
    fn from(settings: &LlmSettings) -> Self {
        let mut config = Self::new(settings.api_key.clone(), settings.model.clone());
        config.api_base_url = settings.api_base_url.clone();
        config.max_tokens = settings.max_tokens;
        config.temperature = settings.temperature;
        config
    }
}

/// Third-party chat-service adapter implementing [`LlmInvoker`].
#[derive(Debug, Clone)]
pub struct AnthropicInvoker {
    client: AnthropicClient,
    config: AnthropicInvokerConfig,
}

impl AnthropicInvoker {
    /// Creates an invoker from explicit config.
    pub fn new(config: AnthropicInvokerConfig) -> Result<Self, LlmError> {
        let mut builder =
            AnthropicClient::builder(config.api_key.clone(), config.api_version.clone());
        if let Some(url) = &config.api_base_url {
            builder = builder.with_api_base_url(url.clone());
        }

        let client = builder
            .build::<MessageError>()
            .map_err(|err| LlmError::Request {
                provider: PROVIDER,
                model: config.model.clone(),
                message: err.to_string(),
            })?;

        Ok(Self { client, config })
    }

    /// Creates an invoker using `ANTHROPIC_API_KEY` from the environment.
    pub fn from_env(model: impl Into<String>) -> Result<Self, LlmError> {
        let model = model.into();
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| LlmError::Request {
            provider: PROVIDER,
            model: model.clone(),
            message: "ANTHROPIC_API_KEY is not set".to_string(),
        })?;
        Self::new(AnthropicInvokerConfig::new(api_key, model))
    }
}

#[async_trait]
impl LlmInvoker for AnthropicInvoker {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let (history, system) = to_anthropic_messages(messages);

        let required = RequiredMessageParams {
            model: self.config.model.clone(),
            messages: history,
            max_tokens: self.config.max_tokens,
        };

        let mut request = CreateMessageParams::new(required).with_stream(false);

        if let Some(system_prompt) = system {
            request = request.with_system(system_prompt);
        }

        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }

        let response = self
            .client
            .create_message(Some(&request))
            .await
            .map_err(|err| LlmError::Request {
                provider: PROVIDER,
                model: self.config.model.clone(),
                message: err.to_string(),
            })?;

        normalize_response(&response, &self.config.model)
    }
}

fn to_anthropic_messages(messages: &[ChatMessage]) -> (Vec<Message>, Option<String>) {
    let mut system_lines = Vec::new();
    let mut anthropic_messages: Vec<Message> = Vec::new();

    for message in messages {
        match message.role {
            ChatRole::System => system_lines.push(message.content.clone()),
            ChatRole::User => {
                anthropic_messages.push(Message::new_text(Role::User, message.content.clone()));
            }
            ChatRole::Assistant => {
                anthropic_messages
                    .push(Message::new_text(Role::Assistant, message.content.clone()));
            }
        }
    }

    let system = if system_lines.is_empty() {
        None
    } else {
        Some(system_lines.join("\n\n"))
    };

    (anthropic_messages, system)
}

fn normalize_response(response: &CreateMessageResponse, model: &str) -> Result<String, LlmError> {
    let mut text_parts = Vec::new();

    for block in &response.content {
        if let ContentBlock::Text { text } = block {
            text_parts.push(text.clone());
        }
    }

    if text_parts.is_empty() {
        return Err(LlmError::Response {
            provider: PROVIDER,
            model: model.to_string(),
            message: "response contained no text blocks".to_string(),
        });
    }

    Ok(text_parts.join("\n"))
}

#[cfg(test)]
mod tests {
    use anthropic_ai_sdk::types::message::{MessageContent, StopReason};

    use super::*;

    #[test]
    fn to_anthropic_messages_splits_out_system() {
        let history = vec![
            ChatMessage::system("frame"),
            ChatMessage::user("open the page"),
            ChatMessage::assistant("USE_TOOL: navigate\nARGS: {\"url\": \"https://a.test\"}"),
            ChatMessage::user("✅ navigated to https://a.test"),
        ];

        let (messages, system) = to_anthropic_messages(&history);
        assert_eq!(system.as_deref(), Some("frame"));
        assert_eq!(messages.len(), 3);
        assert!(matches!(messages[1].content, MessageContent::Text { .. }));
    }

    #[test]
    fn normalize_response_joins_text_blocks() {
        let response = CreateMessageResponse {
            content: vec![
                ContentBlock::Text {
                    text: "first".to_string(),
                },
                ContentBlock::Text {
                    text: "second".to_string(),
                },
            ],
            id: "msg_1".to_string(),
            model: "claude-test".to_string(),
            role: Role::Assistant,
            stop_reason: Some(StopReason::EndTurn),
            stop_sequence: None,
            type_: "message".to_string(),
            usage: anthropic_ai_sdk::types::message::Usage {
                input_tokens: 1,
                output_tokens: 1,
            },
        };

        let text = normalize_response(&response, "claude-test").expect("text");
        assert_eq!(text, "first\nsecond");
    }

    #[test]
    fn normalize_response_without_text_is_an_error() {
        let response = CreateMessageResponse {
            content: vec![],
            id: "msg_2".to_string(),
            model: "claude-test".to_string(),
            role: Role::Assistant,
            stop_reason: Some(StopReason::EndTurn),
            stop_sequence: None,
            type_: "message".to_string(),
            usage: anthropic_ai_sdk::types::message::Usage {
                input_tokens: 1,
                output_tokens: 1,
            },
        };

        assert!(normalize_response(&response, "claude-test").is_err());
    }
}
