use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LlmSettings;
use crate::error::LlmError;
use crate::llm::{ChatMessage, ChatRole, LlmInvoker};

const PROVIDER: &str = "hosted";
const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/v1";

/// Runtime configuration for [`HostedInvoker`].
#[derive(Debug, Clone)]
pub struct HostedInvokerConfig {
    /// Bearer token, may be empty for unauthenticated local deployments.
    pub api_key: String,
    /// Model id as exposed by the inference service.
    pub model: String,
    /// Base URL of the OpenAI-compatible endpoint.
    pub api_base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl HostedInvokerConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_base_url: None,
            temperature: None,
            max_tokens: Some(4096),
        }
    }
}

impl From<&LlmSettings> for HostedInvokerConfig {
    fn from(settings: &LlmSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            api_base_url: settings.api_base_url.clone(),
            temperature: settings.temperature,
            max_tokens: Some(settings.max_tokens),
        }
    }
}

/// Adapter for a self-hosted OpenAI-compatible inference service.
#[derive(Debug, Clone)]
pub struct HostedInvoker {
    client: Client,
    config: HostedInvokerConfig,
}

impl HostedInvoker {
    pub fn new(config: HostedInvokerConfig) -> Result<Self, LlmError> {
        let client = Client::builder().build().map_err(|err| LlmError::Request {
            provider: PROVIDER,
            model: config.model.clone(),
            message: err.to_string(),
        })?;

        Ok(Self { client, config })
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, LlmError> {
        let model = model.into();
        let api_key = std::env::var("HOSTED_LLM_API_KEY").unwrap_or_default();
        let mut config = HostedInvokerConfig::new(api_key, model);
        if let Ok(base_url) = std::env::var("QA_AGENT_API_BASE_URL") {
            config.api_base_url = Some(base_url);
        }
        Self::new(config)
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmInvoker for HostedInvoker {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let request = build_request(messages, &self.config);

        let mut builder = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json");
        if !self.config.api_key.is_empty() {
            builder = builder.header("authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|err| LlmError::Request {
                provider: PROVIDER,
                model: self.config.model.clone(),
                message: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(LlmError::Request {
                provider: PROVIDER,
                model: self.config.model.clone(),
                message: extract_api_error(response).await,
            });
        }

        let payload = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|err| LlmError::Response {
                provider: PROVIDER,
                model: self.config.model.clone(),
                message: err.to_string(),
            })?;

        normalize_response(payload, &self.config.model)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<AssistantMessage>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<Value>,
}

fn build_request(messages: &[ChatMessage], config: &HostedInvokerConfig) -> ChatCompletionRequest {
    let request_messages = messages
        .iter()
        .map(|message| RequestMessage {
            role: match message.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            },
            content: message.content.clone(),
        })
        .collect();

    ChatCompletionRequest {
        model: config.model.clone(),
        messages: request_messages,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    }
}

fn normalize_response(payload: ChatCompletionResponse, model: &str) -> Result<String, LlmError> {
    let choice = payload
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Response {
            provider: PROVIDER,
            model: model.to_string(),
            message: "response contained no choices".to_string(),
        })?;

    let content = choice
        .message
        .and_then(|message| message.content)
        .ok_or_else(|| LlmError::Response {
            provider: PROVIDER,
            model: model.to_string(),
            message: "choice contained no message content".to_string(),
        })?;

    Ok(content)
}

async fn extract_api_error(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let message = envelope
            .error
            .message
            .unwrap_or_else(|| "unknown error".to_string());
        let kind = envelope.error.type_.unwrap_or_default();
        let code = envelope
            .error
            .code
            .map(|code| code.to_string())
            .unwrap_or_default();
        return format!("{status}: {message} (type={kind} code={code})");
    }

    if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_maps_roles() {
        let config = HostedInvokerConfig::new("", "qwen2.5");
        let messages = vec![
            ChatMessage::system("frame"),
            ChatMessage::user("task"),
            ChatMessage::assistant("reply"),
        ];

        let request = build_request(&messages, &config);
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].role, "user");
        assert_eq!(request.messages[2].role, "assistant");
    }

    #[test]
    fn normalize_response_takes_first_choice() {
        let payload = ChatCompletionResponse {
            choices: vec![Choice {
                message: Some(AssistantMessage {
                    content: Some("USE_TOOL: close\nARGS: {}".to_string()),
                }),
            }],
        };

        let content = normalize_response(payload, "qwen2.5").expect("content");
        assert!(content.starts_with("USE_TOOL: close"));
    }

    #[test]
    fn normalize_response_rejects_empty_choices() {
        let payload = ChatCompletionResponse { choices: vec![] };
        let err = normalize_response(payload, "qwen2.5").expect_err("must fail");
        assert!(matches!(err, LlmError::Response { .. }));
    }
}
