mod anthropic;
mod hosted;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::transcript::{Message, Transcript};

pub use anthropic::{AnthropicInvoker, AnthropicInvokerConfig};
pub use hosted::{HostedInvoker, HostedInvokerConfig};

/// Wire-level role. Tool outputs travel as user turns so the model sees
/// them on its next invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message as presented to a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Project the transcript to the provider wire shape.
pub fn wire_messages(transcript: &Transcript) -> Vec<ChatMessage> {
    transcript
        .messages()
        .iter()
        .map(|message| match message {
            Message::System(text) => ChatMessage::system(text.clone()),
            Message::User(text) | Message::ToolOutput(text) => ChatMessage::user(text.clone()),
            Message::Assistant(text) => ChatMessage::assistant(text.clone()),
        })
        .collect()
}

/// Provider adapter: send an ordered message list, get one assistant reply.
/// Stateless across calls; conversation continuity lives in the agent loop.
/// Adapters never retry; a transport failure is fatal to the current run.
#[async_trait]
pub trait LlmInvoker: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}
