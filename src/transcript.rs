//! Append-only conversation transcript.
//!
//! The transcript is the single accumulating record of a run: the framing
//! system prompt, the test instruction, raw model replies, and the textual
//! results of tool executions. Provider adapters project it to their wire
//! shape; the graph scanner reads the tool-output messages back out.

/// One transcript entry. Tool outputs are a distinct variant here even
/// though providers see them as user-role turns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    System(String),
    User(String),
    Assistant(String),
    ToolOutput(String),
}

impl Message {
    pub fn text(&self) -> &str {
        match self {
            Message::System(text)
            | Message::User(text)
            | Message::Assistant(text)
            | Message::ToolOutput(text) => text,
        }
    }
}

/// Ordered message sequence. Grows monotonically; nothing is ever rewritten.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_system(&mut self, text: impl Into<String>) {
        self.messages.push(Message::System(text.into()));
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::User(text.into()));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(Message::Assistant(text.into()));
    }

    pub fn push_tool_output(&mut self, text: impl Into<String>) {
        self.messages.push(Message::ToolOutput(text.into()));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The tool-output messages in order, as seen by the graph scanner.
    pub fn tool_outputs(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().filter_map(|message| match message {
            Message::ToolOutput(text) => Some(text.as_str()),
            _ => None,
        })
    }

    /// Full transcript rendered as one text blob for the outcome record.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for message in &self.messages {
            let tag = match message {
                Message::System(_) => "[system]",
                Message::User(_) => "[user]",
                Message::Assistant(_) => "[assistant]",
                Message::ToolOutput(_) => "[tool]",
            };
            out.push_str(tag);
            out.push('\n');
            out.push_str(message.text());
            out.push_str("\n\n");
        }
        out
    }
}
