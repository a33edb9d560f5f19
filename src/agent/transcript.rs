//! The visible conversation
//!
//! Durable messages are append-only. The transient placeholder shown while
//! a model call or an execution is outstanding lives beside them and is
//! never counted as part of the transcript.

use serde::{Deserialize, Serialize};

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    Assistant,
}

/// What an assistant message reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    PlainText,
    CodeResult,
    Error,
    TransientStatus,
}

/// One turn in the transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "author", rename_all = "snake_case")]
pub enum ChatMessage {
    User {
        text: String,
    },
    Assistant {
        kind: MessageKind,
        text: String,
        /// The generated code this message is about, as shown to the user
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        ChatMessage::User { text: text.into() }
    }

    pub fn assistant(kind: MessageKind, text: impl Into<String>, code: Option<String>) -> Self {
        ChatMessage::Assistant {
            kind,
            text: text.into(),
            code,
        }
    }

    pub fn author(&self) -> Author {
        match self {
            ChatMessage::User { .. } => Author::User,
            ChatMessage::Assistant { .. } => Author::Assistant,
        }
    }

    /// Message kind; user messages have none
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            ChatMessage::User { .. } => None,
            ChatMessage::Assistant { kind, .. } => Some(*kind),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            ChatMessage::User { text } | ChatMessage::Assistant { text, .. } => text,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ChatMessage::User { .. } => None,
            ChatMessage::Assistant { code, .. } => code.as_deref(),
        }
    }
}

/// Indicator for an operation that is still outstanding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Placeholder {
    /// Waiting for the model; `attempt` is 0 for the first try
    Generating { attempt: u32 },
    /// Waiting for the execution channel
    Executing { code: String },
}

impl Placeholder {
    /// Render as a transient status message
    pub fn to_message(&self) -> ChatMessage {
        match self {
            Placeholder::Generating { attempt: 0 } => {
                ChatMessage::assistant(MessageKind::TransientStatus, "Generating code...", None)
            }
            Placeholder::Generating { attempt } => ChatMessage::assistant(
                MessageKind::TransientStatus,
                format!("Generating a fix (retry #{attempt})..."),
                None,
            ),
            Placeholder::Executing { code } => ChatMessage::assistant(
                MessageKind::TransientStatus,
                "Executing code...",
                Some(code.clone()),
            ),
        }
    }
}

/// Durable messages plus at most one transient placeholder
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    placeholder: Option<Placeholder>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub(crate) fn show(&mut self, placeholder: Placeholder) {
        self.placeholder = Some(placeholder);
    }

    pub(crate) fn clear_placeholder(&mut self) {
        self.placeholder = None;
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
        self.placeholder = None;
    }

    /// Durable messages, oldest first
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn placeholder(&self) -> Option<&Placeholder> {
        self.placeholder.as_ref()
    }

    /// Number of durable messages; the placeholder is not counted
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Everything a viewer should render, placeholder last
    pub fn visible(&self) -> Vec<ChatMessage> {
        let mut visible = self.messages.clone();
        visible.extend(self.placeholder.as_ref().map(Placeholder::to_message));
        visible
    }
}
