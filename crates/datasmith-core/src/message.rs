//! Chat transcript messages.
//!
//! A [`ChatMessage`] is created when the user submits input or when the first
//! fragment of a reply arrives. Its content is rewritten in place while the reply
//! streams, and it becomes immutable once [`ChatMessage::finalize`] is called.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::ids::{FileId, LocalMessageId, MessageId};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The person typing into the widget.
    User,
    /// The remote conversational agent.
    Assistant,
}

impl Role {
    /// Wire/display name of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Answer text.
    Text,
    /// An intermediate reasoning step of an agent.
    Thought,
    /// A generated file announcement.
    File,
}

/// Identifier attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "source", content = "id", rename_all = "snake_case")]
pub enum MessageRef {
    /// Created locally (user input, synthesized notices).
    Local(LocalMessageId),
    /// Assigned by the remote API.
    Remote(MessageId),
    /// An assistant message whose remote ID is not known yet.
    Pending,
}

/// Agent metadata attached to thought and file messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Reasoning trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    /// Name of the tool the agent invoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Raw tool input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<String>,
    /// Tool observation / output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    /// Files referenced by this step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileId>,
}

impl MessageMetadata {
    /// Returns `true` if no field is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.thought.is_none()
            && self.tool.is_none()
            && self.tool_input.is_none()
            && self.observation.is_none()
            && self.files.is_empty()
    }
}

/// A single entry in a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message identifier.
    pub id: MessageRef,
    /// Author.
    pub role: Role,
    /// Payload kind.
    pub kind: MessageKind,
    content: String,
    /// Optional agent metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    finalized: bool,
    /// When the message was created locally.
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a finalized user message with a fresh local ID.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageRef::Local(LocalMessageId::generate()),
            role: Role::User,
            kind: MessageKind::Text,
            content: content.into(),
            metadata: None,
            finalized: true,
            created_at: Utc::now(),
        }
    }

    /// Create an assistant message that is still being streamed.
    #[must_use]
    pub fn assistant(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: MessageRef::Pending,
            role: Role::Assistant,
            kind,
            content: content.into(),
            metadata: None,
            finalized: false,
            created_at: Utc::now(),
        }
    }

    /// Attach metadata, builder style.
    #[must_use]
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        if !metadata.is_empty() {
            self.metadata = Some(metadata);
        }
        self
    }

    /// Current text content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Whether the message has been finalized.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Check if this is a user message.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// Replace the content of a message that is still streaming.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MessageFinalized`] once the message is finalized.
    pub fn set_content(&mut self, content: impl Into<String>) -> Result<()> {
        if self.finalized {
            return Err(CoreError::MessageFinalized);
        }
        self.content = content.into();
        Ok(())
    }

    /// Append text to a message, even one that is finalized.
    ///
    /// Used for locally synthesized markers such as `[stopped]`, which are the
    /// only edits permitted after finalization.
    pub fn append_marker(&mut self, marker: &str) {
        if !self.content.is_empty() && !self.content.ends_with(char::is_whitespace) {
            self.content.push(' ');
        }
        self.content.push_str(marker);
    }

    /// Record the remote ID once the API reports it.
    ///
    /// Local IDs are never overwritten.
    pub fn assign_remote_id(&mut self, id: MessageId) {
        if !matches!(self.id, MessageRef::Local(_)) {
            self.id = MessageRef::Remote(id);
        }
    }

    /// Remote ID, if known.
    #[must_use]
    pub fn remote_id(&self) -> Option<&MessageId> {
        match &self.id {
            MessageRef::Remote(id) => Some(id),
            MessageRef::Local(_) | MessageRef::Pending => None,
        }
    }

    /// Freeze the message.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }
}
