//! Wire types for the streaming chat API.
//!
//! Each `data: ` payload is a JSON object tagged by its `event` field. All other
//! fields are optional so that partially populated events still classify.
//!
//! Request bodies and the small JSON responses of the follow-up endpoints live
//! here too.

use serde::{Deserialize, Serialize};

/// A decoded stream event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Answer fragment from a chat app.
    Message(MessageChunk),
    /// Answer fragment from an agent app.
    AgentMessage(MessageChunk),
    /// Intermediate reasoning / tool step of an agent.
    AgentThought(AgentThought),
    /// A file produced during the turn.
    MessageFile(MessageFile),
    /// End of the turn.
    MessageEnd(MessageEnd),
    /// Text-to-speech audio frame.
    TtsMessage,
    /// End of text-to-speech audio.
    TtsMessageEnd,
    /// Failure reported inside the stream.
    Error(StreamError),
    /// Keep-alive.
    Ping,
    /// Any event name this client does not know.
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Wire name of the event kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::AgentMessage(_) => "agent_message",
            Self::AgentThought(_) => "agent_thought",
            Self::MessageFile(_) => "message_file",
            Self::MessageEnd(_) => "message_end",
            Self::TtsMessage => "tts_message",
            Self::TtsMessageEnd => "tts_message_end",
            Self::Error(_) => "error",
            Self::Ping => "ping",
            Self::Unknown => "unknown",
        }
    }

    /// Conversation ID carried by the event, if any.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::Message(c) | Self::AgentMessage(c) => c.conversation_id.as_deref(),
            Self::AgentThought(t) => t.conversation_id.as_deref(),
            Self::MessageFile(f) => f.conversation_id.as_deref(),
            Self::MessageEnd(e) => e.conversation_id.as_deref(),
            Self::Error(e) => e.conversation_id.as_deref(),
            Self::TtsMessage | Self::TtsMessageEnd | Self::Ping | Self::Unknown => None,
        }
    }

    /// Task ID carried by the event, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Message(c) | Self::AgentMessage(c) => c.task_id.as_deref(),
            Self::AgentThought(t) => t.task_id.as_deref(),
            Self::MessageEnd(e) => e.task_id.as_deref(),
            Self::Error(e) => e.task_id.as_deref(),
            Self::MessageFile(_)
            | Self::TtsMessage
            | Self::TtsMessageEnd
            | Self::Ping
            | Self::Unknown => None,
        }
    }
}

/// Payload of `message` / `agent_message`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MessageChunk {
    /// The answer fragment.
    pub answer: String,
    /// Message ID.
    pub message_id: Option<String>,
    /// Alternate message ID field used by some app types.
    pub id: Option<String>,
    /// Conversation ID.
    pub conversation_id: Option<String>,
    /// Generation task ID.
    pub task_id: Option<String>,
}

/// Payload of `agent_thought`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentThought {
    /// Thought ID.
    pub id: Option<String>,
    /// Message the thought belongs to.
    pub message_id: Option<String>,
    /// Conversation ID.
    pub conversation_id: Option<String>,
    /// Generation task ID.
    pub task_id: Option<String>,
    /// 1-based position of the thought within the turn.
    pub position: Option<u32>,
    /// Reasoning text.
    pub thought: Option<String>,
    /// Tool output.
    pub observation: Option<String>,
    /// Tool name(s).
    pub tool: Option<String>,
    /// Tool input.
    pub tool_input: Option<String>,
    /// Files produced by this step, as IDs or file objects.
    pub message_files: Vec<serde_json::Value>,
}

impl AgentThought {
    /// IDs of the files produced by this step.
    #[must_use]
    pub fn file_ids(&self) -> Vec<&str> {
        self.message_files
            .iter()
            .filter_map(|file| match file {
                serde_json::Value::String(id) => Some(id.as_str()),
                serde_json::Value::Object(map) => map.get("id").and_then(serde_json::Value::as_str),
                _ => None,
            })
            .collect()
    }
}

/// Payload of `message_file`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MessageFile {
    /// File ID.
    pub id: Option<String>,
    /// File type (e.g. `image`).
    #[serde(rename = "type")]
    pub file_type: Option<String>,
    /// Who produced the file (`assistant` / `user`).
    pub belongs_to: Option<String>,
    /// Download URL.
    pub url: Option<String>,
    /// Conversation ID.
    pub conversation_id: Option<String>,
}

/// Payload of `message_end`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MessageEnd {
    /// Final message ID.
    pub message_id: Option<String>,
    /// Alternate message ID field.
    pub id: Option<String>,
    /// Conversation ID.
    pub conversation_id: Option<String>,
    /// Generation task ID.
    pub task_id: Option<String>,
    /// Authoritative full answer text, when the server supplies one.
    pub answer: Option<String>,
    /// Usage and retriever metadata, kept opaque.
    pub metadata: Option<serde_json::Value>,
}

/// Payload of `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamError {
    /// Message ID.
    pub message_id: Option<String>,
    /// Conversation ID.
    pub conversation_id: Option<String>,
    /// Generation task ID.
    pub task_id: Option<String>,
    /// HTTP-like status.
    pub status: Option<u16>,
    /// Error code.
    pub code: Option<String>,
    /// Error description.
    pub message: Option<String>,
}

/// Request body for `POST /chat-messages`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// User input.
    pub query: String,
    /// App input variables.
    pub inputs: serde_json::Map<String, serde_json::Value>,
    /// Conversation to continue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// End-user identifier.
    pub user: String,
    /// Always `streaming` for this client.
    pub response_mode: ResponseMode,
}

/// Response mode requested from the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Server-sent events.
    Streaming,
}

/// Request body for `POST /chat-messages/{task_id}/stop`.
#[derive(Debug, Clone, Serialize)]
pub struct StopRequest<'a> {
    /// End-user identifier.
    pub user: &'a str,
}

/// Error body returned by non-success responses.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiErrorResponse {
    /// Error code.
    pub code: Option<String>,
    /// Error description.
    pub message: Option<String>,
    /// Alternate description field (e.g. from the proxy).
    pub error: Option<String>,
    /// HTTP status echoed by the server.
    pub status: Option<u16>,
}

impl ApiErrorResponse {
    /// Best available description.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .filter(|m| !m.trim().is_empty())
    }
}

/// Response of the suggested-questions endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SuggestedQuestionsResponse {
    /// `success` on success.
    pub result: Option<String>,
    /// The suggestions.
    pub data: Vec<String>,
}

/// One entry of a conversation history page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryMessage {
    /// Message ID.
    pub id: String,
    /// Conversation ID.
    pub conversation_id: String,
    /// User query of the turn.
    pub query: String,
    /// Assistant answer of the turn.
    pub answer: String,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

/// A page of conversation history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryPage {
    /// Turns, oldest first.
    pub data: Vec<HistoryMessage>,
    /// Whether older turns exist.
    pub has_more: bool,
    /// Page size used by the server.
    pub limit: u32,
}
