//! Events reported to the caller while a turn runs.
//!
//! A turn reports through a [`TurnHandler`]. Every turn ends with exactly one
//! [`TurnEvent::Completed`], whatever happened before it.

use chrono::{DateTime, Utc};
use datasmith_core::{ConversationId, FileId, MessageId, TaskId};
use tokio::sync::mpsc;

use crate::error::ChatError;

/// Debug counters attached to text updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    /// The fragment that produced this update (empty for final updates).
    pub fragment: String,
    /// Length of the accumulated text in bytes.
    pub accumulated_len: usize,
    /// Number of fragments appended so far.
    pub fragment_count: u64,
    /// When the update was produced.
    pub timestamp: DateTime<Utc>,
}

impl DebugInfo {
    /// Timestamp in RFC 3339 form.
    #[must_use]
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339()
    }
}

/// The full reply text so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUpdate {
    /// Accumulated text, not just the latest delta.
    pub text: String,
    /// Whether this is the first text emission of the turn.
    pub is_first: bool,
    /// Whether this is the final emission.
    pub is_complete: bool,
    /// Wire name of the event that produced the update.
    pub event: &'static str,
    /// Conversation ID, once known.
    pub conversation_id: Option<ConversationId>,
    /// Message ID, once known.
    pub message_id: Option<MessageId>,
    /// Task ID, once known. Needed to stop generation.
    pub task_id: Option<TaskId>,
    /// Counters for diagnostics.
    pub debug: DebugInfo,
}

/// An agent reasoning step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThoughtUpdate {
    /// Reasoning text.
    pub thought: String,
    /// Tool output.
    pub observation: Option<String>,
    /// Tool name(s).
    pub tool: Option<String>,
    /// Tool input.
    pub tool_input: Option<String>,
    /// Position within the turn.
    pub position: Option<u32>,
    /// Files produced by the step.
    pub files: Vec<FileId>,
    /// Message the thought belongs to.
    pub message_id: Option<MessageId>,
}

/// A generated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate {
    /// File ID.
    pub id: Option<FileId>,
    /// File type (e.g. `image`).
    pub file_type: Option<String>,
    /// Download URL.
    pub url: Option<String>,
    /// Producer of the file.
    pub belongs_to: Option<String>,
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnEnd {
    /// The reply finished normally, with or without `message_end`.
    Completed,
    /// The user stopped generation.
    Stopped,
    /// The turn failed.
    Errored,
}

/// Final result of a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Terminal kind.
    pub end: TurnEnd,
    /// Whatever text had accumulated.
    pub text: String,
    /// Conversation ID, once known.
    pub conversation_id: Option<ConversationId>,
    /// Message ID, once known.
    pub message_id: Option<MessageId>,
    /// Task ID, once known.
    pub task_id: Option<TaskId>,
    /// The failure, for errored turns.
    pub error: Option<ChatError>,
}

impl TurnOutcome {
    /// An errored outcome with no content.
    #[must_use]
    pub const fn failed(error: ChatError) -> Self {
        Self {
            end: TurnEnd::Errored,
            text: String::new(),
            conversation_id: None,
            message_id: None,
            task_id: None,
            error: Some(error),
        }
    }

    /// Check if the turn completed normally.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.end == TurnEnd::Completed
    }
}

/// Something that happened during a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// The reply text changed.
    Text(TextUpdate),
    /// An agent reasoning step.
    Thought(ThoughtUpdate),
    /// A generated file.
    File(FileUpdate),
    /// The server reported an `error` event. The text is always empty.
    RemoteError {
        /// Always empty.
        text: String,
        /// The reported failure.
        error: ChatError,
    },
    /// The request failed before or during the stream.
    Failed(ChatError),
    /// The turn is over. Always the last event.
    Completed(TurnOutcome),
}

impl TurnEvent {
    /// Check if this is the terminal event.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Receives the events of a turn.
pub trait TurnHandler: Send {
    /// Handle one event.
    fn handle(&mut self, event: TurnEvent);
}

impl<F> TurnHandler for F
where
    F: FnMut(TurnEvent) + Send,
{
    fn handle(&mut self, event: TurnEvent) {
        self(event);
    }
}

impl TurnHandler for Vec<TurnEvent> {
    fn handle(&mut self, event: TurnEvent) {
        self.push(event);
    }
}

impl TurnHandler for mpsc::UnboundedSender<TurnEvent> {
    fn handle(&mut self, event: TurnEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_handler_receives_events() {
        let mut seen = 0;
        {
            let mut handler = |event: TurnEvent| {
                if event.is_completed() {
                    seen += 1;
                }
            };
            handler.handle(TurnEvent::Completed(TurnOutcome::failed(ChatError::Busy)));
        }
        assert_eq!(seen, 1);
    }

    #[test]
    fn vec_handler_collects() {
        let mut events: Vec<TurnEvent> = Vec::new();
        events.handle(TurnEvent::Failed(ChatError::Busy));
        events.handle(TurnEvent::Completed(TurnOutcome::failed(ChatError::Busy)));
        assert_eq!(events.len(), 2);
        assert!(events[1].is_completed());
    }

    #[tokio::test]
    async fn channel_handler_forwards_and_ignores_closed_receiver() {
        let (mut tx, mut rx) = mpsc::unbounded_channel();
        tx.handle(TurnEvent::Failed(ChatError::Busy));
        assert_eq!(rx.recv().await, Some(TurnEvent::Failed(ChatError::Busy)));

        drop(rx);
        tx.handle(TurnEvent::Failed(ChatError::Busy));
    }

    #[test]
    fn failed_outcome_is_errored() {
        let outcome = TurnOutcome::failed(ChatError::Configuration("missing".into()));
        assert_eq!(outcome.end, TurnEnd::Errored);
        assert!(!outcome.is_completed());
        assert!(outcome.text.is_empty());
    }
}
