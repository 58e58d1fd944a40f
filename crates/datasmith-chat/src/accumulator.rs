//! Per-turn reply accumulation.

use datasmith_core::{ConversationId, MessageId, TaskId};

/// State of one in-flight reply.
///
/// Owned by a single request. The text only grows, with one exception: the
/// corrective replacement applied by [`StreamState::reconcile`] at `message_end`.
#[derive(Debug, Clone)]
pub struct StreamState {
    text: String,
    first_fragment: bool,
    conversation_id: Option<ConversationId>,
    message_id: Option<MessageId>,
    task_id: Option<TaskId>,
    fragments: u64,
    thoughts: u64,
    ended: bool,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new(None)
    }
}

impl StreamState {
    /// Start a turn, optionally continuing a known conversation.
    #[must_use]
    pub fn new(conversation_id: Option<ConversationId>) -> Self {
        Self {
            text: String::new(),
            first_fragment: true,
            conversation_id,
            message_id: None,
            task_id: None,
            fragments: 0,
            thoughts: 0,
            ended: false,
        }
    }

    /// Accumulated reply text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether no content-bearing event has been processed yet.
    #[must_use]
    pub const fn is_first_fragment(&self) -> bool {
        self.first_fragment
    }

    /// Conversation the reply belongs to.
    #[must_use]
    pub const fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    /// Remote ID of the reply.
    #[must_use]
    pub const fn message_id(&self) -> Option<&MessageId> {
        self.message_id.as_ref()
    }

    /// Generation task, used for stop requests.
    #[must_use]
    pub const fn task_id(&self) -> Option<&TaskId> {
        self.task_id.as_ref()
    }

    /// Number of answer fragments appended so far.
    #[must_use]
    pub const fn fragments(&self) -> u64 {
        self.fragments
    }

    /// Whether the turn has reached a terminal event.
    #[must_use]
    pub const fn is_ended(&self) -> bool {
        self.ended
    }

    /// Append an answer fragment.
    ///
    /// Returns whether this was the first content-bearing fragment.
    pub fn append(&mut self, fragment: &str) -> bool {
        let first = self.first_fragment;
        self.text.push_str(fragment);
        self.fragments += 1;
        self.first_fragment = false;
        first
    }

    /// Record an agent thought, seeding the text when allowed.
    ///
    /// Returns `true` if `thought` became the reply text. Seeding happens only
    /// for the first thought of the turn, at position 1, with no text yet.
    pub fn seed_from_thought(&mut self, thought: &str, position: Option<u32>, allowed: bool) -> bool {
        self.thoughts += 1;
        let seed = allowed
            && self.thoughts == 1
            && position == Some(1)
            && self.text.is_empty()
            && !thought.is_empty();
        if seed {
            self.text.push_str(thought);
            self.first_fragment = false;
        }
        seed
    }

    /// Apply the authoritative final text, if any.
    ///
    /// Returns `true` if the accumulated text was replaced.
    pub fn reconcile(&mut self, final_text: Option<&str>) -> bool {
        match final_text {
            Some(full) if !full.is_empty() && full != self.text => {
                self.text = full.to_string();
                self.first_fragment = false;
                true
            }
            _ => false,
        }
    }

    /// Capture a conversation ID the first time one is seen.
    pub fn observe_conversation(&mut self, id: Option<&str>) {
        if self.conversation_id.is_none() {
            self.conversation_id = ConversationId::from_wire(id);
        }
    }

    /// Capture a message ID the first time one is seen.
    pub fn observe_message(&mut self, id: Option<&str>) {
        if self.message_id.is_none() {
            self.message_id = MessageId::from_wire(id);
        }
    }

    /// Adopt the final message ID reported at `message_end`.
    pub fn adopt_message(&mut self, id: Option<&str>) {
        if let Some(id) = MessageId::from_wire(id) {
            self.message_id = Some(id);
        }
    }

    /// Capture the task ID; later non-empty values win.
    pub fn observe_task(&mut self, id: Option<&str>) {
        if let Some(id) = TaskId::from_wire(id) {
            self.task_id = Some(id);
        }
    }

    /// Mark the turn as ended. Returns `false` if it already was.
    pub fn end(&mut self) -> bool {
        !std::mem::replace(&mut self.ended, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_tracks_first_fragment() {
        let mut state = StreamState::new(None);
        assert!(state.is_first_fragment());
        assert!(state.append("Hel"));
        assert!(!state.append("lo"));
        assert_eq!(state.text(), "Hello");
        assert_eq!(state.fragments(), 2);
    }

    #[test]
    fn ids_are_captured_once() {
        let mut state = StreamState::new(None);
        state.observe_conversation(Some(""));
        assert!(state.conversation_id().is_none());

        state.observe_conversation(Some("c-1"));
        state.observe_conversation(Some("c-2"));
        assert_eq!(state.conversation_id().map(ConversationId::as_str), Some("c-1"));

        state.observe_message(Some("m-1"));
        state.observe_message(Some("m-2"));
        assert_eq!(state.message_id().map(MessageId::as_str), Some("m-1"));

        state.adopt_message(Some("m-final"));
        assert_eq!(state.message_id().map(MessageId::as_str), Some("m-final"));
        state.adopt_message(None);
        assert_eq!(state.message_id().map(MessageId::as_str), Some("m-final"));
    }

    #[test]
    fn known_conversation_is_kept() {
        let known = ConversationId::new("c-known").unwrap();
        let mut state = StreamState::new(Some(known.clone()));
        state.observe_conversation(Some("c-other"));
        assert_eq!(state.conversation_id(), Some(&known));
    }

    #[test]
    fn thought_seeds_only_first_position_one() {
        let mut state = StreamState::new(None);
        assert!(state.seed_from_thought("Thinking", Some(1), true));
        assert_eq!(state.text(), "Thinking");
        assert!(!state.is_first_fragment());

        let mut second = StreamState::new(None);
        assert!(!second.seed_from_thought("a", Some(2), true));
        assert!(!second.seed_from_thought("b", Some(1), true));
        assert!(second.text().is_empty());
    }

    #[test]
    fn thought_never_seeds_when_disallowed_or_text_present() {
        let mut state = StreamState::new(None);
        assert!(!state.seed_from_thought("Thinking", Some(1), false));
        assert!(state.text().is_empty());

        let mut with_text = StreamState::new(None);
        with_text.append("Answer");
        assert!(!with_text.seed_from_thought("Thinking", Some(1), true));
        assert_eq!(with_text.text(), "Answer");
    }

    #[test]
    fn reconcile_replaces_only_different_text() {
        let mut state = StreamState::new(None);
        state.append("Helo");
        assert!(!state.reconcile(None));
        assert!(!state.reconcile(Some("")));
        assert!(!state.reconcile(Some("Helo")));
        assert!(state.reconcile(Some("Hello")));
        assert_eq!(state.text(), "Hello");
    }

    #[test]
    fn end_is_reported_once() {
        let mut state = StreamState::new(None);
        assert!(state.end());
        assert!(!state.end());
        assert!(state.is_ended());
    }
}
