//! # Event Interpreter
//!
//! Applies decoded stream events to a [`StreamState`] and reports what changed
//! to a [`TurnHandler`].
//!
//! Each text update carries the full accumulated text, never a bare delta.
//! Every terminal path (`message_end`, `error`, stream end, transport failure)
//! emits exactly one [`TurnEvent::Completed`].

use chrono::Utc;
use datasmith_core::FileId;
use tracing::{debug, warn};

use crate::accumulator::StreamState;
use crate::config::ThoughtSeedPolicy;
use crate::error::ChatError;
use crate::event::{AgentThought, MessageChunk, MessageEnd, MessageFile, StreamError, StreamEvent};
use crate::handler::{
    DebugInfo, FileUpdate, TextUpdate, ThoughtUpdate, TurnEnd, TurnEvent, TurnHandler, TurnOutcome,
};

/// Event kind reported on updates produced by stream end rather than an event.
const STREAM_END: &str = "stream_end";

/// Whether the turn continues after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// More events are expected.
    Continue,
    /// The turn is over; `Completed` has been emitted.
    Done(TurnOutcome),
}

/// Stateless dispatcher from stream events to turn events.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventInterpreter {
    thought_seed: ThoughtSeedPolicy,
}

impl EventInterpreter {
    /// Create an interpreter with the given thought-seed policy.
    #[must_use]
    pub const fn new(thought_seed: ThoughtSeedPolicy) -> Self {
        Self { thought_seed }
    }

    /// Parse and apply one raw `data:` payload.
    ///
    /// Malformed payloads are skipped and the turn continues.
    pub fn handle_payload(
        &self,
        payload: &str,
        state: &mut StreamState,
        handler: &mut dyn TurnHandler,
    ) -> Step {
        match serde_json::from_str::<StreamEvent>(payload) {
            Ok(event) => self.handle_event(event, state, handler),
            Err(e) => {
                let err = ChatError::Protocol(e.to_string());
                warn!(error = %err, payload_len = payload.len(), "Skipping malformed stream payload");
                Step::Continue
            }
        }
    }

    /// Apply one decoded event.
    pub fn handle_event(
        &self,
        event: StreamEvent,
        state: &mut StreamState,
        handler: &mut dyn TurnHandler,
    ) -> Step {
        if state.is_ended() {
            debug!(event = event.name(), "Ignoring event after end of turn");
            return Step::Continue;
        }
        state.observe_conversation(event.conversation_id());
        state.observe_task(event.task_id());

        let name = event.name();
        match event {
            StreamEvent::Message(chunk) | StreamEvent::AgentMessage(chunk) => {
                Self::on_message(name, &chunk, state, handler);
                Step::Continue
            }
            StreamEvent::AgentThought(thought) => {
                self.on_thought(thought, state, handler);
                Step::Continue
            }
            StreamEvent::MessageFile(file) => {
                Self::on_file(file, handler);
                Step::Continue
            }
            StreamEvent::MessageEnd(end) => Step::Done(Self::on_end(&end, state, handler)),
            StreamEvent::Error(err) => Step::Done(Self::on_error(err, state, handler)),
            StreamEvent::Ping | StreamEvent::TtsMessage | StreamEvent::TtsMessageEnd => Step::Continue,
            StreamEvent::Unknown => {
                debug!("Ignoring unknown stream event");
                Step::Continue
            }
        }
    }

    /// Close a turn whose stream ended without `message_end`.
    ///
    /// Emits the accumulated text once more, marked complete, if there is any.
    /// Must not be called after a [`Step::Done`].
    pub fn finish(&self, state: &mut StreamState, handler: &mut dyn TurnHandler) -> TurnOutcome {
        if !state.text().is_empty() {
            emit_text(STREAM_END, "", false, true, state, handler);
        }
        complete(TurnEnd::Completed, None, state, handler)
    }

    /// Close a turn that failed during the request or the stream.
    ///
    /// Any text accumulated so far is kept in the outcome.
    pub fn fail(
        &self,
        error: ChatError,
        state: &mut StreamState,
        handler: &mut dyn TurnHandler,
    ) -> TurnOutcome {
        handler.handle(TurnEvent::Failed(error.clone()));
        complete(TurnEnd::Errored, Some(error), state, handler)
    }

    /// Close a turn the user stopped.
    pub fn stopped(&self, state: &mut StreamState, handler: &mut dyn TurnHandler) -> TurnOutcome {
        complete(TurnEnd::Stopped, None, state, handler)
    }

    fn on_message(
        name: &'static str,
        chunk: &MessageChunk,
        state: &mut StreamState,
        handler: &mut dyn TurnHandler,
    ) {
        state.observe_message(chunk.message_id.as_deref().or(chunk.id.as_deref()));
        let first = state.append(&chunk.answer);
        if first {
            debug!(
                conversation_id = ?state.conversation_id(),
                message_id = ?state.message_id(),
                "First reply fragment received"
            );
        }
        let update = text_update(name, &chunk.answer, first, false, state);
        handler.handle(TurnEvent::Text(update));
    }

    fn on_thought(&self, thought: AgentThought, state: &mut StreamState, handler: &mut dyn TurnHandler) {
        let allowed = self.thought_seed == ThoughtSeedPolicy::SeedOnFirstPosition;
        state.observe_message(thought.message_id.as_deref());
        let files = thought
            .file_ids()
            .into_iter()
            .filter_map(|id| FileId::from_wire(Some(id)))
            .collect();
        let text = thought.thought.unwrap_or_default();
        if state.seed_from_thought(&text, thought.position, allowed) {
            debug!("Seeding reply text from first agent thought");
            emit_text("agent_thought", &text, true, false, state, handler);
        }

        handler.handle(TurnEvent::Thought(ThoughtUpdate {
            thought: text,
            observation: non_empty(thought.observation),
            tool: non_empty(thought.tool),
            tool_input: non_empty(thought.tool_input),
            position: thought.position,
            files,
            message_id: state.message_id().cloned(),
        }));
    }

    fn on_file(file: MessageFile, handler: &mut dyn TurnHandler) {
        handler.handle(TurnEvent::File(FileUpdate {
            id: FileId::from_wire(file.id.as_deref()),
            file_type: file.file_type,
            url: file.url,
            belongs_to: file.belongs_to,
        }));
    }

    fn on_end(end: &MessageEnd, state: &mut StreamState, handler: &mut dyn TurnHandler) -> TurnOutcome {
        state.adopt_message(end.message_id.as_deref().or(end.id.as_deref()));
        if state.reconcile(end.answer.as_deref()) {
            debug!(len = state.text().len(), "Replaced reply with final text");
        }
        debug!(
            message_id = ?state.message_id(),
            fragments = state.fragments(),
            "Reply complete"
        );
        emit_text("message_end", "", false, true, state, handler);
        complete(TurnEnd::Completed, None, state, handler)
    }

    fn on_error(err: StreamError, state: &mut StreamState, handler: &mut dyn TurnHandler) -> TurnOutcome {
        let error = ChatError::Remote {
            status: err.status,
            code: err.code,
            message: err
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "unknown error".to_string()),
        };
        warn!(error = %error, "Stream reported an error");
        handler.handle(TurnEvent::RemoteError {
            text: String::new(),
            error: error.clone(),
        });
        complete(TurnEnd::Errored, Some(error), state, handler)
    }
}

fn emit_text(
    event: &'static str,
    fragment: &str,
    is_first: bool,
    is_complete: bool,
    state: &StreamState,
    handler: &mut dyn TurnHandler,
) {
    handler.handle(TurnEvent::Text(text_update(
        event,
        fragment,
        is_first,
        is_complete,
        state,
    )));
}

fn text_update(
    event: &'static str,
    fragment: &str,
    is_first: bool,
    is_complete: bool,
    state: &StreamState,
) -> TextUpdate {
    TextUpdate {
        text: state.text().to_string(),
        is_first,
        is_complete,
        event,
        conversation_id: state.conversation_id().cloned(),
        message_id: state.message_id().cloned(),
        task_id: state.task_id().cloned(),
        debug: DebugInfo {
            fragment: fragment.to_string(),
            accumulated_len: state.text().len(),
            fragment_count: state.fragments(),
            timestamp: Utc::now(),
        },
    }
}

fn complete(
    end: TurnEnd,
    error: Option<ChatError>,
    state: &mut StreamState,
    handler: &mut dyn TurnHandler,
) -> TurnOutcome {
    state.end();
    let outcome = TurnOutcome {
        end,
        text: state.text().to_string(),
        conversation_id: state.conversation_id().cloned(),
        message_id: state.message_id().cloned(),
        task_id: state.task_id().cloned(),
        error,
    };
    handler.handle(TurnEvent::Completed(outcome.clone()));
    outcome
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
