//! # Chat Session Controller
//!
//! [`ChatSession`] owns the transcript and conversation across turns and runs
//! each turn through the decoder and interpreter.
//!
//! ## Turn lifecycle
//!
//! ```text
//! Idle → Sending → Streaming { first_message: true } → Streaming { first_message: false }*
//!      → Completed | Stopped | Errored → Idle
//! ```
//!
//! Only one turn runs at a time; a second [`ChatSession::send`] while a turn
//! is in flight fails with [`ChatError::Busy`]. [`ChatSession::stop`] can be
//! called concurrently with `send` (both take `&self`).

use std::sync::Arc;

use datasmith_core::{
    ChatMessage, ConversationId, FileId, MessageId, MessageKind, MessageMetadata, TaskId,
};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use crate::accumulator::StreamState;
use crate::api::{ByteStream, ChatApi, HttpChatApi};
use crate::config::{ChatConfig, RetryPolicy};
use crate::decoder::{decode_stream, SsePayload};
use crate::error::{ChatError, Result};
use crate::event::{ChatRequest, HistoryPage, ResponseMode};
use crate::handler::{FileUpdate, TextUpdate, ThoughtUpdate, TurnEnd, TurnEvent, TurnHandler, TurnOutcome};
use crate::interpreter::{EventInterpreter, Step};

/// Marker appended to the last reply when a stop request fails.
pub const STOPPED_MARKER: &str = "[stopped]";

/// App input variables sent with a query.
pub type Inputs = serde_json::Map<String, serde_json::Value>;

/// Where the session is in its turn lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No turn in flight.
    Idle,
    /// Request sent, no reply text yet.
    Sending,
    /// Reply text is arriving.
    Streaming {
        /// Whether only the first text update has been seen so far.
        first_message: bool,
    },
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    conversation_id: Option<ConversationId>,
    messages: Vec<ChatMessage>,
    /// Number of the latest turn.
    turn: u64,
    /// The turn currently accepting events; `None` once stopped or finished.
    active: Option<u64>,
    /// Index in `messages` of the reply being streamed.
    reply_index: Option<usize>,
    task_id: Option<TaskId>,
    last_task_id: Option<TaskId>,
    cancel: Option<Arc<Notify>>,
    /// Number of resets; transcript indices are only valid within one.
    resets: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            conversation_id: None,
            messages: Vec::new(),
            turn: 0,
            active: None,
            reply_index: None,
            task_id: None,
            last_task_id: None,
            cancel: None,
            resets: 0,
        }
    }

    fn begin(&mut self, query: &str) -> Result<(u64, Arc<Notify>)> {
        if self.state != SessionState::Idle {
            return Err(ChatError::Busy);
        }
        self.turn += 1;
        let cancel = Arc::new(Notify::new());
        self.state = SessionState::Sending;
        self.active = Some(self.turn);
        self.reply_index = None;
        self.task_id = None;
        self.cancel = Some(Arc::clone(&cancel));
        self.messages.push(ChatMessage::user(query));
        Ok((self.turn, cancel))
    }

    fn note_task(&mut self, task_id: Option<&TaskId>) {
        if let Some(task_id) = task_id {
            if self.task_id.as_ref() != Some(task_id) {
                debug!(task_id = %task_id, "Learned generation task");
                self.task_id = Some(task_id.clone());
            }
        }
    }

    fn record_text(&mut self, update: &TextUpdate) {
        if self.conversation_id.is_none() {
            self.conversation_id.clone_from(&update.conversation_id);
        }
        self.note_task(update.task_id.as_ref());

        let existing = self.reply_index.and_then(|i| self.messages.get_mut(i));
        if let Some(reply) = existing {
            if let Err(e) = reply.set_content(update.text.as_str()) {
                debug!(error = %e, "Reply already finalized");
            }
            if let Some(id) = &update.message_id {
                reply.assign_remote_id(id.clone());
            }
            self.state = SessionState::Streaming {
                first_message: false,
            };
        } else {
            let mut reply = ChatMessage::assistant(MessageKind::Text, update.text.as_str());
            if let Some(id) = &update.message_id {
                reply.assign_remote_id(id.clone());
            }
            self.messages.push(reply);
            self.reply_index = Some(self.messages.len() - 1);
            self.state = SessionState::Streaming {
                first_message: true,
            };
        }
    }

    fn record_thought(&mut self, update: &ThoughtUpdate) {
        let metadata = MessageMetadata {
            thought: Some(update.thought.clone()).filter(|t| !t.is_empty()),
            tool: update.tool.clone(),
            tool_input: update.tool_input.clone(),
            observation: update.observation.clone(),
            files: update.files.clone(),
        };
        let mut thought =
            ChatMessage::assistant(MessageKind::Thought, update.thought.as_str()).with_metadata(metadata);
        if let Some(id) = &update.message_id {
            thought.assign_remote_id(id.clone());
        }
        thought.finalize();
        self.messages.push(thought);
    }

    fn record_file(&mut self, update: &FileUpdate) {
        let metadata = MessageMetadata {
            files: update.id.iter().cloned().collect::<Vec<FileId>>(),
            ..MessageMetadata::default()
        };
        let mut file = ChatMessage::assistant(MessageKind::File, update.url.clone().unwrap_or_default())
            .with_metadata(metadata);
        file.finalize();
        self.messages.push(file);
    }

    fn finalize_reply(&mut self, message_id: Option<&MessageId>) {
        let Some(reply) = self.reply_index.take().and_then(|i| self.messages.get_mut(i)) else {
            return;
        };
        if let Some(id) = message_id {
            reply.assign_remote_id(id.clone());
        }
        reply.finalize();
    }

    fn complete(&mut self, turn: u64, live: bool, outcome: &TurnOutcome) {
        if self.turn != turn {
            return;
        }
        if live {
            self.finalize_reply(outcome.message_id.as_ref());
            if outcome.conversation_id.is_some() {
                self.conversation_id.clone_from(&outcome.conversation_id);
            }
        }
        if outcome.task_id.is_some() {
            self.last_task_id.clone_from(&outcome.task_id);
        }
        self.state = SessionState::Idle;
        self.active = None;
        self.task_id = None;
        self.cancel = None;
    }

    /// Mark a stopped turn whose stop request failed.
    ///
    /// `reply` is the index of that turn's reply; without one a marker
    /// message is added instead.
    fn mark_stopped(&mut self, resets: u64, reply: Option<usize>) {
        if self.resets != resets {
            return;
        }
        match reply.and_then(|i| self.messages.get_mut(i)) {
            Some(reply) => reply.append_marker(STOPPED_MARKER),
            None => {
                let mut marker = ChatMessage::assistant(MessageKind::Text, STOPPED_MARKER);
                marker.finalize();
                self.messages.push(marker);
            }
        }
    }
}

/// Records turn events in the session and forwards them to the caller.
///
/// Events of a turn that was stopped or reset are not recorded or forwarded,
/// except the final `Completed`.
struct Recorder<'a> {
    inner: &'a Mutex<Inner>,
    turn: u64,
    handler: &'a mut dyn TurnHandler,
    stopped: bool,
}

impl TurnHandler for Recorder<'_> {
    fn handle(&mut self, mut event: TurnEvent) {
        {
            let mut inner = self.inner.lock();
            let live = inner.active == Some(self.turn);
            if !live {
                self.stopped = true;
            }
            match &mut event {
                TurnEvent::Completed(outcome) => {
                    if self.stopped && outcome.end == TurnEnd::Completed {
                        outcome.end = TurnEnd::Stopped;
                    }
                    inner.complete(self.turn, live, outcome);
                }
                _ if !live => {
                    debug!(turn = self.turn, "Ignoring event after stop");
                    return;
                }
                TurnEvent::Text(update) => inner.record_text(update),
                TurnEvent::Thought(update) => inner.record_thought(update),
                TurnEvent::File(update) => inner.record_file(update),
                TurnEvent::RemoteError { .. } | TurnEvent::Failed(_) => {}
            }
        }
        self.handler.handle(event);
    }
}

/// A conversation with the chat API.
///
/// # Example
///
/// ```no_run
/// use datasmith_chat::{ChatConfig, ChatSession, TurnEvent};
///
/// # async fn run() -> datasmith_chat::Result<()> {
/// let session = ChatSession::new(ChatConfig::from_env())?;
/// let outcome = session
///     .send("What can RPA automate?", Default::default(), &mut |event: TurnEvent| {
///         if let TurnEvent::Text(update) = event {
///             println!("{}", update.text);
///         }
///     })
///     .await;
/// println!("finished: {:?}", outcome.end);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ChatSession<A = HttpChatApi> {
    api: A,
    config: ChatConfig,
    interpreter: EventInterpreter,
    inner: Mutex<Inner>,
}

impl ChatSession<HttpChatApi> {
    /// Create a session talking HTTP to the configured API.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Configuration`] if the configuration is incomplete.
    pub fn new(config: ChatConfig) -> Result<Self> {
        let api = HttpChatApi::new(&config)?;
        Ok(Self::with_api(config, api))
    }
}

impl<A: ChatApi> ChatSession<A> {
    /// Create a session over any [`ChatApi`].
    ///
    /// The configuration is validated on each send.
    pub fn with_api(config: ChatConfig, api: A) -> Self {
        Self {
            interpreter: EventInterpreter::new(config.thought_seed),
            api,
            config,
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Continue an existing conversation, builder style.
    #[must_use]
    pub fn with_conversation(self, conversation_id: ConversationId) -> Self {
        self.inner.lock().conversation_id = Some(conversation_id);
        self
    }

    /// Get the session configuration.
    pub const fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Get the underlying API client.
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Whether a turn is in flight.
    pub fn is_loading(&self) -> bool {
        self.state() != SessionState::Idle
    }

    /// Conversation the next turn continues, if any.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.inner.lock().conversation_id.clone()
    }

    /// Snapshot of the transcript.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().messages.clone()
    }

    /// Task of the most recent finished turn.
    pub fn last_task_id(&self) -> Option<TaskId> {
        self.inner.lock().last_task_id.clone()
    }

    /// Send a query in the current conversation.
    ///
    /// Never fails: configuration problems, transport failures and remote
    /// errors are reported to `handler` and in the returned outcome.
    pub async fn send(&self, query: &str, inputs: Inputs, handler: &mut dyn TurnHandler) -> TurnOutcome {
        let conversation_id = self.conversation_id();
        self.send_in(query, conversation_id, inputs, handler).await
    }

    /// Send a query in an explicit conversation (`None` starts a new one).
    #[instrument(skip_all)]
    pub async fn send_in(
        &self,
        query: &str,
        conversation_id: Option<ConversationId>,
        inputs: Inputs,
        handler: &mut dyn TurnHandler,
    ) -> TurnOutcome {
        if let Err(e) = self.config.validate() {
            return reject(e, handler);
        }
        let begun = self.inner.lock().begin(query);
        let (turn, cancel) = match begun {
            Ok(started) => started,
            Err(e) => return reject(e, handler),
        };
        debug!(turn, conversation_id = ?conversation_id, "Sending chat turn");

        let request = ChatRequest {
            query: query.to_string(),
            inputs,
            conversation_id: conversation_id.as_ref().map(|c| c.as_str().to_string()),
            user: self.config.user.clone(),
            response_mode: ResponseMode::Streaming,
        };
        let mut state = StreamState::new(conversation_id);
        let mut recorder = Recorder {
            inner: &self.inner,
            turn,
            handler,
            stopped: false,
        };

        let opened = tokio::select! {
            biased;
            () = cancel.notified() => None,
            result = self.api.open_stream(&request) => Some(result),
        };
        let mut outcome = match opened {
            None => self.interpreter.stopped(&mut state, &mut recorder),
            Some(Err(e)) => {
                warn!(error = %e, "Chat request failed");
                self.interpreter.fail(e, &mut state, &mut recorder)
            }
            Some(Ok(body)) => self.pump(body, &cancel, &mut state, &mut recorder).await,
        };
        if recorder.stopped && outcome.end == TurnEnd::Completed {
            outcome.end = TurnEnd::Stopped;
        }
        debug!(turn, end = ?outcome.end, len = outcome.text.len(), "Chat turn finished");
        outcome
    }

    /// Feed the body through the decoder and interpreter until the turn ends.
    async fn pump(
        &self,
        body: ByteStream,
        cancel: &Notify,
        state: &mut StreamState,
        recorder: &mut Recorder<'_>,
    ) -> TurnOutcome {
        let payloads = decode_stream(body);
        futures::pin_mut!(payloads);

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.notified() => return self.interpreter.stopped(state, recorder),
                next = payloads.next() => next,
            };
            if self.inner.lock().active != Some(recorder.turn) {
                return self.interpreter.stopped(state, recorder);
            }
            match next {
                Some(Ok(SsePayload::Data(data))) => {
                    let step = self.interpreter.handle_payload(&data, state, recorder);
                    if let Step::Done(outcome) = step {
                        return outcome;
                    }
                    let mut inner = self.inner.lock();
                    if inner.active == Some(recorder.turn) {
                        inner.note_task(state.task_id());
                    }
                }
                Some(Ok(SsePayload::Done)) | None => return self.interpreter.finish(state, recorder),
                Some(Err(e)) => {
                    warn!(error = %e, len = state.text().len(), "Chat stream failed");
                    return self.interpreter.fail(e, state, recorder);
                }
            }
        }
    }

    /// Stop the turn in flight.
    ///
    /// Best-effort. Loading state clears immediately and later events of the
    /// turn are ignored. If the stop request fails, [`STOPPED_MARKER`] is
    /// appended to the stopped turn's reply, or added as its own message when
    /// no reply text had arrived. With no known task this only clears state.
    #[instrument(skip_all)]
    pub async fn stop(&self) {
        let (task_id, cancel, reply, resets) = {
            let mut inner = self.inner.lock();
            let task_id = inner.task_id.take();
            let cancel = inner.cancel.take();
            let reply = inner.reply_index;
            inner.active = None;
            inner.finalize_reply(None);
            inner.state = SessionState::Idle;
            (task_id, cancel, reply, inner.resets)
        };
        if let Some(cancel) = cancel {
            cancel.notify_one();
        }

        let Some(task_id) = task_id else {
            debug!("No active generation task to stop");
            return;
        };
        match self.api.stop(&task_id, &self.config.user).await {
            Ok(()) => info!(task_id = %task_id, "Generation stopped"),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Stop request failed");
                self.inner.lock().mark_stopped(resets, reply);
            }
        }
    }

    /// Fetch follow-up suggestions for a finished message.
    ///
    /// Failures and malformed responses yield an empty list.
    pub async fn fetch_suggested_questions(&self, message_id: &MessageId) -> Vec<String> {
        match self.api.suggested_questions(message_id, &self.config.user).await {
            Ok(questions) => questions,
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "Suggested questions unavailable");
                Vec::new()
            }
        }
    }

    /// Fetch suggestions, retrying while the result is empty or failed.
    ///
    /// The endpoint may not be ready right after the stream completes.
    pub async fn fetch_suggested_questions_with_retry(
        &self,
        message_id: &MessageId,
        policy: RetryPolicy,
    ) -> Vec<String> {
        let attempts = policy.max_attempts();
        for attempt in 1..=attempts {
            match self.api.suggested_questions(message_id, &self.config.user).await {
                Ok(questions) if !questions.is_empty() => return questions,
                Ok(_) => {}
                Err(e) if !e.is_retriable() => {
                    warn!(message_id = %message_id, error = %e, "Suggested questions unavailable");
                    return Vec::new();
                }
                Err(e) => debug!(attempt, error = %e, "Suggestion request failed"),
            }
            if attempt < attempts {
                debug!(attempt, delay_ms = policy.delay_ms, "No suggestions yet, retrying");
                tokio::time::sleep(policy.delay()).await;
            }
        }
        Vec::new()
    }

    /// Fetch recent history of the current conversation.
    ///
    /// Returns an empty page when no conversation has started.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the request fails.
    pub async fn conversation_history(&self, limit: u32) -> Result<HistoryPage> {
        self.config.validate()?;
        let Some(conversation_id) = self.conversation_id() else {
            return Ok(HistoryPage::default());
        };
        self.api
            .conversation_messages(&conversation_id, &self.config.user, limit)
            .await
    }

    /// Forget the transcript and conversation.
    ///
    /// A turn still in flight is detached: its remaining events are ignored.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if let Some(cancel) = inner.cancel.take() {
            cancel.notify_one();
        }
        let turn = inner.turn + 1;
        let resets = inner.resets + 1;
        *inner = Inner::new();
        inner.turn = turn;
        inner.resets = resets;
    }
}

/// Report a turn that failed before it started.
fn reject(error: ChatError, handler: &mut dyn TurnHandler) -> TurnOutcome {
    warn!(error = %error, "Chat turn rejected");
    handler.handle(TurnEvent::Failed(error.clone()));
    let outcome = TurnOutcome::failed(error);
    handler.handle(TurnEvent::Completed(outcome.clone()));
    outcome
}
