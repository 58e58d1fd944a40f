//! Streaming chat client for conversational-AI apps.
//!
//! This crate talks to a remote chat API over server-sent events and turns the
//! token stream into display-ready replies:
//!
//! - **Decoder**: raw body bytes to `data:` payloads ([`decoder`])
//! - **Interpreter**: payloads to text, thought and file updates ([`interpreter`])
//! - **Accumulator**: the growing reply and its ids ([`accumulator`])
//! - **Session**: transcript, send/stop, suggestions and history ([`session`])
//!
//! # Architecture
//!
//! ```text
//! ChatSession::send
//!       │  POST /chat-messages (direct or via proxy)
//!       ▼
//!  ChatApi::open_stream ──► SSE decoder ──► EventInterpreter ──► TurnHandler
//!                                                 │
//!                                                 ▼
//!                                            StreamState
//! ```
//!
//! # Example
//!
//! ```
//! use datasmith_chat::{EventInterpreter, SseDecoder, SsePayload, StreamState, TurnEvent};
//!
//! let mut decoder = SseDecoder::new();
//! let mut state = StreamState::default();
//! let mut events: Vec<TurnEvent> = Vec::new();
//! let interpreter = EventInterpreter::default();
//!
//! for payload in decoder.feed(b"data: {\"event\":\"message\",\"answer\":\"Hi\"}\n\n") {
//!     if let SsePayload::Data(data) = payload {
//!         interpreter.handle_payload(&data, &mut state, &mut events);
//!     }
//! }
//! assert_eq!(state.text(), "Hi");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod accumulator;
pub mod api;
pub mod config;
pub mod decoder;
pub mod error;
pub mod event;
pub mod handler;
pub mod interpreter;
pub mod session;

pub use accumulator::StreamState;
pub use api::{ByteStream, ChatApi, HttpChatApi};
pub use config::{ChatConfig, RetryPolicy, ThoughtSeedPolicy, DEFAULT_USER};
pub use decoder::{decode_stream, SseDecoder, SsePayload};
pub use error::{ChatError, Result, TransportKind};
pub use event::{ChatRequest, HistoryMessage, HistoryPage, StreamEvent};
pub use handler::{
    DebugInfo, FileUpdate, TextUpdate, ThoughtUpdate, TurnEnd, TurnEvent, TurnHandler, TurnOutcome,
};
pub use interpreter::{EventInterpreter, Step};
pub use session::{ChatSession, Inputs, SessionState, STOPPED_MARKER};
