//! Core types for DataSmith chat.
//!
//! This crate provides the data model shared by the streaming chat client and
//! its front ends:
//!
//! - **Identifiers**: Strongly-typed IDs for conversations, messages, tasks and files
//! - **Messages**: The [`ChatMessage`] transcript entry and its metadata
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use datasmith_core::{ChatMessage, ConversationId, MessageKind};
//!
//! let conversation = ConversationId::new("9f1c4b52").unwrap();
//! assert_eq!(conversation.as_str(), "9f1c4b52");
//!
//! let mut reply = ChatMessage::assistant(MessageKind::Text, "Hel");
//! reply.set_content("Hello").unwrap();
//! reply.finalize();
//! assert!(reply.set_content("changed").is_err());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod message;

pub use error::{CoreError, Result};
pub use ids::{ConversationId, FileId, IdError, LocalMessageId, MessageId, TaskId};
pub use message::{ChatMessage, MessageKind, MessageMetadata, MessageRef, Role};
