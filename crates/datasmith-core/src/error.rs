//! Common error types for DataSmith chat.
//!
//! This module provides the error type of the transcript model. Identifier
//! parsing has its own [`IdError`](crate::IdError).

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors for the chat data model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A finalized message was edited.
    #[error("message is finalized and can no longer change")]
    MessageFinalized,
}
