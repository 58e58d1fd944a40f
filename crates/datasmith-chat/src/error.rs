//! Error types for the streaming chat client.
//!
//! Every failure the client can observe is classified into one of a handful of
//! categories. Only [`ChatError::Configuration`] is fatal for the session; the
//! others end (at most) the current turn.

use std::error::Error as _;
use std::io;

use thiserror::Error;

/// A result type using `ChatError`.
pub type Result<T> = std::result::Result<T, ChatError>;

/// Broad cause of a transport failure, for user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// No response (or no next chunk) within the configured ceiling.
    Timeout,
    /// The peer reset the connection mid-stream.
    ConnectionReset,
    /// The connection could not be established.
    ConnectionRefused,
    /// The request was aborted locally.
    Aborted,
    /// Any other network failure.
    Other,
}

impl TransportKind {
    /// Human-readable category.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "request timed out",
            Self::ConnectionReset => "connection reset",
            Self::ConnectionRefused => "connection refused",
            Self::Aborted => "request aborted",
            Self::Other => "network error",
        }
    }
}

/// Errors that can occur while talking to the conversational-AI API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// API credentials or endpoint are missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The network failed before or during the stream.
    #[error("{}: {message}", .kind.as_str())]
    Transport {
        /// What kind of failure this was.
        kind: TransportKind,
        /// Underlying error text.
        message: String,
    },

    /// A single payload could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server rejected the request or reported a failure in the stream.
    #[error("remote error{}: {message}", status_suffix(*.status))]
    Remote {
        /// HTTP status, when the failure came from a non-success response.
        status: Option<u16>,
        /// Server-provided error code, if any.
        code: Option<String>,
        /// Server-provided detail.
        message: String,
    },

    /// An optional follow-up call (stop, suggestions) failed.
    #[error("best-effort request failed: {0}")]
    BestEffort(String),

    /// A turn is already in flight for this session.
    #[error("a reply is still being generated")]
    Busy,
}

impl ChatError {
    /// Build a transport error.
    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Returns `true` if the same request might succeed when retried.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport { kind, .. } => !matches!(kind, TransportKind::Aborted),
            Self::Remote { status, .. } => matches!(status, Some(429 | 500..=599)),
            Self::BestEffort(_) | Self::Busy => true,
            Self::Configuration(_) | Self::Protocol(_) => false,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else {
            io_kind(&err).unwrap_or(if err.is_connect() {
                TransportKind::ConnectionRefused
            } else {
                TransportKind::Other
            })
        };
        Self::transport(kind, err.to_string())
    }
}

fn status_suffix(status: Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// Walk the source chain looking for an I/O error we can classify.
fn io_kind(err: &reqwest::Error) -> Option<TransportKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return match io_err.kind() {
                io::ErrorKind::TimedOut => Some(TransportKind::Timeout),
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof => Some(TransportKind::ConnectionReset),
                io::ErrorKind::ConnectionRefused => Some(TransportKind::ConnectionRefused),
                io::ErrorKind::ConnectionAborted | io::ErrorKind::Interrupted => {
                    Some(TransportKind::Aborted)
                }
                _ => None,
            };
        }
        source = cause.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display_uses_category() {
        let err = ChatError::transport(TransportKind::Timeout, "no response after 60s");
        assert_eq!(err.to_string(), "request timed out: no response after 60s");
    }

    #[test]
    fn remote_error_display_includes_status() {
        let err = ChatError::Remote {
            status: Some(401),
            code: Some("unauthorized".to_string()),
            message: "Access token is invalid".to_string(),
        };
        assert_eq!(err.to_string(), "remote error (401): Access token is invalid");

        let in_stream = ChatError::Remote {
            status: None,
            code: None,
            message: "model overloaded".to_string(),
        };
        assert_eq!(in_stream.to_string(), "remote error: model overloaded");
    }

    #[test]
    fn chat_error_retriable() {
        assert!(ChatError::transport(TransportKind::ConnectionReset, "x").is_retriable());
        assert!(!ChatError::transport(TransportKind::Aborted, "x").is_retriable());
        assert!(ChatError::Remote {
            status: Some(503),
            code: None,
            message: String::new()
        }
        .is_retriable());
        assert!(!ChatError::Remote {
            status: Some(400),
            code: None,
            message: String::new()
        }
        .is_retriable());
        assert!(!ChatError::Configuration("missing key".into()).is_retriable());
    }
}
