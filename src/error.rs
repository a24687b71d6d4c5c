//! Crate-level error type.
//!
//! Every fallible operation in the library returns [`Result`]. The variants
//! mirror how an exchange can end: the transport failed, the backend reported
//! an error inside the stream, or the user pressed stop.

use thiserror::Error;

/// Errors produced by the chat client, interpreter and controller.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The server replied with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Transport { status: u16, body: String },

    /// The request could not be sent or the body could not be read.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The in-flight request was cancelled by the user.
    #[error("request aborted")]
    Aborted,

    /// The stream carried an explicit `error` field.
    #[error("{0}")]
    Protocol(String),

    /// A payload was not valid JSON.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// An exchange is already streaming for this session.
    #[error("an answer is still streaming")]
    Busy,

    /// Configuration could not be loaded or is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// Feedback was requested for a message the backend does not know about.
    #[error("message '{0}' cannot be rated")]
    NotRateable(String),
}

impl ChatError {
    /// True for the user-initiated cancellation, which is not a failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ChatError::Aborted)
    }

    /// HTTP status code, when the error came from a non-2xx response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ChatError::Transport { status, .. } => Some(*status),
            ChatError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
