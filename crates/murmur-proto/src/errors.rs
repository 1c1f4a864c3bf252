//! Errors reported by service transports.

use std::time::Duration;

use thiserror::Error;

/// Failure of a unary call or of the chat stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The underlying transport failed (connection refused, reset, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The chat stream is closed and cannot carry more events.
    #[error("chat stream closed")]
    StreamClosed,

    /// The service understood the request and refused it.
    #[error("rejected by service: {0}")]
    Rejected(String),

    /// The referenced room or user does not exist on the service.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ServiceError {
    /// Returns true if retrying the same call later may succeed.
    ///
    /// Rejections and missing entities are answers from the service, not
    /// connectivity problems, so they are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_) | Self::StreamClosed)
    }
}
