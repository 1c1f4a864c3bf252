//! Session errors.

use std::time::Duration;

use murmur_proto::ServiceError;
use thiserror::Error;

/// Error class, used to decide how an error is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid command or state transition. Nothing changed.
    Validation,
    /// Service call or stream failure.
    Transport,
    /// The service answered with inconsistent or missing data.
    Data,
}

/// Errors from [`SessionController`](crate::SessionController) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The command is not valid in the current state.
    #[error("{0}")]
    Validation(String),

    /// A service call failed.
    #[error("service error: {0}")]
    Transport(#[from] ServiceError),

    /// The service returned unusable data.
    #[error("bad service data: {0}")]
    Data(String),

    /// The session has not been started with a nickname.
    #[error("session not started")]
    NotInitialized,
}

impl SessionError {
    /// Validation error with `message`.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Error class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::NotInitialized => ErrorKind::Validation,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Data(_) => ErrorKind::Data,
        }
    }

    /// True if retrying the same command may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Run a unary service call, failing with [`ServiceError::Timeout`] after
/// `limit`.
pub(crate) async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, ServiceError> {
    tokio::time::timeout(limit, call).await.unwrap_or(Err(ServiceError::Timeout(limit)))
}
