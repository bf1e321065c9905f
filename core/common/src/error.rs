//! Common error types for Fieldbook.

use thiserror::Error;

/// Top-level error type for Fieldbook operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote API could not be reached.
    #[error("Offline: {0}")]
    Offline(String),

    /// The remote API answered with an error status.
    #[error("Rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Any other remote failure (malformed response, protocol error).
    #[error("Unexpected remote error: {0}")]
    Unexpected(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The owning task was cancelled before the operation completed.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Whether this error came from talking to the remote API.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Error::Offline(_) | Error::Rejected { .. } | Error::Unexpected(_)
        )
    }

    /// Whether the remote API was unreachable.
    pub fn is_offline(&self) -> bool {
        matches!(self, Error::Offline(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
