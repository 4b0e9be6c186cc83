//! Error types for recall-core

use thiserror::Error;

/// Result type alias using recall-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in recall-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local store rejected a write (quota exceeded, storage disabled, ...)
    #[error("Local storage unavailable, progress may not be saved: {0}")]
    StorageUnavailable(String),

    /// Remote persistence service error
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Failure talking to the remote persistence service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Request did not complete or the service could not handle it right now.
    /// Safe to retry.
    #[error("Remote request failed: {0}")]
    Transient(String),

    /// Service refused the payload; retrying the same payload cannot succeed.
    #[error("Remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Whether a later attempt with the same payload could succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_unavailable_message_mentions_progress() {
        let error = Error::StorageUnavailable("quota exceeded".to_string());
        assert!(error.to_string().contains("progress may not be saved"));
    }

    #[test]
    fn only_transient_remote_errors_are_retryable() {
        assert!(RemoteError::transient("timeout").is_retryable());
        assert!(!RemoteError::rejected(422, "bad payload").is_retryable());
    }
}
