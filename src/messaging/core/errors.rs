//! Error types for the messaging core.

use thiserror::Error;

/// Messaging core error type.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// A conversation, message, or party reference does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The visibility resolver denies the requested operation for this viewer.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The conversation identity invariant would be violated, or the
    /// reassignment target already has the thread hidden.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Persistence or fan-out temporarily unavailable; safe to retry.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Message content rejected at validation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MessagingError {
    /// Build a `NotFound` error for a missing conversation.
    #[must_use]
    pub fn conversation_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("conversation {id}"))
    }

    /// Whether the caller may retry the operation verbatim.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Convenience result alias for messaging operations.
pub type MessagingResult<T> = Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = MessagingError::conversation_not_found("abc");
        assert_eq!(err.to_string(), "not found: conversation abc");
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(MessagingError::Transient("bus down".to_string()).is_retryable());
        assert!(!MessagingError::Forbidden("view only".to_string()).is_retryable());
    }
}
