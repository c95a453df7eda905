//! Error types for MedPair.

use thiserror::Error;

/// Errors that can occur in MedPair operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// The pairing code is malformed
    #[error("invalid pairing code: {0}")]
    InvalidCode(String),

    /// No live session for the given code
    #[error("session not found or expired")]
    SessionNotFound,

    /// The pairing code expired before a connection was established
    #[error("pairing code expired")]
    CodeExpired,

    /// Connection establishment failed
    #[error("connection failed: {0}")]
    Connection(String),

    /// Relay I/O failure
    #[error("relay error: {0}")]
    Relay(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::InvalidCode("too short".into());
        assert_eq!(err.to_string(), "invalid pairing code: too short");
        assert_eq!(SyncError::CodeExpired.to_string(), "pairing code expired");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }
}
