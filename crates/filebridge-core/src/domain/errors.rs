//! Domain error types
//!
//! [`DomainError`] covers validation of domain values. [`TransferError`] is
//! the typed failure raised by every protocol transport and by the transfer
//! session; it carries a human-readable message suitable for status events.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Schedule window is malformed (start after stop, stride too short)
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Unknown protocol, direction or mode code
    #[error("Unknown {kind} code: {value}")]
    UnknownCode {
        /// What was being decoded
        kind: &'static str,
        /// The offending raw value
        value: i64,
    },

    /// A scrambled secret could not be restored
    #[error("Invalid secret: {0}")]
    InvalidSecret(String),
}

/// Errors raised by protocol transports and transfer sessions
#[derive(Debug, Error)]
pub enum TransferError {
    /// The server could not be reached or the session could not be set up
    #[error("Cannot connect to {host}: {message}")]
    Connect {
        /// Host (and port) that was dialled
        host: String,
        /// Underlying failure
        message: String,
    },

    /// The server rejected the supplied credentials
    #[error("Authentication failed for {user}: {message}")]
    Authentication {
        /// User name presented to the server
        user: String,
        /// Underlying failure
        message: String,
    },

    /// The configured remote directory does not exist
    #[error("Remote directory not found: {0}")]
    DirectoryNotFound(String),

    /// A single file could not be transferred
    #[error("Transfer of {file} failed: {message}")]
    File {
        /// File name being transferred
        file: String,
        /// Underlying failure
        message: String,
    },

    /// Listing or probing the remote directory failed
    #[error("Remote operation failed: {0}")]
    Remote(String),

    /// An operation was attempted before `connect()` succeeded
    #[error("Not connected")]
    NotConnected,

    /// The transport does not implement the requested operation
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// The operation exceeded the configured per-operation limit
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Endpoint configuration cannot be used by the transport
    #[error("Invalid endpoint configuration: {0}")]
    Configuration(String),

    /// Local filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Convenience constructor for per-file failures
    pub fn file(file: impl Into<String>, message: impl ToString) -> Self {
        TransferError::File {
            file: file.into(),
            message: message.to_string(),
        }
    }

    /// True for failures raised while establishing the session
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            TransferError::Connect { .. }
                | TransferError::Authentication { .. }
                | TransferError::DirectoryNotFound(_)
        )
    }
}
