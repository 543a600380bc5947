//! Error types for VaultSync core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed or missing required input. Never retried.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// The referenced record does not exist (or has expired).
    #[error("record not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

    /// Ciphertext failed authentication.
    #[error("integrity check failed: ciphertext was tampered with or the key is wrong")]
    Integrity,

    /// Ciphertext is too short to hold a nonce and tag, or a blob is not
    /// in the expected layout.
    #[error("invalid format: {message}")]
    Format {
        /// Description of the format issue.
        message: String,
    },

    /// The durable medium did not answer in time. Retryable.
    #[error("storage timed out during {operation} after {after_ms} ms")]
    StorageTimeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout that elapsed, in milliseconds.
        after_ms: u64,
    },

    /// A backup was requested but no records matched.
    #[error("nothing to export for session {session:?}")]
    EmptyExport {
        /// The session filter that matched nothing.
        session: Option<String>,
    },

    /// Journal backend error.
    #[error("storage error: {0}")]
    Storage(#[from] vaultsync_storage::StorageError),

    /// I/O error outside the journal (key files, backup files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// Another store already holds the data directory.
    #[error("data directory {path} is locked by another process")]
    DirectoryLocked {
        /// The locked directory.
        path: String,
    },

    /// No key file where one was required.
    #[error("encryption key file {path} does not exist; create one with `vaultsync keygen`")]
    KeyMissing {
        /// The expected key file.
        path: String,
    },

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// An internal invariant was violated. Indicates a bug.
    #[error("internal invariant violated: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a format error.
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an internal invariant error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a storage timeout error.
    pub fn storage_timeout(operation: impl Into<String>, after_ms: u64) -> Self {
        Self::StorageTimeout {
            operation: operation.into(),
            after_ms,
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Returns true if the caller may retry the operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageTimeout { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::codec(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_are_retryable() {
        assert!(CoreError::storage_timeout("put", 5000).is_retryable());
        assert!(!CoreError::validation("kind is required").is_retryable());
        assert!(!CoreError::Integrity.is_retryable());
        assert!(!CoreError::internal("negative version").is_retryable());
    }

    #[test]
    fn display_carries_context() {
        let err = CoreError::storage_timeout("search", 250);
        let msg = err.to_string();
        assert!(msg.contains("search"));
        assert!(msg.contains("250"));

        let err = CoreError::EmptyExport {
            session: Some("run-7".into()),
        };
        assert!(err.to_string().contains("run-7"));
    }
}
