//! Error types for journal storage.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in a journal backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to truncate past the end of the log.
    #[error("cannot truncate to {requested} bytes, log is only {size} bytes")]
    TruncateBeyondEnd {
        /// The requested size.
        requested: u64,
        /// The current log size.
        size: u64,
    },
}
