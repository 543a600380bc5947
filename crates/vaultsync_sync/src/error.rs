//! Error types for sync reconciliation.

use thiserror::Error;
use vaultsync_core::CoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while reconciling a sync request.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The request was rejected before anything was applied.
    #[error("invalid sync request: {0}")]
    InvalidRequest(String),

    /// The record store failed while applying a change.
    #[error(transparent)]
    Store(#[from] CoreError),
}

impl SyncError {
    /// Creates an invalid request error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidRequest(_) => false,
            Self::Store(e) => e.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(!SyncError::invalid("no device").is_retryable());
        assert!(SyncError::from(CoreError::storage_timeout("sync", 5_000)).is_retryable());
        assert!(!SyncError::from(CoreError::not_found("x")).is_retryable());
    }

    #[test]
    fn store_errors_display_transparently() {
        let err = SyncError::from(CoreError::not_found("r1"));
        assert_eq!(err.to_string(), "record not found: r1");
    }
}
