//! Error types for the vault service.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vaultsync_core::CoreError;
use vaultsync_sync::SyncError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the vault service.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request contents.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request line was not a valid message.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Unknown backup id.
    #[error("backup not found: {0}")]
    BackupNotFound(String),

    /// Error from the record store, cipher or exporter.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Creates an invalid request error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Stable category name reported to clients.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::Malformed(_) => "validation",
            Self::BackupNotFound(_) => "not_found",
            Self::Core(e) => match e {
                CoreError::Validation { .. } | CoreError::InvalidKeySize { .. } => "validation",
                CoreError::NotFound { .. } => "not_found",
                CoreError::Integrity => "integrity",
                CoreError::Format { .. } => "format",
                CoreError::StorageTimeout { .. } => "storage_timeout",
                CoreError::EmptyExport { .. } => "empty_export",
                CoreError::Storage(_)
                | CoreError::Io(_)
                | CoreError::DirectoryLocked { .. }
                | CoreError::KeyMissing { .. }
                | CoreError::Codec { .. }
                | CoreError::Internal { .. } => "unexpected",
            },
            Self::Internal(_) | Self::Io(_) => "unexpected",
        }
    }

    /// Returns true if the caller sent something it should not have.
    pub fn is_client_error(&self) -> bool {
        matches!(self.category(), "validation" | "not_found" | "empty_export")
    }

    /// Returns true if the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        self.category() == "storage_timeout"
    }

    /// Returns true if this indicates a bug or an operational fault.
    pub fn is_unexpected(&self) -> bool {
        self.category() == "unexpected"
    }
}

impl From<SyncError> for ServerError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::InvalidRequest(message) => Self::InvalidRequest(message),
            SyncError::Store(e) => Self::Core(e),
        }
    }
}

/// Error as carried in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// See [`ServerError::category`].
    pub category: String,
    /// Human-readable description.
    pub message: String,
    /// Whether retrying may succeed.
    pub retryable: bool,
}

impl From<&ServerError> for ErrorBody {
    fn from(e: &ServerError) -> Self {
        Self {
            category: e.category().to_owned(),
            message: e.to_string(),
            retryable: e.is_retryable(),
        }
    }
}
