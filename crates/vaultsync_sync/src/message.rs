//! Sync request and response payloads.

use crate::conflict::Conflict;
use serde::{Deserialize, Serialize};
use vaultsync_core::{ChangeEntry, ChangeOperation, Checkpoint, RecordDraft, RecordId, Timestamp};

/// One change a device made while offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientChange {
    /// The record the change applies to.
    pub record_id: RecordId,
    /// Upsert or delete.
    pub operation: ChangeOperation,
    /// Device-local time of the change.
    pub timestamp: Timestamp,
    /// New record contents; required for upserts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordDraft>,
}

impl ClientChange {
    /// An upsert of `record` under `record_id`.
    #[must_use]
    pub fn upsert(record_id: RecordId, timestamp: Timestamp, record: RecordDraft) -> Self {
        Self {
            record_id,
            operation: ChangeOperation::Upsert,
            timestamp,
            record: Some(record),
        }
    }

    /// A delete of `record_id`.
    #[must_use]
    pub fn delete(record_id: RecordId, timestamp: Timestamp) -> Self {
        Self {
            record_id,
            operation: ChangeOperation::Delete,
            timestamp,
            record: None,
        }
    }
}

/// A device's sync request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Identifies the device, for logging.
    pub device_id: String,
    /// Last checkpoint the device received.
    #[serde(default)]
    pub last_checkpoint: Checkpoint,
    /// Changes made since that checkpoint, oldest first.
    #[serde(default)]
    pub changes: Vec<ClientChange>,
}

impl SyncRequest {
    /// Creates a request with no client changes.
    #[must_use]
    pub fn new(device_id: impl Into<String>, last_checkpoint: Checkpoint) -> Self {
        Self {
            device_id: device_id.into(),
            last_checkpoint,
            changes: Vec::new(),
        }
    }

    /// Appends a client change.
    #[must_use]
    pub fn with_change(mut self, change: ClientChange) -> Self {
        self.changes.push(change);
        self
    }
}

/// Result of reconciling one [`SyncRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Every change after the presented checkpoint, applied client
    /// changes included, ordered by timestamp.
    pub merged_changes: Vec<ChangeEntry>,
    /// Checkpoint to present on the next sync.
    pub new_checkpoint: Checkpoint,
    /// Client changes that met a concurrent server change.
    pub conflicts: Vec<Conflict>,
    /// Set when the checkpoint is older than the retained change log;
    /// the device must refetch everything through search.
    pub full_resync_required: bool,
}
