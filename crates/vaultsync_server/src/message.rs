//! Wire messages.
//!
//! Requests and responses are JSON objects tagged by `op`:
//!
//! ```text
//! {"op":"storeMember","fields":{"name":"Ada","source":"linkedin"},"ttlSeconds":3600}
//! {"op":"stored","id":"9b1d...","version":1,"expiresAt":1700000003600000}
//! ```

use crate::error::{ErrorBody, ServerError};
use crate::stats::StatsSnapshot;
use crate::vault::BackupInfo;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use vaultsync_core::{
    base64_bytes, ExportFormat, Record, RecordId, SearchPage, SearchQuery, Timestamp,
};
use vaultsync_sync::{SyncRequest, SyncResponse};

/// Body of `storeMember` and `storeSession`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreRecordRequest {
    /// Id to update; a new id is generated when absent.
    pub id: Option<String>,
    /// Scraping session the record belongs to. Required for sessions.
    pub session_id: Option<String>,
    /// Lifetime in seconds; the record never expires when absent.
    pub ttl_seconds: Option<u64>,
    /// Record contents. Encrypted as a whole; indexed fields are also
    /// kept in cleartext.
    pub fields: Map<String, Value>,
}

impl StoreRecordRequest {
    /// A request storing `fields`.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    /// Stores under `id`.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attaches the record to `session_id`.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Expires the record `seconds` after it is stored.
    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.ttl_seconds = Some(seconds);
        self
    }
}

/// Body of `getRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRecordRequest {
    /// Record to fetch.
    pub id: String,
    /// Also return the decrypted fields.
    #[serde(default)]
    pub decrypt: bool,
}

/// Body of `deleteRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRecordRequest {
    /// Record to delete.
    pub id: String,
}

/// Body of `createBackup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBackupRequest {
    /// Restrict the backup to one session.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Encoding of the backup.
    pub format: ExportFormat,
}

/// Body of `getBackup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBackupRequest {
    /// Backup to fetch.
    pub backup_id: String,
}

/// A client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    /// Store a scraped member profile.
    StoreMember(StoreRecordRequest),
    /// Store a scraping session record.
    StoreSession(StoreRecordRequest),
    /// Fetch one record.
    GetRecord(GetRecordRequest),
    /// Delete one record.
    DeleteRecord(DeleteRecordRequest),
    /// Search member records.
    SearchMembers(SearchQuery),
    /// Reconcile a device's changes.
    SyncData(SyncRequest),
    /// Export a backup.
    CreateBackup(CreateBackupRequest),
    /// Fetch a stored backup.
    GetBackup(GetBackupRequest),
    /// Service statistics.
    Stats,
    /// Remove expired records now.
    Sweep,
}

impl Request {
    /// Wire name of the operation, for logs.
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::StoreMember(_) => "storeMember",
            Self::StoreSession(_) => "storeSession",
            Self::GetRecord(_) => "getRecord",
            Self::DeleteRecord(_) => "deleteRecord",
            Self::SearchMembers(_) => "searchMembers",
            Self::SyncData(_) => "syncData",
            Self::CreateBackup(_) => "createBackup",
            Self::GetBackup(_) => "getBackup",
            Self::Stats => "stats",
            Self::Sweep => "sweep",
        }
    }
}

/// Result of storing a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// The record's id.
    pub id: RecordId,
    /// Version after the write.
    pub version: u64,
    /// Expiry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
}

/// Result of `getRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    /// The stored record, payload still sealed.
    pub record: Record,
    /// Decrypted fields, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Map<String, Value>>,
}

/// Result of `deleteRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    /// The id that was deleted.
    pub id: RecordId,
    /// False if the record was absent or already expired.
    pub deleted: bool,
}

/// Result of `getBackup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPayload {
    /// Backup metadata.
    pub info: BackupInfo,
    /// The blob, base64 encoded.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Result of `sweep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Expired records removed.
    pub removed: usize,
    /// Change-log entries pruned past the retention window.
    pub pruned: usize,
}

/// A server response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Response {
    /// A record was stored.
    Stored(StoredRecord),
    /// A fetched record.
    Record(RecordView),
    /// A delete finished.
    Deleted(DeleteResult),
    /// One page of search results.
    SearchResults(SearchPage),
    /// A reconciled sync.
    SyncResult(SyncResponse),
    /// A backup was created.
    BackupCreated(BackupInfo),
    /// A fetched backup.
    Backup(BackupPayload),
    /// Service statistics.
    Stats(StatsSnapshot),
    /// A sweep finished.
    Swept(SweepReport),
    /// The request failed.
    Error(ErrorBody),
}

impl Response {
    /// Builds the error response for `err`.
    pub fn error(err: &ServerError) -> Self {
        Self::Error(ErrorBody::from(err))
    }

    /// Returns true for [`Response::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Error category, if this is an error.
    pub fn error_category(&self) -> Option<&str> {
        match self {
            Self::Error(body) => Some(&body.category),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_are_tagged_by_op() {
        let request: Request = serde_json::from_value(json!({
            "op": "storeMember",
            "fields": {"name": "Ada"},
            "sessionId": "run-1",
            "ttlSeconds": 60
        }))
        .unwrap();
        let Request::StoreMember(body) = request else {
            panic!("wrong variant");
        };
        assert_eq!(body.session_id.as_deref(), Some("run-1"));
        assert_eq!(body.ttl_seconds, Some(60));

        let stats: Request = serde_json::from_str(r#"{"op":"stats"}"#).unwrap();
        assert_eq!(stats, Request::Stats);
        assert_eq!(stats.op_name(), "stats");
    }

    #[test]
    fn search_request_uses_query_fields() {
        let request: Request = serde_json::from_value(json!({
            "op": "searchMembers",
            "freeText": "rust",
            "limit": 100,
            "offset": 200
        }))
        .unwrap();
        let Request::SearchMembers(query) = request else {
            panic!("wrong variant");
        };
        assert_eq!(query.free_text.as_deref(), Some("rust"));
        assert_eq!(query.limit, Some(100));
        assert_eq!(query.offset, 200);
    }

    #[test]
    fn unknown_op_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"dropAll"}"#).is_err());
    }

    #[test]
    fn error_response_shape() {
        let response = Response::error(&ServerError::invalid("limit must be at least 1"));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["op"], "error");
        assert_eq!(json["category"], "validation");
        assert_eq!(json["retryable"], false);
        assert_eq!(response.error_category(), Some("validation"));
    }
}
