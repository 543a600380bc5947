//! Record and change-log data model.

use crate::error::{CoreError, CoreResult};
use crate::types::{RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Name of the cleartext field holding a record's origin.
pub const SOURCE_FIELD: &str = "source";

/// Discriminator for stored entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// A scraped member profile.
    Member,
    /// A scraping run.
    Session,
    /// A backup catalogue entry.
    Backup,
}

impl RecordKind {
    /// Returns the wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Session => "session",
            Self::Backup => "backup",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Self::Member),
            "session" => Ok(Self::Session),
            "backup" => Ok(Self::Backup),
            other => Err(CoreError::validation(format!("unknown record kind: {other}"))),
        }
    }
}

/// Encrypted body plus the cleartext subset used for indexing.
///
/// Search never decrypts; it only looks at `fields`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Opaque ciphertext produced by a [`crate::Cipher`].
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// Indexable cleartext metadata.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Payload {
    /// Creates a payload from ciphertext with no indexable fields.
    #[must_use]
    pub fn new(ciphertext: Vec<u8>) -> Self {
        Self {
            ciphertext,
            fields: BTreeMap::new(),
        }
    }

    /// Adds an indexable cleartext field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// A stored, versioned entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Stable unique id.
    pub id: RecordId,
    /// Entity discriminator.
    pub kind: RecordKind,
    /// Ciphertext and indexable metadata.
    pub payload: Payload,
    /// Grouping key for records created in one scraping run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Expiry time; `None` means the record never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
    /// Incremented on every mutation, starting at 1.
    pub version: u64,
}

impl Record {
    /// Returns true if the record is logically deleted at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Returns the record's `source` field, if any.
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.payload.fields.get(SOURCE_FIELD).map(String::as_str)
    }
}

/// Input to a store `put`.
///
/// Absent `id` and `created_at` are filled in by the store; `kind` is
/// optional here only so that a missing kind can be rejected as a
/// validation error rather than at deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    /// Existing id to update, or `None` to create.
    #[serde(default)]
    pub id: Option<RecordId>,
    /// Entity discriminator. Required.
    #[serde(default)]
    pub kind: Option<RecordKind>,
    /// Ciphertext and indexable metadata.
    #[serde(default)]
    pub payload: Payload,
    /// Grouping key.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Creation time override.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// Expiry time.
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
}

impl RecordDraft {
    /// Creates a draft for a new record of `kind`.
    #[must_use]
    pub fn new(kind: RecordKind, payload: Payload) -> Self {
        Self {
            kind: Some(kind),
            payload,
            ..Self::default()
        }
    }

    /// Targets an existing (or explicitly named) id.
    #[must_use]
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the session id.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the creation time.
    #[must_use]
    pub fn with_created_at(mut self, at: Timestamp) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Sets the expiry time.
    #[must_use]
    pub fn with_expires_at(mut self, at: Timestamp) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Checks the rules that hold for a draft on its own.
    ///
    /// The store repeats the expiry check once it knows the effective
    /// creation time of an update.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for a missing kind, a blank
    /// session id, or an explicit `expires_at` not after `created_at`.
    pub fn validate(&self) -> CoreResult<()> {
        if self.kind.is_none() {
            return Err(CoreError::validation("kind is required"));
        }
        if self
            .session_id
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            return Err(CoreError::validation("sessionId must not be blank"));
        }
        if let (Some(created_at), Some(expires_at)) = (self.created_at, self.expires_at) {
            check_expiry(created_at, expires_at)?;
        }
        Ok(())
    }

    /// Like [`validate`](Self::validate), and also rejects a draft that
    /// would already be expired if stored at `now` without a creation
    /// time.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] as described above.
    pub fn validate_at(&self, now: Timestamp) -> CoreResult<()> {
        self.validate()?;
        match (self.created_at, self.expires_at) {
            (None, Some(expires_at)) => check_expiry(now, expires_at),
            _ => Ok(()),
        }
    }
}

/// Fails unless `expires_at` is strictly after `created_at`.
pub(crate) fn check_expiry(created_at: Timestamp, expires_at: Timestamp) -> CoreResult<()> {
    if expires_at <= created_at {
        return Err(CoreError::validation(format!(
            "expiresAt ({expires_at}) must be after createdAt ({created_at})"
        )));
    }
    Ok(())
}

/// Kind of mutation recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    /// Record created or updated.
    Upsert,
    /// Record deleted (explicitly or by expiry).
    Delete,
}

/// One mutation in the append-only change log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    /// The mutated record.
    pub record_id: RecordId,
    /// Record version after the mutation.
    pub version: u64,
    /// What happened.
    pub operation: ChangeOperation,
    /// When it was committed. Strictly increasing across the log.
    pub timestamp: Timestamp,
}

impl ChangeEntry {
    /// Creates an upsert entry.
    #[must_use]
    pub fn upsert(record_id: RecordId, version: u64, timestamp: Timestamp) -> Self {
        Self {
            record_id,
            version,
            operation: ChangeOperation::Upsert,
            timestamp,
        }
    }

    /// Creates a delete entry.
    #[must_use]
    pub fn delete(record_id: RecordId, version: u64, timestamp: Timestamp) -> Self {
        Self {
            record_id,
            version,
            operation: ChangeOperation::Delete,
            timestamp,
        }
    }
}

/// Serde adapter encoding bytes as standard base64 text.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes bytes as a base64 string.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Deserializes a base64 string into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_at: Option<u64>) -> Record {
        Record {
            id: RecordId::parse("r1").unwrap(),
            kind: RecordKind::Member,
            payload: Payload::new(vec![1, 2, 3]).with_field("source", "linkedin"),
            session_id: None,
            created_at: Timestamp::from_millis(100),
            expires_at: expires_at.map(Timestamp::from_millis),
            version: 1,
        }
    }

    #[test]
    fn expiry_is_inclusive_of_deadline() {
        let r = record(Some(200));
        assert!(!r.is_expired(Timestamp::from_millis(199)));
        assert!(r.is_expired(Timestamp::from_millis(200)));
        assert!(!record(None).is_expired(Timestamp::MAX));
    }

    #[test]
    fn kind_parses_wire_names() {
        assert_eq!("session".parse::<RecordKind>().unwrap(), RecordKind::Session);
        assert!("profile".parse::<RecordKind>().is_err());
    }

    #[test]
    fn draft_validation_needs_no_store() {
        let draft = RecordDraft::new(RecordKind::Member, Payload::new(vec![1]));
        assert!(draft.validate().is_ok());

        let at = Timestamp::from_millis(500);
        let same = draft.clone().with_created_at(at).with_expires_at(at);
        assert!(matches!(same.validate(), Err(CoreError::Validation { .. })));
        let blank = draft.clone().with_session("  ");
        assert!(matches!(blank.validate(), Err(CoreError::Validation { .. })));
        let kindless = RecordDraft {
            kind: None,
            ..draft.clone()
        };
        assert!(kindless.validate().is_err());

        let expires_only = draft.with_expires_at(at);
        assert!(expires_only.validate().is_ok());
        assert!(expires_only.validate_at(Timestamp::from_millis(499)).is_ok());
        assert!(expires_only.validate_at(at).is_err());
    }

    #[test]
    fn ciphertext_is_base64_in_json() {
        let json = serde_json::to_value(record(None)).unwrap();
        assert_eq!(json["payload"]["ciphertext"], "AQID");
        assert_eq!(json["createdAt"], 100);
        assert!(json.get("expiresAt").is_none());
        assert_eq!(record(None).source(), Some("linkedin"));
    }
}
