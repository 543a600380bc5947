//! Core identifier and time types.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum accepted length of a caller-supplied record id.
pub const MAX_ID_LEN: usize = 128;

/// Stable unique identifier of a record.
///
/// Generated ids are random UUIDv4 strings; callers may also supply their
/// own. Ids order lexicographically, which is used as the tie-breaker in
/// search ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wraps a caller-supplied id.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the id is empty, too long, or
    /// contains control characters.
    pub fn parse(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CoreError::validation("record id must not be empty"));
        }
        if id.len() > MAX_ID_LEN {
            return Err(CoreError::validation(format!(
                "record id exceeds {MAX_ID_LEN} bytes"
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(CoreError::validation(
                "record id must not contain control characters",
            ));
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch.
    pub const ZERO: Self = Self(0);

    /// The latest representable instant.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Returns the wall-clock time now.
    #[must_use]
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(ms).unwrap_or(u64::MAX))
    }

    /// Returns the raw millisecond value.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Adds a duration, saturating at [`Timestamp::MAX`].
    #[must_use]
    pub fn saturating_add(self, d: Duration) -> Self {
        let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(ms))
    }

    /// Subtracts a duration, saturating at the epoch.
    #[must_use]
    pub fn saturating_sub(self, d: Duration) -> Self {
        let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_sub(ms))
    }

    /// Returns the following millisecond.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A device's position in the change log.
///
/// The change log is strictly ordered by timestamp, so a checkpoint is
/// simply the timestamp of the last change the device has consumed.
/// The server keeps no per-device state; the device presents its own.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Checkpoint(Timestamp);

impl Checkpoint {
    /// A checkpoint that has consumed nothing.
    pub const ORIGIN: Self = Self(Timestamp::ZERO);

    /// Creates a checkpoint positioned at `ts`.
    #[must_use]
    pub const fn at(ts: Timestamp) -> Self {
        Self(ts)
    }

    /// Returns the timestamp this checkpoint points at.
    #[must_use]
    pub const fn timestamp(self) -> Timestamp {
        self.0
    }
}

impl From<Timestamp> for Checkpoint {
    fn from(ts: Timestamp) -> Self {
        Self(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = RecordId::generate();
        let b = RecordId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn parse_rejects_bad_ids() {
        assert!(RecordId::parse("").is_err());
        assert!(RecordId::parse("   ").is_err());
        assert!(RecordId::parse("a\nb").is_err());
        assert!(RecordId::parse("x".repeat(MAX_ID_LEN + 1)).is_err());
        assert_eq!(RecordId::parse("member-1").unwrap().as_str(), "member-1");
    }

    #[test]
    fn timestamp_arithmetic_saturates() {
        let t = Timestamp::from_millis(1_000);
        assert_eq!(t.saturating_add(Duration::from_secs(1)).as_millis(), 2_000);
        assert_eq!(t.saturating_sub(Duration::from_secs(5)), Timestamp::ZERO);
        assert_eq!(Timestamp::MAX.next(), Timestamp::MAX);
    }

    #[test]
    fn checkpoint_serializes_as_number() {
        let cp = Checkpoint::at(Timestamp::from_millis(42));
        assert_eq!(serde_json::to_string(&cp).unwrap(), "42");
        let back: Checkpoint = serde_json::from_str("42").unwrap();
        assert_eq!(back, cp);
    }
}
