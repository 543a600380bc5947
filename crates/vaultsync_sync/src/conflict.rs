//! Conflict descriptors and resolution policies.

use crate::message::ClientChange;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use vaultsync_core::{ChangeEntry, RecordId, Timestamp};

/// Why a client change conflicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// The server changed the record after the device's checkpoint.
    ConcurrentUpdate,
    /// The client deleted a record the server does not have.
    MissingRecord,
}

/// What happened to a conflicting client change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// The server's version stands; the client change was not applied.
    ServerKept,
    /// The client change was applied over the server's version.
    ClientApplied,
    /// Nothing was applied; a user has to decide.
    Unresolved,
}

/// A conflicting client change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// The contested record.
    pub record_id: RecordId,
    /// The change the device sent.
    pub client_change: ClientChange,
    /// Server's latest version of the record, if it ever existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<u64>,
    /// Timestamp of the server's latest change to the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<Timestamp>,
    /// Why the change conflicted.
    pub reason: ConflictReason,
    /// How it was resolved.
    pub resolution: ConflictResolution,
}

impl Conflict {
    /// A client change that met a newer server change.
    #[must_use]
    pub fn concurrent(
        client_change: ClientChange,
        server: &ChangeEntry,
        resolution: ConflictResolution,
    ) -> Self {
        Self {
            record_id: client_change.record_id.clone(),
            client_change,
            server_version: Some(server.version),
            server_timestamp: Some(server.timestamp),
            reason: ConflictReason::ConcurrentUpdate,
            resolution,
        }
    }

    /// A client delete of a record the server does not hold.
    #[must_use]
    pub fn missing(client_change: ClientChange, server: Option<&ChangeEntry>) -> Self {
        Self {
            record_id: client_change.record_id.clone(),
            client_change,
            server_version: server.map(|c| c.version),
            server_timestamp: server.map(|c| c.timestamp),
            reason: ConflictReason::MissingRecord,
            resolution: ConflictResolution::ServerKept,
        }
    }

    /// Returns true if the client change was applied anyway.
    pub fn was_applied(&self) -> bool {
        self.resolution == ConflictResolution::ClientApplied
    }
}

/// Policy for resolving concurrent updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Server always wins.
    #[default]
    ServerWins,
    /// Client always wins.
    ClientWins,
    /// The change with the later timestamp wins; ties go to the server.
    LastWriteWins,
    /// Never apply; report for manual resolution.
    Manual,
}

impl ConflictPolicy {
    /// Returns true if this policy resolves conflicts without a user.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, Self::Manual)
    }

    /// Decides whether `client` overrides the newer server change `server`.
    pub fn client_overrides(&self, client: &ClientChange, server: &ChangeEntry) -> bool {
        match self {
            Self::ServerWins | Self::Manual => false,
            Self::ClientWins => true,
            Self::LastWriteWins => client.timestamp > server.timestamp,
        }
    }

    /// Resolution recorded when the server's version is kept.
    pub fn kept_resolution(&self) -> ConflictResolution {
        match self {
            Self::Manual => ConflictResolution::Unresolved,
            _ => ConflictResolution::ServerKept,
        }
    }

    /// Wire name of the policy.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ServerWins => "server_wins",
            Self::ClientWins => "client_wins",
            Self::LastWriteWins => "last_write_wins",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "server_wins" => Ok(Self::ServerWins),
            "client_wins" => Ok(Self::ClientWins),
            "last_write_wins" => Ok(Self::LastWriteWins),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_change(ts: u64) -> ChangeEntry {
        ChangeEntry::upsert(
            RecordId::parse("x").unwrap(),
            4,
            Timestamp::from_millis(ts),
        )
    }

    fn client_change(ts: u64) -> ClientChange {
        ClientChange::delete(RecordId::parse("x").unwrap(), Timestamp::from_millis(ts))
    }

    #[test]
    fn policies_decide_overrides() {
        let server = server_change(100);
        assert!(!ConflictPolicy::ServerWins.client_overrides(&client_change(200), &server));
        assert!(ConflictPolicy::ClientWins.client_overrides(&client_change(1), &server));
        assert!(ConflictPolicy::LastWriteWins.client_overrides(&client_change(101), &server));
        assert!(!ConflictPolicy::LastWriteWins.client_overrides(&client_change(100), &server));
        assert!(!ConflictPolicy::Manual.client_overrides(&client_change(200), &server));
    }

    #[test]
    fn manual_leaves_conflicts_unresolved() {
        assert!(!ConflictPolicy::Manual.auto_resolves());
        assert_eq!(
            ConflictPolicy::Manual.kept_resolution(),
            ConflictResolution::Unresolved
        );
        assert_eq!(
            ConflictPolicy::LastWriteWins.kept_resolution(),
            ConflictResolution::ServerKept
        );
    }

    #[test]
    fn policy_parses_both_spellings() {
        assert_eq!(
            "last-write-wins".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::LastWriteWins
        );
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::ServerWins);
        assert!("coin_flip".parse::<ConflictPolicy>().is_err());
    }

    #[test]
    fn conflict_wire_shape() {
        let conflict = Conflict::concurrent(
            client_change(50),
            &server_change(100),
            ConflictResolution::ServerKept,
        );
        let json = serde_json::to_value(&conflict).unwrap();
        assert_eq!(json["recordId"], "x");
        assert_eq!(json["serverVersion"], 4);
        assert_eq!(json["reason"], "concurrent_update");
        assert_eq!(json["resolution"], "server_kept");
        assert_eq!(json["clientChange"]["operation"], "delete");
        assert!(!conflict.was_applied());
    }
}
