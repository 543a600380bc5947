//! The record store contract and its journal-backed implementation.

mod journaled;
mod locks;

pub use crate::dir::JOURNAL_FILE;
pub use journaled::JournaledStore;
pub use locks::{RecordGuard, RecordLocks};

use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::query::{SearchPage, SearchQuery};
use crate::record::{ChangeEntry, Record, RecordDraft};
use crate::types::{Checkpoint, RecordId, Timestamp};

/// A mutation arriving from outside the store, e.g. from a sync client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create or update; the draft must name its id.
    Upsert(RecordDraft),
    /// Delete the given id.
    Delete(RecordId),
}

impl Mutation {
    /// The id this mutation targets.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an upsert without an id.
    pub fn record_id(&self) -> CoreResult<&RecordId> {
        match self {
            Self::Upsert(draft) => draft
                .id
                .as_ref()
                .ok_or_else(|| CoreError::validation("upsert must name a record id")),
            Self::Delete(id) => Ok(id),
        }
    }
}

/// Result of [`RecordStore::apply_if_unchanged`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The mutation was committed with this change entry.
    Applied(ChangeEntry),
    /// The record changed after the guard timestamp; nothing was applied.
    Superseded {
        /// The store's latest change for the record.
        latest: ChangeEntry,
    },
    /// A delete targeted a record that is absent or expired.
    Missing,
}

/// Durable keyed storage of records with expiry, search and a change log.
///
/// Every mutating operation appends exactly one [`ChangeEntry`], atomically
/// with the mutation itself. Mutations of the same id are serialized;
/// reads observe a consistent snapshot and never wait on storage I/O.
///
/// Expired records are logically deleted: `get`, `search`, counts and
/// snapshots all skip them, even before the sweep removes them.
pub trait RecordStore: Send + Sync {
    /// The store's configuration.
    fn config(&self) -> &StoreConfig;

    /// The store's notion of the current time.
    fn now(&self) -> Timestamp;

    /// Creates or updates a record.
    ///
    /// Assigns an id and `createdAt` when absent and bumps the version
    /// (1 for new records).
    ///
    /// # Errors
    ///
    /// Returns a validation error if `kind` is missing or
    /// `expiresAt <= createdAt`.
    fn put(&self, draft: RecordDraft) -> CoreResult<Record>;

    /// Fetches a live record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the id is absent or expired.
    fn get(&self, id: &RecordId) -> CoreResult<Record>;

    /// Runs a filtered, paginated query.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed query.
    fn search(&self, query: &SearchQuery) -> CoreResult<SearchPage>;

    /// Deletes a record. Returns false if absent or already expired.
    fn delete(&self, id: &RecordId) -> CoreResult<bool>;

    /// Removes every expired record and returns how many were removed.
    fn sweep_expired(&self) -> CoreResult<usize>;

    /// Live records, optionally restricted to one session, in search order.
    fn snapshot(&self, session_id: Option<&str>) -> Vec<Record>;

    /// Change entries strictly after `checkpoint`, oldest first.
    fn changes_since(&self, checkpoint: Checkpoint) -> Vec<ChangeEntry>;

    /// The most recent change entry for `id`, if the store has seen one.
    fn latest_change(&self, id: &RecordId) -> Option<ChangeEntry>;

    /// Applies `mutation` only if the record's latest change is not newer
    /// than `since`. The check and the write happen under the record's
    /// lock.
    fn apply_if_unchanged(&self, mutation: Mutation, since: Timestamp)
        -> CoreResult<ApplyOutcome>;

    /// Drops change entries older than the retention window. Returns how
    /// many were dropped.
    fn prune_changes(&self) -> CoreResult<usize>;

    /// Timestamp of the newest pruned change entry (zero if none).
    ///
    /// Checkpoints older than this cannot be served incrementally.
    fn horizon(&self) -> Timestamp;

    /// Timestamp of the newest change entry (zero if none).
    fn head(&self) -> Timestamp;

    /// Number of live records.
    fn live_count(&self) -> usize;

    /// Number of distinct session ids among live records.
    fn session_count(&self) -> usize;

    /// Bytes used by the durable medium. Never blocks on writers.
    fn storage_used(&self) -> u64;
}
