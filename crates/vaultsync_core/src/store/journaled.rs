//! Journal-backed record store.

use super::locks::RecordLocks;
use super::{ApplyOutcome, Mutation, RecordStore};
use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::dir::DataDir;
use crate::error::{CoreError, CoreResult};
use crate::gate;
use crate::journal::{Journal, JournalEntry};
use crate::query::{result_order, run_query, SearchPage, SearchQuery};
use crate::record::{check_expiry, ChangeEntry, Record, RecordDraft};
use crate::types::{Checkpoint, RecordId, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use vaultsync_storage::{FileBackend, InMemoryBackend, JournalBackend};

/// In-memory view rebuilt from the journal.
#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<RecordId, Record>,
    /// Last version of each deleted id, so a re-created id keeps counting.
    tombstones: HashMap<RecordId, u64>,
    latest: HashMap<RecordId, ChangeEntry>,
    changes: VecDeque<ChangeEntry>,
    head: Timestamp,
    horizon: Timestamp,
}

impl StoreState {
    fn current_version(&self, id: &RecordId) -> u64 {
        self.records
            .get(id)
            .map(|r| r.version)
            .or_else(|| self.tombstones.get(id).copied())
            .unwrap_or(0)
    }

    /// Verifies that `entry` may follow the current state.
    fn check(&self, entry: &JournalEntry) -> CoreResult<()> {
        let (id, change) = match entry {
            JournalEntry::Put { record, change } => {
                if record.id != change.record_id || record.version != change.version {
                    return Err(CoreError::internal(format!(
                        "record image {}@{} does not match change {}@{}",
                        record.id, record.version, change.record_id, change.version
                    )));
                }
                (&record.id, change)
            }
            JournalEntry::Delete { record_id, change } => (record_id, change),
            JournalEntry::Prune { .. } => return Ok(()),
        };

        let current = self.current_version(id);
        if change.version != current + 1 {
            return Err(CoreError::internal(format!(
                "version of {id} would move from {current} to {}",
                change.version
            )));
        }
        if change.timestamp <= self.head {
            return Err(CoreError::internal(format!(
                "change timestamp {} is not after log head {}",
                change.timestamp, self.head
            )));
        }
        Ok(())
    }

    fn apply(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Put { record, change } => {
                self.tombstones.remove(&record.id);
                self.push_change(change);
                self.records.insert(record.id.clone(), record);
            }
            JournalEntry::Delete { record_id, change } => {
                self.records.remove(&record_id);
                self.tombstones.insert(record_id, change.version);
                self.push_change(change);
            }
            JournalEntry::Prune { horizon } => {
                while self
                    .changes
                    .front()
                    .is_some_and(|c| c.timestamp <= horizon)
                {
                    self.changes.pop_front();
                }
                self.horizon = self.horizon.max(horizon);
            }
        }
    }

    fn push_change(&mut self, change: ChangeEntry) {
        self.head = change.timestamp;
        self.latest.insert(change.record_id.clone(), change.clone());
        self.changes.push_back(change);
    }

    fn live(&self, now: Timestamp) -> impl Iterator<Item = &Record> {
        self.records.values().filter(move |r| !r.is_expired(now))
    }
}

/// A [`RecordStore`] persisted as an append-only journal.
///
/// Writes go through three locks, always in this order: the record's
/// id lock, the journal mutex (one frame at a time, which also makes
/// change timestamps strictly increasing), and finally a short write
/// lock on the in-memory state. Readers only ever take the state read
/// lock, which is never held across I/O.
pub struct JournaledStore<B> {
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    locks: RecordLocks,
    journal: Mutex<Journal<B>>,
    state: RwLock<StoreState>,
    journal_bytes: AtomicU64,
    dir: Option<DataDir>,
}

impl<B: JournalBackend> JournaledStore<B> {
    /// Opens a store over `backend`, replaying any existing journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read, or holds a
    /// sequence of mutations that violates the store's invariants.
    pub fn open(backend: B, config: StoreConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        let mut journal = Journal::new(backend);
        let entries = journal.replay()?;
        let replayed = entries.len();

        let mut state = StoreState::default();
        for entry in entries {
            if let Err(e) = state.check(&entry) {
                tracing::error!(error = %e, "journal replay hit an invalid entry");
                return Err(e);
            }
            state.apply(entry);
        }

        let bytes = journal.size()?;
        tracing::info!(
            replayed,
            records = state.records.len(),
            changes = state.changes.len(),
            bytes,
            "record store opened"
        );

        Ok(Self {
            config,
            clock,
            locks: RecordLocks::new(),
            journal: Mutex::new(journal),
            state: RwLock::new(state),
            journal_bytes: AtomicU64::new(bytes),
            dir: None,
        })
    }

    /// Forces the journal to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot sync.
    pub fn flush(&self) -> CoreResult<()> {
        self.journal.lock().sync()
    }

    /// Writes one journal frame and applies it.
    ///
    /// `make` receives the change timestamp, which is strictly after every
    /// earlier change. Returns that timestamp. Refuses with a storage
    /// timeout if the thread's [`CommitGate`](crate::gate::CommitGate)
    /// was abandoned.
    fn commit(&self, make: impl FnOnce(Timestamp) -> JournalEntry) -> CoreResult<Timestamp> {
        let mut journal = self.journal.lock();
        let ts = {
            let head = self.state.read().head;
            self.clock.now().max(head.next())
        };
        let entry = make(ts);

        if let Err(e) = self.state.read().check(&entry) {
            tracing::error!(error = %e, "refusing to commit invalid mutation");
            return Err(e);
        }
        gate::admit()?;
        journal.append(&entry)?;
        if let Ok(size) = journal.size() {
            self.journal_bytes.store(size, Ordering::Relaxed);
        }
        self.state.write().apply(entry);
        Ok(ts)
    }

    /// `put` body; the caller holds the id lock.
    fn put_locked(&self, id: RecordId, draft: RecordDraft) -> CoreResult<(Record, ChangeEntry)> {
        draft.validate()?;
        let kind = draft
            .kind
            .ok_or_else(|| CoreError::validation("kind is required"))?;

        let now = self.clock.now();
        let (base_version, previous_created) = {
            let state = self.state.read();
            match state.records.get(&id) {
                Some(r) if !r.is_expired(now) => (r.version, Some(r.created_at)),
                Some(r) => (r.version, None),
                None => (state.tombstones.get(&id).copied().unwrap_or(0), None),
            }
        };

        let created_at = draft.created_at.or(previous_created).unwrap_or(now);
        if let Some(expires_at) = draft.expires_at {
            check_expiry(created_at, expires_at)?;
        }
        let version = base_version
            .checked_add(1)
            .ok_or_else(|| CoreError::internal(format!("version of {id} overflowed")))?;

        let record = Record {
            id: id.clone(),
            kind,
            payload: draft.payload,
            session_id: draft.session_id,
            created_at,
            expires_at: draft.expires_at,
            version,
        };
        let ts = self.commit(|ts| JournalEntry::Put {
            record: record.clone(),
            change: ChangeEntry::upsert(id.clone(), version, ts),
        })?;

        tracing::debug!(%id, version, kind = %kind, "record stored");
        Ok((record, ChangeEntry::upsert(id, version, ts)))
    }

    /// `delete` body; the caller holds the id lock.
    fn delete_locked(&self, id: &RecordId) -> CoreResult<Option<ChangeEntry>> {
        let now = self.clock.now();
        let version = match self.state.read().records.get(id) {
            Some(r) if !r.is_expired(now) => r.version + 1,
            _ => return Ok(None),
        };
        let ts = self.commit(|ts| JournalEntry::Delete {
            record_id: id.clone(),
            change: ChangeEntry::delete(id.clone(), version, ts),
        })?;
        tracing::debug!(%id, version, "record deleted");
        Ok(Some(ChangeEntry::delete(id.clone(), version, ts)))
    }
}

impl JournaledStore<InMemoryBackend> {
    /// Creates an empty store that lives only in memory.
    #[must_use]
    pub fn in_memory(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            locks: RecordLocks::new(),
            journal: Mutex::new(Journal::new(InMemoryBackend::new())),
            state: RwLock::new(StoreState::default()),
            journal_bytes: AtomicU64::new(0),
            dir: None,
        }
    }
}

impl JournaledStore<FileBackend> {
    /// Opens (or creates) the store kept in `dir`.
    ///
    /// The directory stays locked until the store is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DirectoryLocked`] if another store has the
    /// directory open, or an error if the journal cannot be opened or
    /// fails replay.
    pub fn open_dir(dir: &Path, config: StoreConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        let data_dir = DataDir::open(dir)?;
        let backend = FileBackend::open_with_create_dirs(&data_dir.journal_path())?;
        let mut store = Self::open(backend, config, clock)?;
        store.dir = Some(data_dir);
        Ok(store)
    }
}

impl<B: JournalBackend> RecordStore for JournaledStore<B> {
    fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn put(&self, draft: RecordDraft) -> CoreResult<Record> {
        draft.validate()?;
        let id = draft.id.clone().unwrap_or_else(RecordId::generate);
        let _guard = self.locks.lock(&id);
        self.put_locked(id, draft).map(|(record, _)| record)
    }

    fn get(&self, id: &RecordId) -> CoreResult<Record> {
        let now = self.clock.now();
        self.state
            .read()
            .records
            .get(id)
            .filter(|r| !r.is_expired(now))
            .cloned()
            .ok_or_else(|| CoreError::not_found(id.as_str()))
    }

    fn search(&self, query: &SearchQuery) -> CoreResult<SearchPage> {
        query.validate()?;
        let now = self.clock.now();
        let state = self.state.read();
        Ok(run_query(state.records.values(), query, &self.config, now))
    }

    fn delete(&self, id: &RecordId) -> CoreResult<bool> {
        let _guard = self.locks.lock(id);
        Ok(self.delete_locked(id)?.is_some())
    }

    fn sweep_expired(&self) -> CoreResult<usize> {
        let now = self.clock.now();
        let candidates: Vec<RecordId> = self
            .state
            .read()
            .records
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.id.clone())
            .collect();

        let mut removed = 0;
        for id in candidates {
            let _guard = self.locks.lock(&id);
            let version = match self.state.read().records.get(&id) {
                Some(r) if r.is_expired(now) => r.version + 1,
                _ => continue,
            };
            self.commit(|ts| JournalEntry::Delete {
                record_id: id.clone(),
                change: ChangeEntry::delete(id.clone(), version, ts),
            })?;
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(removed, "swept expired records");
        }
        Ok(removed)
    }

    fn snapshot(&self, session_id: Option<&str>) -> Vec<Record> {
        let now = self.clock.now();
        let state = self.state.read();
        let mut records: Vec<Record> = state
            .live(now)
            .filter(|r| session_id.is_none() || r.session_id.as_deref() == session_id)
            .cloned()
            .collect();
        records.sort_by(result_order);
        records
    }

    fn changes_since(&self, checkpoint: Checkpoint) -> Vec<ChangeEntry> {
        let state = self.state.read();
        let start = state
            .changes
            .partition_point(|c| c.timestamp <= checkpoint.timestamp());
        state.changes.range(start..).cloned().collect()
    }

    fn latest_change(&self, id: &RecordId) -> Option<ChangeEntry> {
        self.state.read().latest.get(id).cloned()
    }

    fn apply_if_unchanged(
        &self,
        mutation: Mutation,
        since: Timestamp,
    ) -> CoreResult<ApplyOutcome> {
        let id = mutation.record_id()?.clone();
        let _guard = self.locks.lock(&id);

        if let Some(latest) = self.latest_change(&id) {
            if latest.timestamp > since {
                return Ok(ApplyOutcome::Superseded { latest });
            }
        }

        match mutation {
            Mutation::Upsert(draft) => {
                let (_, change) = self.put_locked(id, draft)?;
                Ok(ApplyOutcome::Applied(change))
            }
            Mutation::Delete(_) => Ok(match self.delete_locked(&id)? {
                Some(change) => ApplyOutcome::Applied(change),
                None => ApplyOutcome::Missing,
            }),
        }
    }

    fn prune_changes(&self) -> CoreResult<usize> {
        let cutoff = self.clock.now().saturating_sub(self.config.change_retention);
        let mut journal = self.journal.lock();

        let (count, horizon) = {
            let state = self.state.read();
            let count = state.changes.partition_point(|c| c.timestamp < cutoff);
            match count.checked_sub(1).and_then(|i| state.changes.get(i)) {
                Some(last) => (count, last.timestamp),
                None => return Ok(0),
            }
        };

        let entry = JournalEntry::Prune { horizon };
        gate::admit()?;
        journal.append(&entry)?;
        if let Ok(size) = journal.size() {
            self.journal_bytes.store(size, Ordering::Relaxed);
        }
        self.state.write().apply(entry);
        tracing::info!(count, %horizon, "pruned change log");
        Ok(count)
    }

    fn horizon(&self) -> Timestamp {
        self.state.read().horizon
    }

    fn head(&self) -> Timestamp {
        self.state.read().head
    }

    fn live_count(&self) -> usize {
        let now = self.clock.now();
        self.state.read().live(now).count()
    }

    fn session_count(&self) -> usize {
        let now = self.clock.now();
        let state = self.state.read();
        state
            .live(now)
            .filter_map(|r| r.session_id.as_deref())
            .collect::<HashSet<_>>()
            .len()
    }

    fn storage_used(&self) -> u64 {
        self.journal_bytes.load(Ordering::Relaxed)
    }
}

impl<B> std::fmt::Debug for JournaledStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournaledStore")
            .field("records", &self.state.read().records.len())
            .field("journal_bytes", &self.journal_bytes.load(Ordering::Relaxed))
            .field("dir", &self.dir.as_ref().map(DataDir::path))
            .finish_non_exhaustive()
    }
}
