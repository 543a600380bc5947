//! Per-record mutual exclusion.

use crate::types::RecordId;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;

/// A set of per-id locks.
///
/// Mutations of the same id are serialized; different ids never wait on
/// each other beyond the brief bookkeeping critical section. Entries are
/// removed when released, so the set only holds ids being mutated right
/// now.
#[derive(Debug, Default)]
pub struct RecordLocks {
    held: Mutex<HashSet<RecordId>>,
    released: Condvar,
}

impl RecordLocks {
    /// Creates an empty lock set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `id` is free, then holds it until the guard drops.
    pub fn lock(&self, id: &RecordId) -> RecordGuard<'_> {
        let mut held = self.held.lock();
        while held.contains(id) {
            self.released.wait(&mut held);
        }
        held.insert(id.clone());
        RecordGuard {
            locks: self,
            id: id.clone(),
        }
    }

    /// Returns the number of ids currently locked.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

/// Exclusive hold on one record id.
#[derive(Debug)]
pub struct RecordGuard<'a> {
    locks: &'a RecordLocks,
    id: RecordId,
}

impl RecordGuard<'_> {
    /// The id this guard holds.
    #[must_use]
    pub fn id(&self) -> &RecordId {
        &self.id
    }
}

impl Drop for RecordGuard<'_> {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.id);
        self.locks.released.notify_all();
    }
}
