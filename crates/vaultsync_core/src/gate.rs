//! Abandoning store work whose caller has stopped waiting.
//!
//! A caller that runs a store operation on another thread with a deadline
//! creates a [`CommitGate`] and enters it on that thread. Before writing
//! its first journal frame the store passes through the gate; after the
//! caller [abandons](CommitGate::abandon) it, the store refuses to write.
//! Exactly one of the two wins, so a caller told "timed out" knows that
//! nothing was committed.

use crate::error::{CoreError, CoreResult};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const OPEN: u8 = 0;
const COMMITTED: u8 = 1;
const ABANDONED: u8 = 2;

thread_local! {
    static CURRENT: RefCell<Option<Arc<CommitGate>>> = const { RefCell::new(None) };
}

/// Decides, once, between "the operation writes" and "the caller gave up".
#[derive(Debug)]
pub struct CommitGate {
    state: AtomicU8,
    operation: &'static str,
    after_ms: u64,
}

impl CommitGate {
    /// Creates an open gate for `operation` bounded by `after_ms`.
    pub fn new(operation: &'static str, after_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(OPEN),
            operation,
            after_ms,
        })
    }

    /// Makes this gate the current one for the calling thread until the
    /// returned guard drops.
    pub fn enter(self: &Arc<Self>) -> GateScope {
        let previous = CURRENT.with(|c| c.replace(Some(Arc::clone(self))));
        GateScope { previous }
    }

    /// Marks the operation as abandoned.
    ///
    /// Returns false if the operation already started committing; the
    /// caller must then wait for its result.
    pub fn abandon(&self) -> bool {
        match self
            .state
            .compare_exchange(OPEN, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(state) => state == ABANDONED,
        }
    }

    /// Returns true once the gate was passed by a commit.
    pub fn committed(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMMITTED
    }

    fn pass(&self) -> CoreResult<()> {
        match self
            .state
            .compare_exchange(OPEN, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(COMMITTED) => Ok(()),
            Err(_) => Err(CoreError::storage_timeout(self.operation, self.after_ms)),
        }
    }
}

/// Restores the previously current gate when dropped.
#[derive(Debug)]
pub struct GateScope {
    previous: Option<Arc<CommitGate>>,
}

impl Drop for GateScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|c| *c.borrow_mut() = previous);
    }
}

/// Passes the calling thread's gate, if any. Writers call this right
/// before making a change visible; the store does so under its journal
/// mutex.
///
/// # Errors
///
/// Returns [`CoreError::StorageTimeout`] if the gate was abandoned.
pub fn admit() -> CoreResult<()> {
    CURRENT.with(|c| match c.borrow().as_ref() {
        Some(gate) => gate.pass(),
        None => Ok(()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_gate_always_admits() {
        assert!(admit().is_ok());
    }

    #[test]
    fn abandoned_gate_refuses_commit() {
        let gate = CommitGate::new("put", 50);
        let _scope = gate.enter();
        assert!(gate.abandon());

        let err = admit().unwrap_err();
        assert!(err.is_retryable());
        assert!(!gate.committed());
    }

    #[test]
    fn committed_gate_cannot_be_abandoned() {
        let gate = CommitGate::new("put", 50);
        {
            let _scope = gate.enter();
            admit().unwrap();
            admit().unwrap();
        }
        assert!(gate.committed());
        assert!(!gate.abandon());
        assert!(admit().is_ok());
    }
}
