//! Checkpoint-based reconciliation.

use crate::conflict::{Conflict, ConflictPolicy, ConflictResolution};
use crate::error::{SyncError, SyncResult};
use crate::message::{ClientChange, SyncRequest, SyncResponse};
use std::collections::HashMap;
use vaultsync_core::{
    ApplyOutcome, ChangeOperation, Checkpoint, Mutation, RecordId, RecordStore, Timestamp,
};

/// Default cap on client changes per request.
pub const DEFAULT_MAX_BATCH: usize = 1000;

/// Merges device change sets into a [`RecordStore`].
///
/// A client change conflicts when the server changed the same record
/// after the device's checkpoint. Detection and application happen
/// under the record's lock, so a writer racing the sync is either seen
/// as a conflict or lands after the client change.
#[derive(Debug, Clone)]
pub struct Reconciler {
    policy: ConflictPolicy,
    max_batch: usize,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ConflictPolicy::default())
    }
}

impl Reconciler {
    /// Creates a reconciler using `policy`.
    #[must_use]
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }

    /// Sets the maximum number of client changes per request.
    #[must_use]
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// The active conflict policy.
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Checks a request without touching the store.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidRequest`] for a blank device id, an
    /// oversized batch, or a malformed change.
    pub fn validate(&self, request: &SyncRequest) -> SyncResult<()> {
        if request.device_id.trim().is_empty() {
            return Err(SyncError::invalid("deviceId must not be empty"));
        }
        if request.changes.len() > self.max_batch {
            return Err(SyncError::invalid(format!(
                "{} changes exceed the batch limit of {}",
                request.changes.len(),
                self.max_batch
            )));
        }

        for (i, change) in request.changes.iter().enumerate() {
            if change.operation != ChangeOperation::Upsert {
                continue;
            }
            let Some(record) = &change.record else {
                return Err(SyncError::invalid(format!(
                    "change {i} is an upsert without a record"
                )));
            };
            if let Err(e) = record.validate() {
                return Err(SyncError::invalid(format!("change {i}: {e}")));
            }
            if record.id.as_ref().is_some_and(|id| *id != change.record_id) {
                return Err(SyncError::invalid(format!(
                    "change {i} targets {} but carries a record for another id",
                    change.record_id
                )));
            }
        }
        Ok(())
    }

    /// Reconciles `request` against `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails (nothing is applied) or the
    /// store fails part-way; changes applied before the failure stay
    /// applied and are visible to the next sync.
    pub fn reconcile(
        &self,
        store: &dyn RecordStore,
        request: SyncRequest,
    ) -> SyncResult<SyncResponse> {
        self.validate(&request)?;
        validate_against(store, &request)?;
        let checkpoint = request.last_checkpoint;

        if checkpoint.timestamp() < store.horizon() {
            tracing::info!(
                device = %request.device_id,
                checkpoint = %checkpoint.timestamp(),
                horizon = %store.horizon(),
                "checkpoint predates retained change log"
            );
            return Ok(SyncResponse {
                new_checkpoint: Checkpoint::at(store.head()),
                full_resync_required: true,
                ..SyncResponse::default()
            });
        }

        let received = request.changes.len();
        let mut applied_at: HashMap<RecordId, Timestamp> = HashMap::new();
        let mut conflicts = Vec::new();

        for change in request.changes {
            if let Some(conflict) = self.apply_change(store, checkpoint, &mut applied_at, change)? {
                conflicts.push(conflict);
            }
        }

        // Read after applying, so every change committed before the new
        // checkpoint is included and nothing can land behind it.
        let merged_changes = store.changes_since(checkpoint);
        let new_checkpoint = merged_changes
            .last()
            .map(|c| Checkpoint::at(c.timestamp))
            .unwrap_or_else(|| checkpoint.max(Checkpoint::at(store.head())));

        tracing::debug!(
            device = %request.device_id,
            received,
            applied = applied_at.len(),
            conflicts = conflicts.len(),
            merged = merged_changes.len(),
            "sync reconciled"
        );
        Ok(SyncResponse {
            merged_changes,
            new_checkpoint,
            conflicts,
            full_resync_required: false,
        })
    }

    fn apply_change(
        &self,
        store: &dyn RecordStore,
        checkpoint: Checkpoint,
        applied_at: &mut HashMap<RecordId, Timestamp>,
        change: ClientChange,
    ) -> SyncResult<Option<Conflict>> {
        // Earlier changes from this same request never conflict with later ones.
        let known = applied_at
            .get(&change.record_id)
            .copied()
            .unwrap_or_else(|| checkpoint.timestamp());

        let mut overridden = None;
        let mut since = known;
        if let Some(latest) = store
            .latest_change(&change.record_id)
            .filter(|l| l.timestamp > known)
        {
            if !self.policy.client_overrides(&change, &latest) {
                return Ok(Some(Conflict::concurrent(
                    change,
                    &latest,
                    self.policy.kept_resolution(),
                )));
            }
            since = latest.timestamp;
            overridden = Some(latest);
        }

        let mutation = match change.operation {
            ChangeOperation::Upsert => {
                let mut draft = change
                    .record
                    .clone()
                    .ok_or_else(|| SyncError::invalid("upsert without a record"))?;
                draft.id = Some(change.record_id.clone());
                Mutation::Upsert(draft)
            }
            ChangeOperation::Delete => Mutation::Delete(change.record_id.clone()),
        };

        match store.apply_if_unchanged(mutation, since)? {
            ApplyOutcome::Applied(entry) => {
                applied_at.insert(change.record_id.clone(), entry.timestamp);
                Ok(overridden.map(|server| {
                    tracing::debug!(record = %change.record_id, "client change overrode server");
                    Conflict::concurrent(change, &server, ConflictResolution::ClientApplied)
                }))
            }
            ApplyOutcome::Superseded { latest } => Ok(Some(Conflict::concurrent(
                change,
                &latest,
                self.policy.kept_resolution(),
            ))),
            ApplyOutcome::Missing => {
                let latest = store.latest_change(&change.record_id);
                Ok(Some(Conflict::missing(change, latest.as_ref())))
            }
        }
    }
}

/// Checks the parts of a request that depend on the store's state.
///
/// A checkpoint can only name a point the store has reached, and no
/// upsert may be refused by the store once earlier changes in the batch
/// have landed.
fn validate_against(store: &dyn RecordStore, request: &SyncRequest) -> SyncResult<()> {
    let head = store.head();
    if request.last_checkpoint.timestamp() > head {
        return Err(SyncError::invalid(format!(
            "lastCheckpoint {} is ahead of the server log head {head}",
            request.last_checkpoint.timestamp()
        )));
    }

    let now = store.now();
    for (i, change) in request.changes.iter().enumerate() {
        if let Some(record) = &change.record {
            if change.operation == ChangeOperation::Upsert {
                if let Err(e) = record.validate_at(now) {
                    return Err(SyncError::invalid(format!("change {i}: {e}")));
                }
            }
        }
    }
    Ok(())
}
