//! # VaultSync Sync
//!
//! Incremental synchronization between devices and the record store.
//!
//! A device presents the [`Checkpoint`](vaultsync_core::Checkpoint) it
//! last saw and the changes it made since. The [`Reconciler`] applies
//! the non-conflicting ones, reports the rest as [`Conflict`]s according
//! to a [`ConflictPolicy`], and returns every change the device has not
//! yet seen together with its next checkpoint.
//!
//! This crate does no I/O of its own; it drives a
//! [`RecordStore`](vaultsync_core::RecordStore).

mod conflict;
mod error;
mod message;
mod reconciler;

pub use conflict::{Conflict, ConflictPolicy, ConflictReason, ConflictResolution};
pub use error::{SyncError, SyncResult};
pub use message::{ClientChange, SyncRequest, SyncResponse};
pub use reconciler::{Reconciler, DEFAULT_MAX_BATCH};
