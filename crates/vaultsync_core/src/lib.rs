//! # VaultSync Core
//!
//! Encrypted record storage for scraped profiles and scraping sessions.
//!
//! This crate provides:
//! - The record and change-log data model
//! - Authenticated encryption of payloads ([`crypto`])
//! - A durable, journal-backed [`RecordStore`] with expiry and search
//! - Backup export in JSON, delimited and encrypted form
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use vaultsync_core::{JournaledStore, Payload, RecordDraft, RecordKind, RecordStore};
//! use vaultsync_core::{SearchQuery, StoreConfig, SystemClock};
//!
//! let store = JournaledStore::open_dir(dir, StoreConfig::default(), Arc::new(SystemClock))?;
//! let record = store.put(RecordDraft::new(RecordKind::Member, Payload::new(sealed)))?;
//! let page = store.search(&SearchQuery::new().source("linkedin"))?;
//! ```
//!
//! ## Concurrency
//!
//! Mutations of one record id are serialized by a per-id lock; different
//! ids proceed in parallel. Searches and counts read a consistent
//! in-memory view and never wait on journal I/O.

pub mod backup;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod dir;
mod error;
pub mod gate;
pub mod journal;
pub mod query;
mod record;
pub mod store;
mod types;

pub use backup::{Export, ExportDocument, ExportFormat, Exporter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StoreConfig;
pub use crypto::{load_key, load_or_generate_key, AesGcmCipher, Cipher, EncryptionKey};
pub use dir::DataDir;
pub use error::{CoreError, CoreResult};
pub use gate::{CommitGate, GateScope};
pub use query::{SearchPage, SearchQuery};
pub use record::{
    base64_bytes, ChangeEntry, ChangeOperation, Payload, Record, RecordDraft, RecordKind,
    SOURCE_FIELD,
};
pub use store::{ApplyOutcome, JournaledStore, Mutation, RecordStore};
pub use types::{Checkpoint, RecordId, Timestamp, MAX_ID_LEN};
