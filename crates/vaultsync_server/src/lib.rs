//! # VaultSync Server
//!
//! The service facade over the encrypted record store.
//!
//! This crate provides:
//! - Validated operations: store, fetch, delete, search, sync, backup,
//!   stats and sweep
//! - A JSON request/response protocol tagged by `op`
//! - An async server that bounds every store operation with a deadline
//! - A background expiry sweeper
//! - A newline-delimited JSON TCP listener
//!
//! # Architecture
//!
//! ```text
//! transport ──► VaultServer ──► RequestHandler ──► Cipher
//!   (tokio)      (timeouts)      (validation)  ├─► RecordStore
//!                                              ├─► Reconciler
//!                                              └─► Exporter ──► BackupVault
//! ```
//!
//! Dependencies point strictly downward; nothing below the handler
//! calls back into it.

mod config;
mod error;
mod handler;
mod lifecycle;
mod message;
mod server;
mod stats;
pub mod transport;
mod vault;

pub use config::{ServerConfig, DEFAULT_PORT};
pub use error::{ErrorBody, ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use lifecycle::{RequestState, RequestTrace};
pub use message::{
    BackupPayload, CreateBackupRequest, DeleteRecordRequest, DeleteResult, GetBackupRequest,
    GetRecordRequest, RecordView, Request, Response, StoreRecordRequest, StoredRecord,
    SweepReport,
};
pub use server::{SweeperHandle, VaultServer};
pub use stats::{ServiceStats, StatsSnapshot};
pub use vault::{BackupInfo, BackupVault, StoredBackup};
