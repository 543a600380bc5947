//! # VaultSync Storage
//!
//! Journal backends for the VaultSync record store.
//!
//! A backend is an **opaque append-only byte log**. It knows nothing about
//! records, change entries or frame layout; `vaultsync_core` owns all of
//! that. Backends only promise that an `append` either lands completely
//! or reports an error, and that `read_all` returns exactly what was
//! appended (minus anything removed by `truncate`).
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - for tests and ephemeral stores
//! - [`FileBackend`] - durable storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use vaultsync_storage::{JournalBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(offset, 0);
//! assert_eq!(backend.read_all().unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::JournalBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
