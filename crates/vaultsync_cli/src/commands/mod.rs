//! CLI command implementations.

pub mod export;
pub mod keygen;
pub mod maintenance;
pub mod serve;

use std::path::Path;
use std::sync::Arc;
use vaultsync_core::{JournaledStore, StoreConfig, SystemClock};
use vaultsync_storage::FileBackend;

/// Key file name used when `--key-file` is not given.
pub const DEFAULT_KEY_FILE: &str = "vault.key";

/// Opens the journaled store in `data_dir` on the system clock.
pub fn open_store(
    data_dir: &Path,
    config: StoreConfig,
) -> Result<JournaledStore<FileBackend>, Box<dyn std::error::Error>> {
    let store = JournaledStore::open_dir(data_dir, config, Arc::new(SystemClock))?;
    tracing::debug!(path = %data_dir.display(), "opened record store");
    Ok(store)
}
