//! Offline stats and sweep over a data directory.

use super::open_store;
use std::path::Path;
use tracing::info;
use vaultsync_core::{RecordStore, StoreConfig};

/// Prints record and storage counters.
pub fn stats(data_dir: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(data_dir, StoreConfig::default())?;

    match format {
        "json" => {
            let value = serde_json::json!({
                "totalRecords": store.live_count(),
                "totalSessions": store.session_count(),
                "storageUsed": store.storage_used(),
                "head": store.head(),
                "horizon": store.horizon(),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        "text" => {
            println!("VaultSync store: {}", data_dir.display());
            println!("  Live records:  {}", store.live_count());
            println!("  Sessions:      {}", store.session_count());
            println!("  Journal bytes: {}", store.storage_used());
            println!("  Head:          {}", store.head());
            println!("  Horizon:       {}", store.horizon());
        }
        other => return Err(format!("unknown output format: {other}").into()),
    }
    Ok(())
}

/// Removes expired records and prunes old change entries.
pub fn sweep(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(data_dir, StoreConfig::default())?;

    let removed = store.sweep_expired()?;
    let pruned = store.prune_changes()?;
    store.flush()?;

    info!(removed, pruned, "sweep finished");
    println!("✓ Sweep finished");
    println!("  Expired records removed: {removed}");
    println!("  Change entries pruned:   {pruned}");
    Ok(())
}
