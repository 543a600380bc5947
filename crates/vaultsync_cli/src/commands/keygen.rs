//! Encryption key creation.

use std::fs;
use std::path::Path;
use tracing::info;
use vaultsync_core::load_or_generate_key;

/// Writes a fresh key to `key_file`.
///
/// Refuses to replace an existing key unless `force` is set; records
/// encrypted under the old key become unreadable once it is gone.
pub fn run(key_file: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if key_file.exists() {
        if !force {
            return Err(format!(
                "key file {} already exists. Use --force to replace it.",
                key_file.display()
            )
            .into());
        }
        info!(path = %key_file.display(), "replacing existing key");
        fs::remove_file(key_file)?;
    }

    load_or_generate_key(key_file)?;
    println!("✓ Key written to {}", key_file.display());
    Ok(())
}
