//! Offline backup export.

use super::open_store;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use vaultsync_core::{load_key, AesGcmCipher, ExportFormat, Exporter, StoreConfig};

/// Exports the records in `data_dir` to `out`.
///
/// Uses the same exporter as the service, so the file matches what a
/// `createBackup` request would produce. The key file must already exist.
pub fn run(
    data_dir: &Path,
    key_file: &Path,
    session: Option<&str>,
    format: ExportFormat,
    out: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(path = %data_dir.display(), %format, "exporting records");

    let key = load_key(key_file)?;
    let store = open_store(data_dir, StoreConfig::default())?;
    let exporter = Exporter::new(Arc::new(AesGcmCipher), Arc::new(key));
    let export = exporter.export(&store, session, format)?;

    let mut file = fs::File::create(out)?;
    file.write_all(&export.data)?;
    file.sync_all()?;

    println!("✓ Export written");
    println!("  Path: {}", out.display());
    println!("  Format: {}", export.format);
    println!("  Size: {} bytes", export.data.len());
    println!("  Records: {}", export.record_count);
    if let Some(session) = session {
        println!("  Session: {session}");
    }
    Ok(())
}
