//! Storage for finished backups, kept apart from the live records.

use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use vaultsync_core::{gate, Export, ExportFormat, Timestamp};

/// Metadata of a stored backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    /// Generated identifier.
    pub backup_id: String,
    /// Blob size in bytes.
    pub size: usize,
    /// Blob encoding.
    pub format: ExportFormat,
    /// When the backup was taken.
    pub created_at: Timestamp,
    /// Records in the backup.
    pub record_count: usize,
    /// Session filter, if the backup is session-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A backup blob with its metadata.
#[derive(Debug, Clone)]
pub struct StoredBackup {
    /// Metadata.
    pub info: BackupInfo,
    /// The encoded blob.
    pub data: Vec<u8>,
}

/// Holds backups by id.
///
/// A directory-backed vault keeps only metadata in memory. Each backup is
/// two files, `<backupId>.<ext>` with the blob and `<backupId>.meta.json`
/// with its [`BackupInfo`]; the metadata file is written last, so a
/// backup without one is ignored when the vault is reopened.
#[derive(Debug)]
pub struct BackupVault {
    index: RwLock<HashMap<String, BackupInfo>>,
    blobs: Blobs,
}

#[derive(Debug)]
enum Blobs {
    Memory(RwLock<HashMap<String, Vec<u8>>>),
    Directory(PathBuf),
}

const META_SUFFIX: &str = ".meta.json";

impl BackupVault {
    /// A vault that keeps backups in memory only.
    pub fn in_memory() -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
            blobs: Blobs::Memory(RwLock::new(HashMap::new())),
        }
    }

    /// Opens the vault kept in `dir`, creating it if needed, and
    /// rebuilds the index from the metadata files found there.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created or listed.
    /// Unreadable metadata files are skipped with a warning.
    pub fn open(dir: impl Into<PathBuf>) -> ServerResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut index = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_meta = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(META_SUFFIX));
            if !is_meta {
                continue;
            }
            match read_info(&path) {
                Ok(info) if blob_path(&dir, &info).is_file() => {
                    index.insert(info.backup_id.clone(), info);
                }
                Ok(info) => {
                    tracing::warn!(backup_id = %info.backup_id, "backup blob missing, skipping");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable backup metadata, skipping");
                }
            }
        }
        tracing::info!(dir = %dir.display(), backups = index.len(), "backup vault opened");

        Ok(Self {
            index: RwLock::new(index),
            blobs: Blobs::Directory(dir),
        })
    }

    /// Stores `export` under a fresh id.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the vault directory cannot be written, or
    /// a storage timeout if the request was abandoned; the backup is not
    /// stored in either case.
    pub fn insert(&self, export: Export, session_id: Option<String>) -> ServerResult<BackupInfo> {
        let info = BackupInfo {
            backup_id: uuid::Uuid::new_v4().to_string(),
            size: export.data.len(),
            format: export.format,
            created_at: export.created_at,
            record_count: export.record_count,
            session_id,
        };

        gate::admit()?;
        match &self.blobs {
            Blobs::Memory(blobs) => {
                blobs.write().insert(info.backup_id.clone(), export.data);
            }
            Blobs::Directory(dir) => {
                let path = blob_path(dir, &info);
                fs::write(&path, &export.data)?;
                let meta = serde_json::to_vec(&info)
                    .map_err(|e| ServerError::Internal(format!("backup metadata: {e}")))?;
                fs::write(meta_path(dir, &info.backup_id), meta)?;
                tracing::debug!(path = %path.display(), "backup written to disk");
            }
        }

        self.index
            .write()
            .insert(info.backup_id.clone(), info.clone());
        Ok(info)
    }

    /// Looks up a backup by id, reading its blob.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if an indexed blob can no longer be read.
    pub fn get(&self, backup_id: &str) -> ServerResult<Option<StoredBackup>> {
        let Some(info) = self.index.read().get(backup_id).cloned() else {
            return Ok(None);
        };
        let data = match &self.blobs {
            Blobs::Memory(blobs) => match blobs.read().get(backup_id) {
                Some(data) => data.clone(),
                None => return Ok(None),
            },
            Blobs::Directory(dir) => fs::read(blob_path(dir, &info))?,
        };
        Ok(Some(StoredBackup { info, data }))
    }

    /// Metadata of every backup, newest first.
    pub fn list(&self) -> Vec<BackupInfo> {
        let mut infos: Vec<BackupInfo> = self.index.read().values().cloned().collect();
        infos.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.backup_id.cmp(&b.backup_id))
        });
        infos
    }

    /// Number of stored backups.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Returns true if no backup has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn blob_path(dir: &Path, info: &BackupInfo) -> PathBuf {
    dir.join(format!("{}.{}", info.backup_id, info.format.extension()))
}

fn meta_path(dir: &Path, backup_id: &str) -> PathBuf {
    dir.join(format!("{backup_id}{META_SUFFIX}"))
}

fn read_info(path: &Path) -> ServerResult<BackupInfo> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| ServerError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn export(at: u64) -> Export {
        Export {
            format: ExportFormat::Json,
            data: b"{}".to_vec(),
            record_count: 1,
            created_at: Timestamp::from_millis(at),
        }
    }

    #[test]
    fn stores_and_lists_newest_first() {
        let vault = BackupVault::in_memory();
        let old = vault.insert(export(1), None).unwrap();
        let new = vault.insert(export(2), Some("s1".into())).unwrap();

        assert_eq!(vault.len(), 2);
        assert_ne!(old.backup_id, new.backup_id);
        let listed: Vec<_> = vault.list().into_iter().map(|b| b.backup_id).collect();
        assert_eq!(listed, [new.backup_id.clone(), old.backup_id]);
        assert_eq!(vault.get(&new.backup_id).unwrap().unwrap().data, b"{}");
        assert!(vault.get("missing").unwrap().is_none());
    }

    #[test]
    fn abandoned_request_stores_no_backup() {
        let vault = BackupVault::in_memory();
        let gate = vaultsync_core::CommitGate::new("createBackup", 50);
        let _scope = gate.enter();
        assert!(gate.abandon());

        let err = vault.insert(export(1), None).unwrap_err();
        assert_eq!(err.category(), "storage_timeout");
        assert!(vault.is_empty());
    }

    #[test]
    fn writes_blob_and_metadata_to_directory() {
        let dir = tempdir().unwrap();
        let vault = BackupVault::open(dir.path().join("backups")).unwrap();
        let info = vault.insert(export(1), None).unwrap();

        let backups = dir.path().join("backups");
        let blob = backups.join(format!("{}.json", info.backup_id));
        assert_eq!(fs::read(blob).unwrap(), b"{}");
        assert!(backups.join(format!("{}.meta.json", info.backup_id)).is_file());
        assert_eq!(info.size, 2);
    }

    #[test]
    fn reopened_vault_serves_earlier_backups() {
        let dir = tempdir().unwrap();
        let (old, new) = {
            let vault = BackupVault::open(dir.path()).unwrap();
            let old = vault.insert(export(1), None).unwrap();
            let new = vault.insert(export(2), Some("s1".into())).unwrap();
            (old, new)
        };

        let vault = BackupVault::open(dir.path()).unwrap();
        assert_eq!(vault.len(), 2);
        assert_eq!(vault.list(), [new.clone(), old]);
        let stored = vault.get(&new.backup_id).unwrap().unwrap();
        assert_eq!(stored.info.session_id.as_deref(), Some("s1"));
        assert_eq!(stored.data, b"{}");
    }

    #[test]
    fn reopen_skips_incomplete_backups() {
        let dir = tempdir().unwrap();
        let kept = {
            let vault = BackupVault::open(dir.path()).unwrap();
            let kept = vault.insert(export(1), None).unwrap();
            let lost = vault.insert(export(2), None).unwrap();
            fs::remove_file(dir.path().join(format!("{}.json", lost.backup_id))).unwrap();
            kept
        };
        fs::write(dir.path().join("garbage.meta.json"), b"not json").unwrap();
        fs::write(dir.path().join("orphan.json"), b"{}").unwrap();

        let vault = BackupVault::open(dir.path()).unwrap();
        assert_eq!(vault.list(), [kept]);
    }
}
