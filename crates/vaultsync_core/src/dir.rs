//! Data directory layout and ownership.
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK              # Held exclusively by the process that owns the store
//! └─ records.journal   # Mutation journal
//! ```
//!
//! Two writers appending to one journal would overwrite each other's
//! frames, so opening a directory takes an exclusive advisory lock on
//! `LOCK` and keeps it until the [`DataDir`] is dropped.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// File name of the journal inside a data directory.
pub const JOURNAL_FILE: &str = "records.journal";

/// An exclusively held data directory.
#[derive(Debug)]
pub struct DataDir {
    path: PathBuf,
    _lock_file: File,
}

impl DataDir {
    /// Creates `path` if needed and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DirectoryLocked`] if another store holds the
    /// directory, or an I/O error if it cannot be created.
    pub fn open(path: &Path) -> CoreResult<Self> {
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(CoreError::format(format!(
                "data path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            tracing::warn!(path = %path.display(), "data directory already in use");
            return Err(CoreError::DirectoryLocked {
                path: path.display().to_string(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// The directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the record journal.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }
}
