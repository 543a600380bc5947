//! Journal backend trait definition.

use crate::error::StorageResult;

/// An append-only byte log backing a record journal.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at
/// - `read_all` returns every byte appended since the last `truncate`
/// - after `sync` returns, previously appended data survives a crash
/// - implementations must be `Send + Sync`
pub trait JournalBackend: Send + Sync {
    /// Appends a frame to the end of the log and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails. A failed append must not
    /// leave a partially visible frame behind for `read_all`, unless the
    /// process crashes mid-write; readers detect torn tails themselves.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Reads the complete log contents.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Returns the current size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Forces appended data (and metadata) to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the log back to `new_size` bytes.
    ///
    /// Used to discard a torn tail found during replay.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncateBeyondEnd`] if `new_size`
    /// is larger than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
