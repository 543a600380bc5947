//! Durable mutation journal.
//!
//! Every record-store mutation is persisted as exactly one frame holding
//! both the record image and its change entry, so a mutation and its
//! change entry either both survive or neither does.

mod frame;

pub use frame::{compute_crc32, decode_frames, encode_frame, DecodedFrames, JournalEntry};

use crate::error::CoreResult;
use vaultsync_storage::JournalBackend;

/// Frame-level access to a [`JournalBackend`].
#[derive(Debug)]
pub struct Journal<B> {
    backend: B,
}

impl<B: JournalBackend> Journal<B> {
    /// Wraps a backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Reads every intact entry, truncating a torn tail if one is found.
    pub fn replay(&mut self) -> CoreResult<Vec<JournalEntry>> {
        let data = self.backend.read_all()?;
        let decoded = decode_frames(&data);
        if decoded.valid_len < data.len() {
            tracing::warn!(
                valid = decoded.valid_len,
                total = data.len(),
                "discarding torn journal tail"
            );
            self.backend.truncate(decoded.valid_len as u64)?;
        }
        Ok(decoded.entries)
    }

    /// Appends one entry as a single frame.
    pub fn append(&mut self, entry: &JournalEntry) -> CoreResult<u64> {
        let frame = encode_frame(entry)?;
        Ok(self.backend.append(&frame)?)
    }

    /// Returns the journal size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Forces the journal to durable storage.
    pub fn sync(&mut self) -> CoreResult<()> {
        Ok(self.backend.sync()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;
    use vaultsync_storage::InMemoryBackend;

    #[test]
    fn replay_truncates_garbage() {
        let mut journal = Journal::new(InMemoryBackend::new());
        journal
            .append(&JournalEntry::Prune {
                horizon: Timestamp::from_millis(5),
            })
            .unwrap();
        let good = journal.size().unwrap();

        let mut data = InMemoryBackend::new();
        data.append(&journal.backend.read_all().unwrap()).unwrap();
        data.append(b"VSJ1\xff\xff").unwrap();

        let mut reopened = Journal::new(data);
        let entries = reopened.replay().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(reopened.size().unwrap(), good);
    }
}
