//! Journal frame layout.
//!
//! ```text
//! | magic "VSJ1" (4) | length (4, LE) | CBOR body (length) | crc32 (4, LE) |
//! ```
//!
//! The checksum covers magic, length and body.

use crate::error::{CoreError, CoreResult};
use crate::record::{ChangeEntry, Record};
use crate::types::{RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"VSJ1";
/// Magic plus length prefix.
pub const HEADER_SIZE: usize = 8;
/// Trailing checksum.
pub const FOOTER_SIZE: usize = 4;

/// One atomic mutation as persisted in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// A record was created or updated.
    Put {
        /// Full record image after the mutation.
        record: Record,
        /// The matching change-log entry.
        change: ChangeEntry,
    },
    /// A record was removed.
    Delete {
        /// The removed record.
        record_id: RecordId,
        /// The matching change-log entry.
        change: ChangeEntry,
    },
    /// Change entries at or before `horizon` were pruned.
    Prune {
        /// Timestamp of the newest pruned entry.
        horizon: Timestamp,
    },
}

/// Serializes an entry into a complete frame.
pub fn encode_frame(entry: &JournalEntry) -> CoreResult<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::into_writer(entry, &mut body).map_err(|e| CoreError::codec(e.to_string()))?;
    let len = u32::try_from(body.len())
        .map_err(|_| CoreError::codec(format!("frame body of {} bytes", body.len())))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len() + FOOTER_SIZE);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Outcome of scanning a journal image.
#[derive(Debug)]
pub struct DecodedFrames {
    /// Entries from every intact frame, in order.
    pub entries: Vec<JournalEntry>,
    /// Length of the intact prefix. Anything past it is a torn tail.
    pub valid_len: usize,
}

/// Decodes frames until the data ends or a frame fails to verify.
///
/// A damaged frame ends the scan; frames after it are not trusted
/// because the journal is only ever appended to.
pub fn decode_frames(data: &[u8]) -> DecodedFrames {
    let mut entries = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        match decode_one(&data[offset..]) {
            Some((entry, used)) => {
                entries.push(entry);
                offset += used;
            }
            None => break,
        }
    }

    DecodedFrames {
        entries,
        valid_len: offset,
    }
}

fn decode_one(data: &[u8]) -> Option<(JournalEntry, usize)> {
    if data.len() < HEADER_SIZE + FOOTER_SIZE || data[..4] != FRAME_MAGIC {
        return None;
    }
    let len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
    let total = HEADER_SIZE.checked_add(len)?.checked_add(FOOTER_SIZE)?;
    if data.len() < total {
        return None;
    }

    let body_end = HEADER_SIZE + len;
    let stored = u32::from_le_bytes([
        data[body_end],
        data[body_end + 1],
        data[body_end + 2],
        data[body_end + 3],
    ]);
    if stored != compute_crc32(&data[..body_end]) {
        return None;
    }

    let entry = ciborium::from_reader(&data[HEADER_SIZE..body_end]).ok()?;
    Some((entry, total))
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ChangeOperation;

    fn delete_entry(n: u64) -> JournalEntry {
        let record_id = RecordId::parse(format!("r{n}")).unwrap();
        JournalEntry::Delete {
            record_id: record_id.clone(),
            change: ChangeEntry {
                record_id,
                version: 2,
                operation: ChangeOperation::Delete,
                timestamp: Timestamp::from_millis(n),
            },
        }
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn frames_decode_in_order() {
        let mut data = encode_frame(&delete_entry(1)).unwrap();
        data.extend(encode_frame(&JournalEntry::Prune {
            horizon: Timestamp::from_millis(9),
        }).unwrap());

        let decoded = decode_frames(&data);
        assert_eq!(decoded.valid_len, data.len());
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.entries[0], delete_entry(1));
    }

    #[test]
    fn torn_tail_is_excluded() {
        let first = encode_frame(&delete_entry(1)).unwrap();
        let second = encode_frame(&delete_entry(2)).unwrap();
        let mut data = first.clone();
        data.extend_from_slice(&second[..second.len() - 3]);

        let decoded = decode_frames(&data);
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.valid_len, first.len());
    }

    #[test]
    fn corrupt_frame_stops_scan() {
        let mut data = encode_frame(&delete_entry(1)).unwrap();
        let first_len = data.len();
        data.extend(encode_frame(&delete_entry(2)).unwrap());
        data.extend(encode_frame(&delete_entry(3)).unwrap());
        data[first_len + HEADER_SIZE + 1] ^= 0x40;

        let decoded = decode_frames(&data);
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.valid_len, first_len);
    }
}
