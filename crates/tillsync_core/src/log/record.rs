//! Log record types and frame encoding.
//!
//! Every record is written as one self-checking frame:
//!
//! ```text
//! | magic "TSLG" (4) | version u16 (2) | type u8 (1) | len u32 (4) | CBOR payload (len) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers every byte before it.

use crate::error::{CoreError, CoreResult};
use crate::types::{EntryId, QueueEntry};
use serde::{Deserialize, Serialize};
use tillsync_codec::{from_cbor, to_cbor, Record};

/// Magic bytes opening every frame.
pub const LOG_MAGIC: [u8; 4] = *b"TSLG";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Type tag of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// A new queue entry.
    QueueAppend = 1,
    /// An entry acknowledged by the remote store.
    QueueMarkSynced = 2,
    /// Entries removed from the queue.
    QueueRemove = 3,
    /// A whole refreshed batch for one cache collection.
    CacheBulkPut = 4,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::QueueAppend),
            2 => Some(Self::QueueMarkSynced),
            3 => Some(Self::QueueRemove),
            4 => Some(Self::CacheBulkPut),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Short name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::QueueAppend => "queue-append",
            Self::QueueMarkSynced => "queue-mark-synced",
            Self::QueueRemove => "queue-remove",
            Self::CacheBulkPut => "cache-bulk-put",
        }
    }
}

/// One durable state change of the local store.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    /// Append an entry to the end of the queue.
    QueueAppend {
        /// The new entry.
        entry: QueueEntry,
    },

    /// Flip an entry's `synced` flag.
    QueueMarkSynced {
        /// Entry id.
        id: EntryId,
    },

    /// Drop entries from the queue.
    QueueRemove {
        /// Removed entry ids.
        ids: Vec<EntryId>,
    },

    /// Upsert a batch of records into one cache collection.
    CacheBulkPut {
        /// Cache collection name.
        collection: String,
        /// When the batch was fetched.
        refreshed_at_ms: u64,
        /// Records, each carrying its key field.
        records: Vec<Record>,
    },
}

#[derive(Serialize)]
struct CacheBulkRef<'a> {
    collection: &'a str,
    refreshed_at_ms: u64,
    records: &'a [Record],
}

#[derive(Deserialize)]
struct CacheBulkOwned {
    collection: String,
    refreshed_at_ms: u64,
    records: Vec<Record>,
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::QueueAppend { .. } => LogRecordType::QueueAppend,
            Self::QueueMarkSynced { .. } => LogRecordType::QueueMarkSynced,
            Self::QueueRemove { .. } => LogRecordType::QueueRemove,
            Self::CacheBulkPut { .. } => LogRecordType::CacheBulkPut,
        }
    }

    /// Serializes the record payload (without envelope).
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let bytes = match self {
            Self::QueueAppend { entry } => to_cbor(entry)?,
            Self::QueueMarkSynced { id } => to_cbor(id)?,
            Self::QueueRemove { ids } => to_cbor(ids)?,
            Self::CacheBulkPut {
                collection,
                refreshed_at_ms,
                records,
            } => to_cbor(&CacheBulkRef {
                collection,
                refreshed_at_ms: *refreshed_at_ms,
                records,
            })?,
        };
        Ok(bytes)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: LogRecordType, payload: &[u8]) -> CoreResult<Self> {
        let record = match record_type {
            LogRecordType::QueueAppend => Self::QueueAppend {
                entry: from_cbor(payload)?,
            },
            LogRecordType::QueueMarkSynced => Self::QueueMarkSynced {
                id: from_cbor(payload)?,
            },
            LogRecordType::QueueRemove => Self::QueueRemove {
                ids: from_cbor(payload)?,
            },
            LogRecordType::CacheBulkPut => {
                let bulk: CacheBulkOwned = from_cbor(payload)?;
                Self::CacheBulkPut {
                    collection: bulk.collection,
                    refreshed_at_ms: bulk.refreshed_at_ms,
                    records: bulk.records,
                }
            }
        };
        Ok(record)
    }

    /// Builds the complete frame for this record.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be encoded or exceeds `u32::MAX` bytes.
    pub fn encode_frame(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_argument("log record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, reflected
    const CRC32_TABLE: [u32; 256] = {
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
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Operation;
    use tillsync_codec::record;

    #[test]
    fn record_type_bytes() {
        for t in [
            LogRecordType::QueueAppend,
            LogRecordType::QueueMarkSynced,
            LogRecordType::QueueRemove,
            LogRecordType::CacheBulkPut,
        ] {
            assert_eq!(LogRecordType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(LogRecordType::from_byte(0), None);
        assert_eq!(LogRecordType::from_byte(9), None);
    }

    #[test]
    fn queue_append_payload() {
        let entry = QueueEntry::new(
            "orders",
            Operation::Insert,
            record! { "entity_id" => "E1", "total" => 5000 },
        );
        let record = LogRecord::QueueAppend { entry };
        let payload = record.encode_payload().unwrap();
        let decoded = LogRecord::decode_payload(LogRecordType::QueueAppend, &payload).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn cache_bulk_payload() {
        let record = LogRecord::CacheBulkPut {
            collection: "stock".into(),
            refreshed_at_ms: 17,
            records: vec![record! { "id" => "S1", "quantity" => 3 }],
        };
        let payload = record.encode_payload().unwrap();
        let decoded = LogRecord::decode_payload(LogRecordType::CacheBulkPut, &payload).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn frame_layout() {
        let record = LogRecord::QueueRemove { ids: vec![] };
        let frame = record.encode_frame().unwrap();

        assert_eq!(&frame[0..4], b"TSLG");
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), LOG_VERSION);
        assert_eq!(frame[6], LogRecordType::QueueRemove.as_byte());
        let len = u32::from_le_bytes([frame[7], frame[8], frame[9], frame[10]]) as usize;
        assert_eq!(frame.len(), HEADER_SIZE + len + CRC_SIZE);

        let body = &frame[..frame.len() - CRC_SIZE];
        let stored = u32::from_le_bytes(frame[frame.len() - CRC_SIZE..].try_into().unwrap());
        assert_eq!(stored, compute_crc32(body));
    }

    #[test]
    fn wrong_payload_type_fails() {
        let payload = LogRecord::QueueRemove { ids: vec![] }
            .encode_payload()
            .unwrap();
        assert!(LogRecord::decode_payload(LogRecordType::QueueAppend, &payload).is_err());
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }
}
