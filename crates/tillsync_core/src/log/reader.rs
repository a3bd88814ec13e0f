//! Log scanning and tail recovery.
//!
//! A scan walks the frames of a log image front to back. The final frame is
//! allowed to be incomplete: a crash mid-append leaves a short or
//! checksum-failing tail, which recovery cuts off. Damage anywhere before
//! the final frame means acknowledged data is unreadable and is reported as
//! corruption instead.

use crate::error::{CoreError, CoreResult};
use crate::log::record::{
    compute_crc32, LogRecord, LogRecordType, CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION,
};

/// How a scan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEnd {
    /// Every byte belonged to a valid frame.
    Clean,
    /// The log ends in a partial frame.
    TornTail {
        /// Length of the valid prefix.
        valid_len: u64,
        /// Why the tail was rejected.
        reason: String,
    },
}

/// Result of scanning a log image.
#[derive(Debug, Clone)]
pub struct LogScan {
    /// Decoded records with their frame offsets.
    pub records: Vec<(u64, LogRecord)>,
    /// Tail status.
    pub end: ScanEnd,
}

impl LogScan {
    /// Length of the valid prefix of the scanned image.
    #[must_use]
    pub fn valid_len(&self, total_len: u64) -> u64 {
        match &self.end {
            ScanEnd::Clean => total_len,
            ScanEnd::TornTail { valid_len, .. } => *valid_len,
        }
    }

    /// Whether the scan found a torn tail.
    #[must_use]
    pub fn is_torn(&self) -> bool {
        matches!(self.end, ScanEnd::TornTail { .. })
    }
}

/// Scans a complete log image.
///
/// # Errors
///
/// Returns [`CoreError::LogCorruption`] for damage before the final frame
/// and [`CoreError::UnsupportedVersion`] for frames from an unknown format.
pub fn scan(bytes: &[u8]) -> CoreResult<LogScan> {
    let total = bytes.len();
    let mut records = Vec::new();
    let mut pos = 0usize;

    let torn = |records: Vec<(u64, LogRecord)>, pos: usize, reason: &str| LogScan {
        records,
        end: ScanEnd::TornTail {
            valid_len: pos as u64,
            reason: reason.to_string(),
        },
    };

    while pos < total {
        let rest = &bytes[pos..];

        if rest.len() < HEADER_SIZE {
            return Ok(torn(records, pos, "incomplete frame header"));
        }

        if rest[0..4] != LOG_MAGIC {
            // Preallocated or zero-filled space after the last write
            if rest.iter().all(|&b| b == 0) {
                return Ok(torn(records, pos, "zero-filled tail"));
            }
            return Err(CoreError::log_corruption(pos as u64, "bad frame magic"));
        }

        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version != LOG_VERSION {
            return Err(CoreError::UnsupportedVersion {
                found: version,
                supported: LOG_VERSION,
            });
        }

        let type_byte = rest[6];
        let payload_len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;
        let frame_len = HEADER_SIZE + payload_len + CRC_SIZE;

        if rest.len() < frame_len {
            return Ok(torn(records, pos, "frame extends past end of log"));
        }

        let body = &rest[..HEADER_SIZE + payload_len];
        let crc_bytes = &rest[HEADER_SIZE + payload_len..frame_len];
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if compute_crc32(body) != stored_crc {
            if pos + frame_len == total {
                return Ok(torn(records, pos, "checksum mismatch in final frame"));
            }
            return Err(CoreError::log_corruption(pos as u64, "checksum mismatch"));
        }

        let record_type = LogRecordType::from_byte(type_byte).ok_or_else(|| {
            CoreError::log_corruption(pos as u64, format!("unknown record type {type_byte}"))
        })?;

        let record = LogRecord::decode_payload(record_type, &body[HEADER_SIZE..]).map_err(|e| {
            CoreError::log_corruption(
                pos as u64,
                format!("undecodable {} payload: {e}", record_type.name()),
            )
        })?;

        records.push((pos as u64, record));
        pos += frame_len;
    }

    Ok(LogScan {
        records,
        end: ScanEnd::Clean,
    })
}
