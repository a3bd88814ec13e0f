//! Verify command implementation.

use std::path::Path;
use tillsync_core::log::{self, compute_crc32, LogRecord, LogRecordType, LOG_MAGIC, LOG_VERSION};
use tillsync_core::StoreDir;
use tillsync_storage::{FileBackend, StorageBackend};

const HEADER_SIZE: usize = 11;
const CRC_SIZE: usize = 4;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of frames checked.
    pub frames_checked: usize,
    /// Number of valid frames.
    pub valid_frames: usize,
    /// Number of corrupt frames.
    pub corrupt_frames: usize,
    /// Partial final frame that recovery will cut off.
    pub torn_tail: Option<String>,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.corrupt_frames == 0 && self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {:?}", path);
    println!();

    let dir = StoreDir::open(path, false)?;
    let log_path = dir.log_path();
    if !log_path.exists() {
        println!("Log file not found (this is normal for a new store)");
        return Ok(());
    }

    let bytes = FileBackend::open(&log_path)?.read_all()?;
    let result = verify_log(&bytes);
    print_result(&result);

    match log::scan(&bytes) {
        Ok(scan) => println!("  Recoverable records: {}", scan.records.len()),
        Err(e) => println!("  Store cannot be opened: {}", e),
    }

    println!();
    if result.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err("Verification failed".into())
    }
}

/// Walks every frame of a log image.
pub fn verify_log(bytes: &[u8]) -> VerifyResult {
    let mut result = VerifyResult::default();
    let size = bytes.len();
    let mut offset = 0usize;

    while offset < size {
        let rest = &bytes[offset..];
        if rest.iter().all(|&b| b == 0) {
            result.torn_tail = Some(format!(
                "{} zero bytes at offset {}",
                rest.len(),
                offset
            ));
            break;
        }
        if rest.len() < HEADER_SIZE {
            result.torn_tail = Some(format!("incomplete header at offset {}", offset));
            break;
        }

        result.frames_checked += 1;
        let header = &rest[..HEADER_SIZE];

        if header[0..4] != LOG_MAGIC {
            result.errors.push(format!(
                "Invalid magic at offset {}: expected {:?}, got {:?}",
                offset,
                LOG_MAGIC,
                &header[0..4]
            ));
            result.corrupt_frames += 1;
            break;
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != LOG_VERSION {
            result.errors.push(format!(
                "Unsupported version at offset {}: {}",
                offset, version
            ));
        }

        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let frame_size = HEADER_SIZE + len + CRC_SIZE;
        if frame_size > rest.len() {
            result.torn_tail = Some(format!(
                "frame at offset {} needs {} bytes, only {} available",
                offset,
                frame_size,
                rest.len()
            ));
            result.frames_checked -= 1;
            break;
        }

        let body = &rest[..frame_size - CRC_SIZE];
        let crc_bytes = &rest[frame_size - CRC_SIZE..frame_size];
        let stored_crc =
            u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let computed_crc = compute_crc32(body);

        if stored_crc != computed_crc {
            if offset + frame_size == size {
                result.torn_tail = Some(format!("checksum mismatch in final frame at {}", offset));
                result.frames_checked -= 1;
            } else {
                result.errors.push(format!(
                    "CRC mismatch at offset {}: stored={:08x}, computed={:08x}",
                    offset, stored_crc, computed_crc
                ));
                result.corrupt_frames += 1;
            }
        } else {
            match LogRecordType::from_byte(header[6]) {
                Some(record_type) => {
                    match LogRecord::decode_payload(record_type, &body[HEADER_SIZE..]) {
                        Ok(_) => result.valid_frames += 1,
                        Err(e) => {
                            result.errors.push(format!(
                                "Undecodable {} frame at offset {}: {}",
                                record_type.name(),
                                offset,
                                e
                            ));
                            result.corrupt_frames += 1;
                        }
                    }
                }
                None => {
                    result.errors.push(format!(
                        "Unknown frame type {:#04x} at offset {}",
                        header[6], offset
                    ));
                    result.corrupt_frames += 1;
                }
            }
        }

        offset += frame_size;
    }

    result
}

fn print_result(result: &VerifyResult) {
    println!(
        "  Frames checked: {}, valid: {}, corrupt: {}",
        result.frames_checked, result.valid_frames, result.corrupt_frames
    );
    if let Some(tail) = &result.torn_tail {
        println!("  WARNING: torn tail will be discarded on open: {}", tail);
    }
    for error in &result.errors {
        println!("    ERROR: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillsync_codec::record;
    use tillsync_core::{Operation, QueueEntry};

    fn frames(count: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        for i in 0..count {
            let entry = QueueEntry::new(
                "orders",
                Operation::Insert,
                record! { "total" => i as i64 },
            );
            bytes.extend(LogRecord::QueueAppend { entry }.encode_frame().unwrap());
        }
        bytes
    }

    #[test]
    fn clean_log_passes() {
        let result = verify_log(&frames(3));
        assert!(result.is_ok());
        assert_eq!(result.valid_frames, 3);
        assert!(result.torn_tail.is_none());
    }

    #[test]
    fn torn_tail_is_a_warning() {
        let mut bytes = frames(2);
        bytes.truncate(bytes.len() - 3);
        let result = verify_log(&bytes);
        assert!(result.is_ok());
        assert_eq!(result.valid_frames, 1);
        assert!(result.torn_tail.is_some());
    }

    #[test]
    fn mid_log_damage_fails() {
        let mut bytes = frames(3);
        bytes[HEADER_SIZE + 2] ^= 0xFF;
        let result = verify_log(&bytes);
        assert!(!result.is_ok());
        assert_eq!(result.corrupt_frames, 1);
        assert_eq!(result.valid_frames, 2);
    }
}
