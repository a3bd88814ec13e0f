//! Append-only, checksummed log backing the local store.

mod reader;
mod record;

pub use reader::{scan, LogScan, ScanEnd};
pub use record::{compute_crc32, LogRecord, LogRecordType, LOG_MAGIC, LOG_VERSION};
