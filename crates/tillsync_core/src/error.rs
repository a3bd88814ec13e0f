//! Error types for tillsync core.

use crate::types::Operation;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the local durable store and the queue on top of it.
///
/// Every variant here is fatal to the operation that raised it: callers of
/// `enqueue`, `mark_synced` and `clear_synced` must see them, since a
/// swallowed persistence failure would silently break durability.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tillsync_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] tillsync_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store log is corrupted before its final frame.
    #[error("log corruption at offset {offset}: {message}")]
    LogCorruption {
        /// Byte offset of the offending frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// The store log was written by an unknown format version.
    #[error("unsupported log version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the frame header.
        found: u16,
        /// Version this build reads and writes.
        supported: u16,
    },

    /// A failed append could not be rolled back; the store refuses writes
    /// until it is reopened.
    #[error("store poisoned: a partial log append could not be rolled back")]
    Poisoned,

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The store directory is missing or is not a directory.
    #[error("invalid store directory: {message}")]
    InvalidDirectory {
        /// Description of the problem.
        message: String,
    },

    /// An `UPDATE` or `DELETE` payload does not carry the primary key.
    #[error("{operation} on {table} requires key field `{key_field}` in the payload")]
    MissingKey {
        /// Target collection.
        table: String,
        /// Operation that needs the key.
        operation: Operation,
        /// Name of the expected key field.
        key_field: String,
    },

    /// A queue entry with the same id already exists.
    #[error("duplicate queue entry {0}")]
    DuplicateEntry(String),

    /// Operation name could not be parsed.
    #[error("unknown operation `{0}` (expected INSERT, UPDATE or DELETE)")]
    UnknownOperation(String),

    /// Caller supplied an invalid argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a log corruption error.
    pub fn log_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::LogCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid directory error.
    pub fn invalid_directory(message: impl Into<String>) -> Self {
        Self::InvalidDirectory {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_names_the_field() {
        let err = CoreError::MissingKey {
            table: "stock".into(),
            operation: Operation::Update,
            key_field: "id".into(),
        };
        assert_eq!(
            err.to_string(),
            "UPDATE on stock requires key field `id` in the payload"
        );
    }

    #[test]
    fn storage_errors_convert() {
        let storage = tillsync_storage::StorageError::WriteRefused("disk full".into());
        let err: CoreError = storage.into();
        assert!(matches!(err, CoreError::Storage(_)));
    }
}
