//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Remote failures (`Transport`, `Rejected`, `ServerError`, `Timeout`) are
/// per-entry outcomes inside a drain pass and never abort it. `Store`
/// failures do.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote store refused the mutation (validation, constraint, missing row).
    #[error("rejected by remote store: {0}")]
    Rejected(String),

    /// The remote store failed internally.
    #[error("server error: {0}")]
    ServerError(String),

    /// A dispatched call did not finish within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// Local durable store error.
    #[error("store error: {0}")]
    Store(#[from] tillsync_core::CoreError),

    /// A queued payload has no usable primary key.
    #[error("{operation} on {table} has no `{key_field}` value")]
    MissingKey {
        /// Target collection.
        table: String,
        /// Queued operation.
        operation: tillsync_core::Operation,
        /// Expected key field.
        key_field: String,
    },

    /// A manual sync was requested while offline.
    #[error("device is offline")]
    Offline,

    /// A drain pass this request was folded into failed.
    #[error("drain pass failed: {0}")]
    DrainFailed(String),

    /// The engine has been shut down.
    #[error("sync engine is shut down")]
    Shutdown,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            SyncError::Offline => true,
            _ => false,
        }
    }
}
