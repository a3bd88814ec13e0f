//! Mutation queue manager.

use crate::error::{CoreError, CoreResult};
use crate::store::LocalStore;
use crate::types::{EntryId, Operation, QueueEntry};
use std::sync::Arc;
use tillsync_codec::Record;
use tracing::debug;

/// Client-facing handle for recording and tracking mutation intents.
///
/// The queue owns the `synced` flags of its entries. Every method that
/// changes state is persisted before it returns, so an entry acknowledged
/// by [`enqueue`](Self::enqueue) survives a crash immediately afterwards.
///
/// Cloning is cheap; clones share the same store.
#[derive(Debug, Clone)]
pub struct MutationQueue {
    store: Arc<LocalStore>,
}

impl MutationQueue {
    /// Creates a queue over a shared store.
    #[must_use]
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Records a new mutation intent and returns its id.
    ///
    /// Works regardless of connectivity. Updates and deletes must name the
    /// target record through the configured key field.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidArgument`] for an empty table name
    /// - [`CoreError::MissingKey`] for an update or delete without a key
    /// - any persistence failure of the local store
    pub fn enqueue(
        &self,
        table: impl Into<String>,
        operation: Operation,
        payload: Record,
    ) -> CoreResult<EntryId> {
        let table = table.into();
        if table.trim().is_empty() {
            return Err(CoreError::invalid_argument("table name is empty"));
        }

        let key_field = &self.store.config().key_field;
        if operation.requires_key() && payload.split_key(key_field).is_none() {
            return Err(CoreError::MissingKey {
                table,
                operation,
                key_field: key_field.clone(),
            });
        }

        let entry = QueueEntry::new(table, operation, payload);
        let id = entry.id;
        debug!(entry_id = %id, table = %entry.table, operation = %operation, "enqueue");
        self.store.append_entry(entry)?;
        Ok(id)
    }

    /// Marks an entry as acknowledged by the remote store.
    ///
    /// Idempotent: unknown or already-synced ids are a no-op.
    pub fn mark_synced(&self, id: EntryId) -> CoreResult<()> {
        self.store.mark_synced(id)?;
        Ok(())
    }

    /// Permanently removes every synced entry and returns how many went.
    pub fn clear_synced(&self) -> CoreResult<usize> {
        self.store.remove_synced()
    }

    /// Number of entries not yet acknowledged, recomputed on every call.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.store.pending_count()
    }

    /// Snapshot of unsynced entries in creation order.
    #[must_use]
    pub fn pending(&self) -> Vec<QueueEntry> {
        self.store.unsynced_entries()
    }

    /// Snapshot of all entries in creation order.
    #[must_use]
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.store.queue_entries()
    }

    /// Looks up one entry.
    #[must_use]
    pub fn get(&self, id: EntryId) -> Option<QueueEntry> {
        self.store.queue_entry(id)
    }

    /// Total number of entries, synced ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.queue_len()
    }

    /// Whether the queue holds no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
