//! The local durable store: queue and cache state over an append-only log.

use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::log::{self, LogRecord, ScanEnd};
use crate::types::{now_ms, CacheRecord, EntryId, QueueEntry};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tillsync_codec::Record;
use tillsync_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageResult};
use tracing::{debug, error, info, warn};

/// Persistent home of the mutation queue and the reference-data cache.
///
/// Every mutation is encoded as one log frame, appended and flushed before
/// the in-memory view is updated, so a successful return means the change
/// survives a crash. On open the log is replayed; a torn final frame is cut
/// off and the change it carried is treated as never having happened.
///
/// Queue and cache state live in separate partitions of the same log and
/// never share records.
///
/// # Example
///
/// ```rust
/// use tillsync_core::{LocalStore, Operation, QueueEntry};
/// use tillsync_codec::record;
///
/// let store = LocalStore::open_in_memory().unwrap();
/// let entry = QueueEntry::new("orders", Operation::Insert, record! { "total" => 5000 });
/// store.append_entry(entry).unwrap();
/// assert_eq!(store.pending_count(), 1);
/// ```
pub struct LocalStore {
    config: StoreConfig,
    /// Held for every write; taken before `state`.
    log: Mutex<Box<dyn StorageBackend>>,
    state: RwLock<StoreState>,
    /// Set when a partial frame may remain at the end of the log.
    poisoned: AtomicBool,
    /// Directory lock, `None` for stores without a directory.
    dir: Option<StoreDir>,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Queue entries in append order.
    queue: Vec<QueueEntry>,
    /// collection -> key -> record
    cache: BTreeMap<String, BTreeMap<String, CacheRecord>>,
}

impl StoreState {
    fn apply(&mut self, record: LogRecord, key_field: &str) {
        match record {
            LogRecord::QueueAppend { entry } => {
                if self.queue.iter().all(|e| e.id != entry.id) {
                    self.queue.push(entry);
                }
            }
            LogRecord::QueueMarkSynced { id } => {
                if let Some(entry) = self.queue.iter_mut().find(|e| e.id == id) {
                    entry.synced = true;
                }
            }
            LogRecord::QueueRemove { ids } => {
                self.queue.retain(|e| !ids.contains(&e.id));
            }
            LogRecord::CacheBulkPut {
                collection,
                refreshed_at_ms,
                records,
            } => {
                let table = self.cache.entry(collection.clone()).or_default();
                for fields in records {
                    let Some(key) = cache_key(&fields, key_field) else {
                        continue;
                    };
                    table.insert(
                        key.clone(),
                        CacheRecord {
                            collection: collection.clone(),
                            key,
                            fields,
                            refreshed_at_ms,
                        },
                    );
                }
            }
        }
    }

    /// Log records that rebuild this state from nothing.
    fn snapshot(&self) -> Vec<LogRecord> {
        let mut records: Vec<LogRecord> = self
            .queue
            .iter()
            .map(|entry| LogRecord::QueueAppend {
                entry: entry.clone(),
            })
            .collect();

        for (collection, table) in &self.cache {
            // One frame per refresh batch timestamp keeps refreshed_at_ms intact
            let mut batches: BTreeMap<u64, Vec<Record>> = BTreeMap::new();
            for record in table.values() {
                batches
                    .entry(record.refreshed_at_ms)
                    .or_default()
                    .push(record.fields.clone());
            }
            for (refreshed_at_ms, batch) in batches {
                records.push(LogRecord::CacheBulkPut {
                    collection: collection.clone(),
                    refreshed_at_ms,
                    records: batch,
                });
            }
        }

        records
    }
}

fn write_frame(backend: &mut dyn StorageBackend, frame: &[u8], sync: bool) -> StorageResult<()> {
    backend.append(frame)?;
    backend.flush()?;
    if sync {
        backend.sync()?;
    }
    Ok(())
}

fn cache_key(fields: &Record, key_field: &str) -> Option<String> {
    fields
        .get(key_field)
        .filter(|v| !v.is_null())
        .map(ToString::to_string)
}

/// Summary of the store's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Current log size in bytes.
    pub log_bytes: u64,
    /// Entries in the queue, synced or not.
    pub queue_len: usize,
    /// Entries awaiting dispatch.
    pub pending: usize,
    /// Entries acknowledged but not yet cleared.
    pub synced: usize,
    /// Record count per cache collection.
    pub cache_collections: Vec<(String, usize)>,
}

/// Outcome of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction.
    pub bytes_after: u64,
    /// Frames in the rewritten log.
    pub frames_written: usize,
}

impl CompactionStats {
    /// Bytes reclaimed.
    #[must_use]
    pub fn reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

impl LocalStore {
    /// Opens or creates a store in a directory.
    ///
    /// Acquires the directory lock, then replays `store.log`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::StoreLocked`] if another process has the store open
    /// - [`CoreError::LogCorruption`] if the log is damaged before its tail
    /// - I/O errors
    pub fn open(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open_with_create_dirs(&dir.log_path())?;
        Self::recover(config, Box::new(backend), Some(dir))
    }

    /// Opens a store over an arbitrary backend.
    ///
    /// Used for testing and for embedding with custom storage.
    pub fn with_backend(config: StoreConfig, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        Self::recover(config, backend, None)
    }

    /// Opens a fresh, non-persistent store.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::with_backend(StoreConfig::default(), Box::new(InMemoryBackend::new()))
    }

    fn recover(
        config: StoreConfig,
        mut backend: Box<dyn StorageBackend>,
        dir: Option<StoreDir>,
    ) -> CoreResult<Self> {
        let bytes = backend.read_all()?;
        let scan = log::scan(&bytes)?;

        if let ScanEnd::TornTail { valid_len, reason } = &scan.end {
            warn!(
                valid_len,
                dropped = bytes.len() as u64 - valid_len,
                reason = reason.as_str(),
                "truncating torn log tail"
            );
            backend.truncate(*valid_len)?;
            backend.sync()?;
        }

        let frames = scan.records.len();
        let mut state = StoreState::default();
        for (_, record) in scan.records {
            state.apply(record, &config.key_field);
        }

        debug!(
            frames,
            queue_len = state.queue.len(),
            cache_collections = state.cache.len(),
            "store recovered"
        );

        Ok(Self {
            config,
            log: Mutex::new(backend),
            state: RwLock::new(state),
            poisoned: AtomicBool::new(false),
            dir,
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the store directory, if the store lives in one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// Whether a failed rollback left the store refusing writes.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        if self.is_poisoned() {
            return Err(CoreError::Poisoned);
        }
        Ok(())
    }

    /// Durably appends one frame while `backend` is locked, then applies it.
    fn commit(&self, backend: &mut dyn StorageBackend, record: LogRecord) -> CoreResult<()> {
        self.ensure_writable()?;
        let frame = record.encode_frame()?;
        let before = backend.size()?;

        if let Err(e) = write_frame(backend, &frame, self.config.sync_on_write) {
            // Drop whatever part of the frame landed so the log stays parseable
            if let Err(undo) = backend.truncate(before) {
                // A later append would land behind the partial frame
                self.poisoned.store(true, Ordering::Release);
                error!(error = %undo, "failed to roll back partial log append; store poisoned");
            }
            return Err(e.into());
        }

        self.state.write().apply(record, &self.config.key_field);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queue partition
    // ------------------------------------------------------------------

    /// Appends a new entry at the end of the queue.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateEntry`] if the id is already queued, or any
    /// persistence failure.
    pub fn append_entry(&self, entry: QueueEntry) -> CoreResult<()> {
        let mut backend = self.log.lock();
        if self.state.read().queue.iter().any(|e| e.id == entry.id) {
            return Err(CoreError::DuplicateEntry(entry.id.to_string()));
        }
        self.commit(&mut **backend, LogRecord::QueueAppend { entry })
    }

    /// Marks an entry synced.
    ///
    /// Returns `false` without writing anything if the entry is unknown or
    /// already synced.
    pub fn mark_synced(&self, id: EntryId) -> CoreResult<bool> {
        let mut backend = self.log.lock();
        let needs_write = self
            .state
            .read()
            .queue
            .iter()
            .any(|e| e.id == id && !e.synced);
        if !needs_write {
            return Ok(false);
        }
        self.commit(&mut **backend, LogRecord::QueueMarkSynced { id })?;
        Ok(true)
    }

    /// Removes every synced entry, returning how many were removed.
    ///
    /// Compacts the log afterwards once it carries more than
    /// `compact_threshold` bytes of dead frames.
    pub fn remove_synced(&self) -> CoreResult<usize> {
        let mut backend = self.log.lock();
        let ids: Vec<EntryId> = self
            .state
            .read()
            .queue
            .iter()
            .filter(|e| e.synced)
            .map(|e| e.id)
            .collect();

        if ids.is_empty() {
            return Ok(0);
        }

        let removed = ids.len();
        self.commit(&mut **backend, LogRecord::QueueRemove { ids })?;

        // The removal is durable at this point; compaction is best effort
        if let Err(e) = self.auto_compact(&mut **backend) {
            warn!(error = %e, removed, "automatic compaction failed");
        }

        Ok(removed)
    }

    fn auto_compact(&self, backend: &mut dyn StorageBackend) -> CoreResult<()> {
        if backend.size()? <= self.config.compact_threshold {
            return Ok(());
        }
        let snapshot = self.encode_snapshot()?;
        let size = backend.size()?;
        if size.saturating_sub(snapshot.1.len() as u64) > self.config.compact_threshold {
            self.write_snapshot(backend, snapshot)?;
        }
        Ok(())
    }

    /// All queue entries in append order.
    #[must_use]
    pub fn queue_entries(&self) -> Vec<QueueEntry> {
        self.state.read().queue.clone()
    }

    /// Unsynced queue entries in append order.
    #[must_use]
    pub fn unsynced_entries(&self) -> Vec<QueueEntry> {
        self.state
            .read()
            .queue
            .iter()
            .filter(|e| !e.synced)
            .cloned()
            .collect()
    }

    /// Number of unsynced entries, counted from current state.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.read().queue.iter().filter(|e| !e.synced).count()
    }

    /// Total number of queue entries.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.state.read().queue.len()
    }

    /// Looks up one queue entry.
    #[must_use]
    pub fn queue_entry(&self, id: EntryId) -> Option<QueueEntry> {
        self.state.read().queue.iter().find(|e| e.id == id).cloned()
    }

    // ------------------------------------------------------------------
    // Cache partition
    // ------------------------------------------------------------------

    /// Upserts a batch of records into a cache collection as one frame.
    ///
    /// Either the whole batch becomes visible or none of it does. Returns
    /// the number of records written.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] if the collection name is empty or a
    /// record lacks the key field. Nothing is written in that case.
    pub fn cache_put_all(&self, collection: &str, records: Vec<Record>) -> CoreResult<usize> {
        if collection.is_empty() {
            return Err(CoreError::invalid_argument("cache collection name is empty"));
        }
        if let Some(position) = records
            .iter()
            .position(|r| cache_key(r, &self.config.key_field).is_none())
        {
            return Err(CoreError::invalid_argument(format!(
                "record {position} for cache collection `{collection}` has no `{}` field",
                self.config.key_field
            )));
        }
        if records.is_empty() {
            return Ok(0);
        }

        let count = records.len();
        let mut backend = self.log.lock();
        self.commit(
            &mut **backend,
            LogRecord::CacheBulkPut {
                collection: collection.to_string(),
                refreshed_at_ms: now_ms(),
                records,
            },
        )?;
        Ok(count)
    }

    /// Reads one cached record.
    #[must_use]
    pub fn cache_get(&self, collection: &str, key: &str) -> Option<CacheRecord> {
        self.state
            .read()
            .cache
            .get(collection)
            .and_then(|table| table.get(key))
            .cloned()
    }

    /// All cached records of a collection, ordered by key.
    #[must_use]
    pub fn cache_list(&self, collection: &str) -> Vec<CacheRecord> {
        self.state
            .read()
            .cache
            .get(collection)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of all cache collections.
    #[must_use]
    pub fn cache_collections(&self) -> Vec<String> {
        self.state.read().cache.keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Rewrites the log as a minimal snapshot of the current state.
    ///
    /// The replacement is atomic: a crash leaves either the old log or the
    /// new one.
    pub fn compact(&self) -> CoreResult<CompactionStats> {
        let mut backend = self.log.lock();
        let snapshot = self.encode_snapshot()?;
        self.write_snapshot(&mut **backend, snapshot)
    }

    fn encode_snapshot(&self) -> CoreResult<(usize, Vec<u8>)> {
        let records = self.state.read().snapshot();
        let mut bytes = Vec::new();
        for record in &records {
            bytes.extend(record.encode_frame()?);
        }
        Ok((records.len(), bytes))
    }

    fn write_snapshot(
        &self,
        backend: &mut dyn StorageBackend,
        (frames, bytes): (usize, Vec<u8>),
    ) -> CoreResult<CompactionStats> {
        self.ensure_writable()?;
        let bytes_before = backend.size()?;
        backend.replace(&bytes)?;
        backend.sync()?;

        let stats = CompactionStats {
            bytes_before,
            bytes_after: bytes.len() as u64,
            frames_written: frames,
        };
        info!(
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            frames = stats.frames_written,
            "log compacted"
        );
        Ok(stats)
    }

    /// Returns a summary of the store's contents.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        let log_bytes = self.log.lock().size()?;
        let state = self.state.read();
        let pending = state.queue.iter().filter(|e| !e.synced).count();
        Ok(StoreStats {
            log_bytes,
            queue_len: state.queue.len(),
            pending,
            synced: state.queue.len() - pending,
            cache_collections: state
                .cache
                .iter()
                .map(|(name, table)| (name.clone(), table.len()))
                .collect(),
        })
    }

    /// Flushes the log to durable storage.
    pub fn flush(&self) -> CoreResult<()> {
        let mut backend = self.log.lock();
        backend.flush()?;
        backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("LocalStore")
            .field("path", &self.path())
            .field("queue_len", &state.queue.len())
            .field("cache_collections", &state.cache.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Operation;
    use tempfile::tempdir;
    use tillsync_codec::{record, Value};

    fn entry(table: &str, payload: Record) -> QueueEntry {
        QueueEntry::new(table, Operation::Insert, payload)
    }

    fn reopen(backend: &InMemoryBackend) -> LocalStore {
        LocalStore::with_backend(StoreConfig::default(), Box::new(backend.clone())).unwrap()
    }

    /// Wraps an in-memory log with switchable failures.
    #[derive(Default)]
    struct FaultyBackend {
        inner: InMemoryBackend,
        /// `replace` fails.
        fail_replace: bool,
        /// `append` writes half its data then fails, and `truncate` fails.
        tear_appends: bool,
    }

    fn refused() -> tillsync_storage::StorageError {
        tillsync_storage::StorageError::WriteRefused("disk full".into())
    }

    impl StorageBackend for FaultyBackend {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }

        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            if self.tear_appends {
                self.inner.append(&data[..data.len() / 2])?;
                return Err(refused());
            }
            self.inner.append(data)
        }

        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }

        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }

        fn sync(&mut self) -> StorageResult<()> {
            self.inner.sync()
        }

        fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
            if self.tear_appends {
                return Err(refused());
            }
            self.inner.truncate(new_size)
        }

        fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
            if self.fail_replace {
                return Err(refused());
            }
            self.inner.replace(data)
        }
    }

    #[test]
    fn append_and_count() {
        let store = LocalStore::open_in_memory().unwrap();
        store.append_entry(entry("orders", record! { "total" => 1 })).unwrap();
        store.append_entry(entry("orders", record! { "total" => 2 })).unwrap();

        assert_eq!(store.pending_count(), 2);
        assert_eq!(store.queue_len(), 2);
    }

    #[test]
    fn duplicate_entry_rejected() {
        let store = LocalStore::open_in_memory().unwrap();
        let e = entry("orders", Record::new());
        store.append_entry(e.clone()).unwrap();
        assert!(matches!(
            store.append_entry(e),
            Err(CoreError::DuplicateEntry(_))
        ));
        assert_eq!(store.queue_len(), 1);
    }

    #[test]
    fn mark_synced_is_idempotent() {
        let backend = InMemoryBackend::new();
        let store = reopen(&backend);
        let e = entry("orders", Record::new());
        let id = e.id;
        store.append_entry(e).unwrap();

        assert!(store.mark_synced(id).unwrap());
        let size = backend.data().len();
        assert!(!store.mark_synced(id).unwrap());
        assert!(!store.mark_synced(EntryId::generate()).unwrap());
        assert_eq!(backend.data().len(), size);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn remove_synced_keeps_unsynced() {
        let store = LocalStore::open_in_memory().unwrap();
        let entries: Vec<_> = (0..3).map(|i| entry("orders", record! { "n" => i })).collect();
        for e in &entries {
            store.append_entry(e.clone()).unwrap();
        }
        store.mark_synced(entries[0].id).unwrap();
        store.mark_synced(entries[2].id).unwrap();

        assert_eq!(store.remove_synced().unwrap(), 2);
        let left = store.queue_entries();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, entries[1].id);
        assert_eq!(store.remove_synced().unwrap(), 0);
    }

    #[test]
    fn state_survives_reopen() {
        let backend = InMemoryBackend::new();
        let ids: Vec<EntryId> = {
            let store = reopen(&backend);
            let a = entry("orders", record! { "n" => 1 });
            let b = entry("stock", record! { "n" => 2 });
            let ids = vec![a.id, b.id];
            store.append_entry(a).unwrap();
            store.append_entry(b).unwrap();
            store.mark_synced(ids[0]).unwrap();
            store
                .cache_put_all("products", vec![record! { "id" => "P1", "name" => "Tea" }])
                .unwrap();
            ids
        };

        let store = reopen(&backend);
        let queue = store.queue_entries();
        assert_eq!(queue.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
        assert!(queue[0].synced);
        assert!(!queue[1].synced);
        assert_eq!(
            store.cache_get("products", "P1").unwrap().fields.get("name"),
            Some(&Value::from("Tea"))
        );
    }

    #[test]
    fn torn_tail_is_dropped_on_open() {
        let backend = InMemoryBackend::new();
        {
            let store = reopen(&backend);
            store.append_entry(entry("orders", record! { "n" => 1 })).unwrap();
            store.append_entry(entry("orders", record! { "n" => 2 })).unwrap();
        }
        backend.tear_tail(5);

        let store = reopen(&backend);
        assert_eq!(store.queue_len(), 1);
        assert_eq!(store.stats().unwrap().log_bytes, backend.data().len() as u64);

        // The log accepts appends again after the cut
        store.append_entry(entry("orders", record! { "n" => 3 })).unwrap();
        assert_eq!(reopen(&backend).queue_len(), 2);
    }

    #[test]
    fn failed_write_leaves_state_unchanged() {
        let backend = InMemoryBackend::new();
        let store = reopen(&backend);
        store.append_entry(entry("orders", Record::new())).unwrap();

        backend.set_refuse_writes(true);
        let result = store.append_entry(entry("orders", Record::new()));
        assert!(matches!(result, Err(CoreError::Storage(_))));
        assert_eq!(store.queue_len(), 1);

        backend.set_refuse_writes(false);
        assert_eq!(reopen(&backend).queue_len(), 1);
    }

    #[test]
    fn cache_batch_requires_keys() {
        let store = LocalStore::open_in_memory().unwrap();
        let result = store.cache_put_all(
            "stock",
            vec![record! { "id" => "S1" }, record! { "quantity" => 3 }],
        );
        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));
        assert!(store.cache_list("stock").is_empty());
    }

    #[test]
    fn cache_upserts_by_key() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .cache_put_all(
                "stock",
                vec![
                    record! { "id" => "S1", "quantity" => 3 },
                    record! { "id" => "S2", "quantity" => 7 },
                ],
            )
            .unwrap();
        store
            .cache_put_all("stock", vec![record! { "id" => "S1", "quantity" => 1 }])
            .unwrap();

        let rows = store.cache_list("stock");
        assert_eq!(rows.len(), 2);
        assert_eq!(
            store.cache_get("stock", "S1").unwrap().fields.get("quantity"),
            Some(&Value::from(1))
        );
        assert_eq!(store.cache_collections(), vec!["stock".to_string()]);
    }

    #[test]
    fn compact_preserves_state() {
        let backend = InMemoryBackend::new();
        let store = reopen(&backend);
        let mut keep = None;
        for i in 0..20 {
            let e = entry("orders", record! { "n" => i });
            let id = e.id;
            store.append_entry(e).unwrap();
            if i == 7 {
                keep = Some(id);
            } else {
                store.mark_synced(id).unwrap();
            }
        }
        store.remove_synced().unwrap();
        store
            .cache_put_all("products", vec![record! { "id" => 1, "name" => "Tea" }])
            .unwrap();

        let stats = store.compact().unwrap();
        assert!(stats.reclaimed() > 0);
        assert_eq!(stats.frames_written, 2);

        let reopened = reopen(&backend);
        assert_eq!(reopened.queue_entries()[0].id, keep.unwrap());
        assert_eq!(reopened.cache_list("products").len(), 1);
    }

    #[test]
    fn remove_synced_compacts_past_threshold() {
        let backend = InMemoryBackend::new();
        let config = StoreConfig::new().compact_threshold(256);
        let store = LocalStore::with_backend(config, Box::new(backend.clone())).unwrap();
        for i in 0..10 {
            let e = entry("orders", record! { "n" => i });
            let id = e.id;
            store.append_entry(e).unwrap();
            store.mark_synced(id).unwrap();
        }
        store.remove_synced().unwrap();
        assert!(backend.data().is_empty());
    }

    #[test]
    fn failed_compaction_still_reports_removal() {
        let log = InMemoryBackend::new();
        let backend = FaultyBackend {
            inner: log.clone(),
            fail_replace: true,
            ..FaultyBackend::default()
        };
        let config = StoreConfig::new().compact_threshold(64);
        let store = LocalStore::with_backend(config, Box::new(backend)).unwrap();

        let e = entry("orders", record! { "total" => 5000 });
        let id = e.id;
        store.append_entry(e).unwrap();
        store.mark_synced(id).unwrap();

        assert_eq!(store.remove_synced().unwrap(), 1);
        assert_eq!(store.queue_len(), 0);
        assert!(!log.data().is_empty());
        assert_eq!(reopen(&log).queue_len(), 0);
    }

    #[test]
    fn failed_rollback_poisons_store() {
        let log = InMemoryBackend::new();
        let store = reopen(&log);
        store.append_entry(entry("orders", record! { "n" => 1 })).unwrap();
        drop(store);

        let backend = FaultyBackend {
            inner: log.clone(),
            tear_appends: true,
            ..FaultyBackend::default()
        };
        let store = LocalStore::with_backend(StoreConfig::default(), Box::new(backend)).unwrap();
        let first = store.append_entry(entry("orders", record! { "n" => 2 }));
        assert!(matches!(first, Err(CoreError::Storage(_))));
        assert!(store.is_poisoned());

        let second = store.append_entry(entry("orders", record! { "n" => 3 }));
        assert!(matches!(second, Err(CoreError::Poisoned)));
        assert!(matches!(store.compact(), Err(CoreError::Poisoned)));
        assert_eq!(store.queue_len(), 1);

        // Only the torn frame follows the committed one, so recovery cuts it
        assert_eq!(reopen(&log).queue_len(), 1);
    }

    #[test]
    fn stats_counts() {
        let store = LocalStore::open_in_memory().unwrap();
        let a = entry("orders", Record::new());
        store.append_entry(a.clone()).unwrap();
        store.append_entry(entry("orders", Record::new())).unwrap();
        store.mark_synced(a.id).unwrap();
        store
            .cache_put_all("stock", vec![record! { "id" => "S1" }])
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.queue_len, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.cache_collections, vec![("stock".to_string(), 1)]);
        assert!(stats.log_bytes > 0);
    }

    #[test]
    fn file_store_reopens() {
        let tmp = tempdir().unwrap();
        let id = {
            let store = LocalStore::open(tmp.path(), StoreConfig::default()).unwrap();
            let e = entry("orders", record! { "entity_id" => "E1", "total" => 5000 });
            let id = e.id;
            store.append_entry(e).unwrap();
            assert!(matches!(
                LocalStore::open(tmp.path(), StoreConfig::default()),
                Err(CoreError::StoreLocked)
            ));
            id
        };

        let store = LocalStore::open(tmp.path(), StoreConfig::default()).unwrap();
        assert_eq!(store.path(), Some(tmp.path()));
        assert_eq!(store.queue_entry(id).unwrap().table, "orders");
    }
}
