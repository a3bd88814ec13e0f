//! Test fixtures and store helpers.
//!
//! Provides stores that clean up after themselves and can be reopened over
//! the bytes they left behind, plus sample payloads for the retail tables.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tillsync_codec::{record, Record};
use tillsync_core::{CacheStore, LocalStore, MutationQueue, Operation, StoreConfig};
use tillsync_storage::InMemoryBackend;

enum Location {
    Memory(InMemoryBackend),
    File { dir: TempDir, path: PathBuf },
}

/// A local store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<LocalStore>,
    config: StoreConfig,
    location: Location,
}

impl TestStore {
    /// Creates an in-memory store.
    pub fn memory() -> Self {
        Self::memory_with_config(StoreConfig::default())
    }

    /// Creates an in-memory store with the given configuration.
    pub fn memory_with_config(config: StoreConfig) -> Self {
        let backend = InMemoryBackend::new();
        let store = LocalStore::with_backend(config.clone(), Box::new(backend.clone()))
            .expect("Failed to open in-memory store");
        Self {
            store: Arc::new(store),
            config,
            location: Location::Memory(backend),
        }
    }

    /// Creates a store in a fresh temporary directory.
    pub fn file() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("store");
        let config = StoreConfig::default();
        let store = LocalStore::open(&path, config.clone()).expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            config,
            location: Location::File { dir, path },
        }
    }

    /// Drops the store and opens it again over the same bytes, as a process
    /// restart would.
    ///
    /// Panics if another handle to the store is still alive.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            config,
            location,
        } = self;
        assert!(
            Arc::strong_count(&store) == 1,
            "store handles still alive; drop them before reopening"
        );
        drop(store);

        let store = match &location {
            Location::Memory(backend) => {
                LocalStore::with_backend(config.clone(), Box::new(backend.clone()))
            }
            Location::File { path, .. } => LocalStore::open(path, config.clone()),
        }
        .expect("Failed to reopen store");

        Self {
            store: Arc::new(store),
            config,
            location,
        }
    }

    /// The shared in-memory backend, for memory stores.
    pub fn backend(&self) -> Option<&InMemoryBackend> {
        match &self.location {
            Location::Memory(backend) => Some(backend),
            Location::File { .. } => None,
        }
    }

    /// The store directory, for file stores.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::Memory(_) => None,
            Location::File { path, .. } => Some(path),
        }
    }

    /// The temporary directory holding a file store.
    pub fn temp_dir(&self) -> Option<&Path> {
        match &self.location {
            Location::Memory(_) => None,
            Location::File { dir, .. } => Some(dir.path()),
        }
    }

    /// A queue over this store.
    pub fn queue(&self) -> MutationQueue {
        MutationQueue::new(Arc::clone(&self.store))
    }

    /// A cache view over this store.
    pub fn cache(&self) -> CacheStore {
        CacheStore::new(Arc::clone(&self.store))
    }
}

impl Deref for TestStore {
    type Target = LocalStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust
/// use tillsync_testkit::with_temp_store;
///
/// let pending = with_temp_store(|store| store.pending_count());
/// assert_eq!(pending, 0);
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&LocalStore) -> R,
{
    let store = TestStore::memory();
    f(&store)
}

/// An order insert payload.
pub fn sample_order(entity_id: &str, total: i64) -> Record {
    record! { "entity_id" => entity_id, "total" => total }
}

/// A stock update payload.
pub fn stock_update(id: &str, quantity: i64) -> Record {
    record! { "id" => id, "quantity" => quantity }
}

/// A product row as the remote store would return it.
pub fn sample_product(id: &str, business_id: &str, name: &str) -> Record {
    record! { "id" => id, "business_id" => business_id, "name" => name }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A store holding `count` order inserts recorded while offline.
    pub fn offline_orders(count: usize) -> TestStore {
        let store = TestStore::memory();
        let queue = store.queue();
        for i in 0..count {
            queue
                .enqueue(
                    "orders",
                    Operation::Insert,
                    sample_order(&format!("E{i}"), 1000 + i as i64),
                )
                .expect("Failed to enqueue order");
        }
        store
    }

    /// A store whose cache already holds products for two businesses.
    pub fn cached_products() -> TestStore {
        let store = TestStore::memory();
        store
            .cache()
            .upsert_all(
                "products",
                vec![
                    sample_product("P1", "B1", "Tea"),
                    sample_product("P2", "B1", "Sugar"),
                    sample_product("P3", "B2", "Milk"),
                ],
            )
            .expect("Failed to fill cache");
        store
    }
}
