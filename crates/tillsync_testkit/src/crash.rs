//! Crash simulation for the local store.
//!
//! [`CrashableBackend`] wraps an [`InMemoryBackend`] and fails part-way
//! through a write, leaving a torn frame behind exactly as a power loss
//! would. Reopening a store over the inner backend then exercises recovery.
//!
//! ## Usage
//!
//! ```rust
//! use tillsync_core::{LocalStore, Operation, StoreConfig};
//! use tillsync_testkit::{sample_order, CrashableBackend};
//!
//! let crashable = CrashableBackend::new();
//! let bytes = crashable.inner().clone();
//! let store = LocalStore::with_backend(StoreConfig::default(), Box::new(crashable.clone())).unwrap();
//!
//! let queue = tillsync_core::MutationQueue::new(std::sync::Arc::new(store));
//! queue.enqueue("orders", Operation::Insert, sample_order("E1", 5000)).unwrap();
//!
//! crashable.crash_after(10);
//! assert!(queue.enqueue("orders", Operation::Insert, sample_order("E2", 700)).is_err());
//! drop(queue);
//!
//! let recovered = LocalStore::with_backend(StoreConfig::default(), Box::new(bytes)).unwrap();
//! assert_eq!(recovered.pending_count(), 1);
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tillsync_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};

#[derive(Debug)]
struct CrashState {
    /// Bytes still accepted before the crash; `usize::MAX` when disarmed.
    budget: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

/// A storage backend that can crash in the middle of a write.
///
/// Clones share the crash switches and the underlying bytes.
#[derive(Debug, Clone)]
pub struct CrashableBackend {
    inner: InMemoryBackend,
    state: Arc<CrashState>,
}

impl Default for CrashableBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CrashableBackend {
    /// Creates a crashable backend over empty storage.
    pub fn new() -> Self {
        Self::wrap(InMemoryBackend::new())
    }

    /// Wraps an existing in-memory backend.
    pub fn wrap(inner: InMemoryBackend) -> Self {
        Self {
            inner,
            state: Arc::new(CrashState {
                budget: AtomicUsize::new(usize::MAX),
                crashed: AtomicBool::new(false),
                fail_on_sync: AtomicBool::new(false),
            }),
        }
    }

    /// The bytes that survive a crash.
    pub fn inner(&self) -> &InMemoryBackend {
        &self.inner
    }

    /// Crashes once `bytes` more bytes have been appended; the write that
    /// crosses the limit lands only partially.
    pub fn crash_after(&self, bytes: usize) {
        self.state.budget.store(bytes, Ordering::SeqCst);
    }

    /// Makes `sync` fail, as a disk that refuses to flush would.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.state.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Disarms every crash switch.
    pub fn reset(&self) {
        self.state.budget.store(usize::MAX, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.fail_on_sync.store(false, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.state.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::other(format!("simulated crash during {what}")))
    }

    fn check_alive(&self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(StorageError::Io(io::Error::other("backend has crashed")));
        }
        Ok(())
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.check_alive()?;
        let budget = self.state.budget.load(Ordering::SeqCst);

        if data.len() > budget {
            if budget > 0 {
                self.inner.append(&data[..budget])?;
            }
            self.state.budget.store(0, Ordering::SeqCst);
            return Err(self.crash("append"));
        }

        if budget != usize::MAX {
            self.state.budget.store(budget - data.len(), Ordering::SeqCst);
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_alive()?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_alive()?;
        if self.state.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.crash("sync"));
        }
        self.inner.sync()
    }

    // A crashed process never gets to clean up after itself.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_alive()?;
        self.inner.truncate(new_size)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.check_alive()?;
        if data.len() > self.state.budget.load(Ordering::SeqCst) {
            return Err(self.crash("replace"));
        }
        self.inner.replace(data)
    }
}
