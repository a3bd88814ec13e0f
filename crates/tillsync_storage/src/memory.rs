//! In-memory storage backend for tests and ephemeral sessions.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Cloning yields another handle to the **same** bytes. Tests keep a clone
/// to reopen a store over the bytes a previous instance left behind
/// (simulating a process restart), to tear the tail (simulating a crash
/// mid-write) or to refuse writes (simulating a full disk).
///
/// # Example
///
/// ```rust
/// use tillsync_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let observer = backend.clone();
/// backend.append(b"test data").unwrap();
/// assert_eq!(observer.size().unwrap(), 9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
    refuse_writes: Arc<AtomicBool>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            refuse_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Drops the last `n` bytes, as a crash in the middle of a write would.
    pub fn tear_tail(&self, n: usize) {
        let mut data = self.data.write();
        let keep = data.len().saturating_sub(n);
        data.truncate(keep);
    }

    /// Makes every subsequent write fail (or succeed again).
    pub fn set_refuse_writes(&self, refuse: bool) {
        self.refuse_writes.store(refuse, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.refuse_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRefused("in-memory backend is read-only".into()));
        }
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        self.check_writable()?;
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_writable()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_writable()?;
        let mut data = self.data.write();
        let size = data.len() as u64;

        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }

        data.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, new_data: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        *self.data.write() = new_data.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read() {
        let mut backend = InMemoryBackend::new();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(&backend.read_at(0, 11).unwrap(), b"hello world");
        assert_eq!(&backend.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn read_past_end_fails() {
        let backend = InMemoryBackend::with_data(b"hello".to_vec());
        let result = backend.read_at(3, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn clones_share_bytes() {
        let mut backend = InMemoryBackend::new();
        let observer = backend.clone();

        backend.append(b"shared").unwrap();
        assert_eq!(observer.data(), b"shared".to_vec());
    }

    #[test]
    fn tear_tail_drops_bytes() {
        let backend = InMemoryBackend::with_data(b"abcdef".to_vec());
        backend.tear_tail(2);
        assert_eq!(backend.data(), b"abcd".to_vec());

        backend.tear_tail(100);
        assert!(backend.data().is_empty());
    }

    #[test]
    fn refused_writes_fail_and_recover() {
        let mut backend = InMemoryBackend::new();
        backend.set_refuse_writes(true);

        assert!(matches!(
            backend.append(b"x"),
            Err(StorageError::WriteRefused(_))
        ));
        assert_eq!(backend.size().unwrap(), 0);

        backend.set_refuse_writes(false);
        assert!(backend.append(b"x").is_ok());
    }

    #[test]
    fn truncate_and_replace() {
        let mut backend = InMemoryBackend::with_data(b"hello world".to_vec());

        backend.truncate(5).unwrap();
        assert_eq!(backend.data(), b"hello".to_vec());
        assert!(matches!(
            backend.truncate(10),
            Err(StorageError::TruncateBeyondEnd { .. })
        ));

        backend.replace(b"fresh").unwrap();
        assert_eq!(backend.data(), b"fresh".to_vec());
    }

    proptest::proptest! {
        #[test]
        fn appends_land_at_returned_offsets(
            chunks in proptest::collection::vec(proptest::collection::vec(proptest::num::u8::ANY, 1..64), 1..16)
        ) {
            let mut backend = InMemoryBackend::new();
            let mut offsets = Vec::new();
            for chunk in &chunks {
                offsets.push(backend.append(chunk).unwrap());
            }
            for (chunk, offset) in chunks.iter().zip(offsets) {
                proptest::prop_assert_eq!(&backend.read_at(offset, chunk.len()).unwrap(), chunk);
            }
        }
    }
}
