use super::{CacheStorage, RecordPath};
use core::sync::atomic::{AtomicBool, Ordering};
use hashbrown::HashMap;
use std::io;

/// Storage keeping every record in memory.
///
/// Mostly useful for tests and for processes that don't want to touch the filesystem. Reads and
/// writes can be made to fail on demand to exercise the degraded paths of the tuning cache.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: spin::RwLock<HashMap<RecordPath, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following read fail with an I/O error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Make every following write, removal and clear fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Number of records stored.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no record is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "memory storage is read-only",
            ));
        }
        Ok(())
    }
}

impl CacheStorage for MemoryStorage {
    fn read(&self, path: &RecordPath) -> io::Result<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(io::Error::other("memory storage is unreadable"));
        }

        Ok(self.records.read().get(path).cloned())
    }

    fn write(&self, path: &RecordPath, content: &[u8]) -> io::Result<()> {
        self.check_writable()?;
        self.records.write().insert(path.clone(), content.to_vec());
        Ok(())
    }

    fn remove(&self, path: &RecordPath) -> io::Result<bool> {
        self.check_writable()?;
        Ok(self.records.write().remove(path).is_some())
    }

    fn list(&self) -> io::Result<Vec<RecordPath>> {
        let mut paths: Vec<RecordPath> = self.records.read().keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }

    fn clear(&self) -> io::Result<()> {
        self.check_writable()?;
        self.records.write().clear();
        Ok(())
    }
}
