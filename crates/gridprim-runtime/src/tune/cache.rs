use super::{AutotuneKey, TuningKey, TuningParameters};
use crate::CacheError;
use gridprim_common::storage::{CacheStorage, MemoryStorage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Layout revision of persisted records.
pub const RECORD_VERSION: u32 = 1;

/// A tuning result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "P: AutotuneKey")]
pub struct CacheEntry<P> {
    /// The key the parameters were tuned for.
    pub key: TuningKey<P>,
    /// The selected parameters.
    pub parameters: TuningParameters,
    /// Score of the selected parameters, lower is better.
    pub score: f64,
    /// Seconds since the unix epoch when the entry was produced.
    pub timestamp: u64,
    /// Checksum of the candidate space the parameters were selected from.
    pub checksum: String,
}

impl<P: AutotuneKey> CacheEntry<P> {
    /// Create an entry timestamped now.
    pub fn new(
        key: TuningKey<P>,
        parameters: TuningParameters,
        score: f64,
        checksum: String,
    ) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or_default();

        Self {
            key,
            parameters,
            score,
            timestamp,
            checksum,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "P: AutotuneKey")]
struct PersistentRecord<P> {
    record_version: u32,
    entry: CacheEntry<P>,
}

/// Persistent mapping from [tuning keys](TuningKey) to [tuning results](CacheEntry).
///
/// Lookups never fail: missing, unreadable, malformed or mismatching records are all
/// reported as absent. Writes report their failures, which callers may ignore since the
/// tuned parameters stay valid in memory.
#[derive(Clone, Debug)]
pub struct CacheStore {
    storage: Arc<dyn CacheStorage>,
}

impl CacheStore {
    /// Create a cache store on top of the given storage.
    pub fn new<S: CacheStorage + 'static>(storage: S) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }

    /// Create a cache store sharing an existing storage.
    pub fn from_storage(storage: Arc<dyn CacheStorage>) -> Self {
        Self { storage }
    }

    /// A cache store that only lives as long as the process.
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    /// A cache store in the directory selected by the [global config](crate::config::GlobalConfig).
    #[cfg(std_io)]
    pub fn from_config() -> Self {
        let config = crate::config::GlobalConfig::get();
        let root = config.autotune.cache.root();
        log::debug!("Using tuning cache at {root:?}");

        Self::in_directory(root)
    }

    /// A cache store keeping its records under the given directory.
    ///
    /// Files of the directory that aren't records are never read nor removed.
    #[cfg(std_io)]
    pub fn in_directory<P: Into<std::path::PathBuf>>(root: P) -> Self {
        Self::new(gridprim_common::storage::FileStorage::new(root, super::RECORD_DEPTH))
    }

    /// The underlying storage.
    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Find the entry of a key.
    pub fn lookup<P: AutotuneKey>(&self, key: &TuningKey<P>) -> Option<CacheEntry<P>> {
        let path = match key.record_path() {
            Ok(path) => path,
            Err(err) => {
                log::warn!("{err}");
                return None;
            }
        };

        let content = match self.storage.read(&path) {
            Ok(Some(content)) => content,
            Ok(None) => return None,
            Err(err) => {
                log::warn!("Can't read tuning record {path}, treating it as missing: {err}");
                return None;
            }
        };

        let record: PersistentRecord<P> = match serde_json::from_slice(&content) {
            Ok(record) => record,
            Err(err) => {
                log::warn!("Ignoring malformed tuning record {path}: {err}");
                return None;
            }
        };

        if record.record_version != RECORD_VERSION {
            log::info!(
                "Ignoring tuning record {path} with layout v{}",
                record.record_version
            );
            return None;
        }

        if record.entry.key != *key {
            log::warn!("Ignoring tuning record {path} stored for another key");
            return None;
        }

        Some(record.entry)
    }

    /// Persist an entry, replacing any previous entry of the same key.
    pub fn store<P: AutotuneKey>(&self, entry: &CacheEntry<P>) -> Result<(), CacheError> {
        let path = entry.key.record_path()?;
        let record = PersistentRecord {
            record_version: RECORD_VERSION,
            entry: entry.clone(),
        };
        let content =
            serde_json::to_vec_pretty(&record).map_err(|err| CacheError::Serialization {
                path: path.to_string(),
                reason: err.to_string(),
            })?;

        self.storage
            .write(&path, &content)
            .map_err(|err| CacheError::Io {
                path: path.to_string(),
                reason: err.to_string(),
            })
    }

    /// Remove the entry of a key, returning whether an entry existed.
    pub fn clear<P: AutotuneKey>(&self, key: &TuningKey<P>) -> Result<bool, CacheError> {
        let path = key.record_path()?;

        self.storage
            .remove(&path)
            .map_err(|err| CacheError::Remove {
                path: path.to_string(),
                reason: err.to_string(),
            })
    }

    /// Remove every entry.
    pub fn clear_all(&self) -> Result<(), CacheError> {
        self.storage.clear().map_err(|err| CacheError::Remove {
            path: "*".into(),
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ComputeBackend;
    use crate::testing::DummyBackend;
    use pretty_assertions::assert_eq;

    fn key(problem: &str) -> TuningKey<String> {
        let device = DummyBackend::gpu().properties().fingerprint();
        TuningKey::new("reduce", device, problem.to_string(), 1)
    }

    fn entry(problem: &str, blocks: u32) -> CacheEntry<String> {
        CacheEntry::new(
            key(problem),
            TuningParameters::new().with("reduce_blocks", blocks),
            1.5,
            "checksum".into(),
        )
    }

    #[test_log::test]
    fn lookup_returns_stored_parameters_until_overwritten() {
        let cache = CacheStore::in_memory();

        assert_eq!(cache.lookup(&key("int")), None);
        cache.store(&entry("int", 64)).unwrap();
        assert_eq!(
            cache.lookup(&key("int")).unwrap().parameters,
            entry("int", 64).parameters
        );

        cache.store(&entry("int", 128)).unwrap();
        assert_eq!(
            cache.lookup(&key("int")).unwrap().parameters,
            entry("int", 128).parameters
        );
        assert_eq!(cache.lookup(&key("float")), None);
    }

    #[test_log::test]
    fn corrupted_and_deleted_records_are_absent() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = CacheStore::from_storage(storage.clone());
        let path = key("int").record_path().unwrap();

        cache.store(&entry("int", 64)).unwrap();
        storage.write(&path, b"{\"record_version\":1,\"ent").unwrap();
        assert_eq!(cache.lookup(&key("int")), None);

        cache.store(&entry("int", 64)).unwrap();
        storage.remove(&path).unwrap();
        assert_eq!(cache.lookup(&key("int")), None);
    }

    #[test_log::test]
    fn record_of_another_key_is_absent() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = CacheStore::from_storage(storage.clone());
        cache.store(&entry("float", 64)).unwrap();

        let content = storage
            .read(&key("float").record_path().unwrap())
            .unwrap()
            .unwrap();
        storage
            .write(&key("int").record_path().unwrap(), &content)
            .unwrap();

        assert_eq!(cache.lookup(&key("int")), None);
    }

    #[test_log::test]
    fn format_version_mismatch_is_absent() {
        let cache = CacheStore::in_memory();
        cache.store(&entry("int", 64)).unwrap();

        let mut newer = key("int");
        newer.format_version = 2;

        assert_eq!(cache.lookup(&newer), None);
    }

    #[test_log::test]
    fn read_failures_are_misses_and_write_failures_are_errors() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = CacheStore::from_storage(storage.clone());
        cache.store(&entry("int", 64)).unwrap();

        storage.set_fail_reads(true);
        assert_eq!(cache.lookup(&key("int")), None);

        storage.set_fail_writes(true);
        assert!(matches!(
            cache.store(&entry("int", 128)),
            Err(CacheError::Io { .. })
        ));
        assert!(matches!(
            cache.clear(&key("int")),
            Err(CacheError::Remove { .. })
        ));
        assert!(matches!(cache.clear_all(), Err(CacheError::Remove { .. })));
    }

    #[test_log::test]
    fn clear_removes_entries() {
        let cache = CacheStore::in_memory();
        cache.store(&entry("int", 64)).unwrap();
        cache.store(&entry("float", 64)).unwrap();

        assert!(cache.clear(&key("int")).unwrap());
        assert!(!cache.clear(&key("int")).unwrap());
        assert_eq!(cache.lookup(&key("int")), None);
        assert!(cache.lookup(&key("float")).is_some());

        cache.clear_all().unwrap();
        assert_eq!(cache.lookup(&key("float")), None);
    }

    #[cfg(std_io)]
    #[test_log::test]
    fn file_store_round_trip() {
        let suffix: u64 = rand::random();
        let root = std::env::temp_dir().join(format!("gridprim-cache-{suffix:016x}"));
        let cache = CacheStore::in_directory(&root);

        cache.store(&entry("int", 64)).unwrap();
        let reopened = CacheStore::in_directory(&root);

        assert_eq!(
            reopened.lookup(&key("int")),
            Some(cache.lookup(&key("int")).unwrap())
        );

        std::fs::remove_dir_all(root).ok();
    }

    #[cfg(std_io)]
    #[test_log::test]
    fn clear_all_keeps_files_it_did_not_write() {
        let suffix: u64 = rand::random();
        let root = std::env::temp_dir().join(format!("gridprim-shared-{suffix:016x}"));
        let cache = CacheStore::in_directory(&root);
        cache.store(&entry("int", 64)).unwrap();
        cache.store(&entry("float", 64)).unwrap();

        let notes = root.join("notes.txt");
        let photo = root.join("photos").join("holiday.jpg");
        let settings = root.join("reduce").join("settings.json");
        std::fs::create_dir_all(photo.parent().unwrap()).unwrap();
        std::fs::create_dir_all(settings.parent().unwrap()).unwrap();
        std::fs::write(&notes, b"notes").unwrap();
        std::fs::write(&photo, b"jpeg").unwrap();
        std::fs::write(&settings, b"{}").unwrap();

        cache.clear_all().unwrap();

        assert_eq!(cache.lookup(&key("int")), None);
        assert_eq!(cache.lookup(&key("float")), None);
        assert!(notes.exists());
        assert!(photo.exists());
        assert!(settings.exists());
        assert!(!root.join("reduce").join("v1").exists());

        std::fs::remove_dir_all(root).ok();
    }
}
