use super::{CacheStorage, RECORD_EXTENSION, RecordPath};
use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

const TMP_EXTENSION: &str = "tmp";

/// Storage keeping one file per record under a root directory.
///
/// Records are the `.json` files found exactly `depth` directories below the root, nothing else
/// is ever listed or removed, so the root may be shared with unrelated files.
///
/// Writes go to a temporary file next to the final one which is then renamed over it, so a
/// record on disk is always complete. Temporary files left behind by a crashed writer are never
/// reported as records.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    depth: usize,
}

impl FileStorage {
    /// Create a file storage rooted at the given directory, for record paths of `depth`
    /// segments.
    ///
    /// The directory is created lazily on the first write.
    pub fn new<P: Into<PathBuf>>(root: P, depth: usize) -> Self {
        Self {
            root: root.into(),
            depth,
        }
    }

    /// The root directory of the storage.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file path of a record.
    pub fn file_path(&self, path: &RecordPath) -> PathBuf {
        let mut file = self.root.clone();
        for segment in path.segments() {
            file.push(segment);
        }
        file
    }

    fn is_record(&self, path: &RecordPath) -> bool {
        path.segments().len() == self.depth && path.name().is_some_and(is_record_name)
    }

    fn check_record(&self, path: &RecordPath) -> io::Result<()> {
        match self.is_record(path) {
            true => Ok(()),
            false => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{path} is not a record path of depth {}", self.depth),
            )),
        }
    }

    fn temporary_path(target: &Path) -> io::Result<PathBuf> {
        let name = target
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "record without a name"))?;
        let suffix: u64 = rand::random();

        Ok(target.with_file_name(format!(
            ".{name}.{}-{suffix:016x}.{TMP_EXTENSION}",
            std::process::id()
        )))
    }

    /// Visit the record directories and collect the records and stray temporaries they hold.
    fn walk(&self, dir: &Path, segments: &mut Vec<String>, found: &mut Found) -> io::Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        let at_record_depth = segments.len() + 1 == self.depth;

        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            let file_type = entry.file_type()?;

            if file_type.is_dir() && !at_record_depth {
                segments.push(name);
                self.walk(&entry.path(), segments, found)?;
                segments.pop();
            } else if file_type.is_file() && at_record_depth {
                if is_temporary(&name) {
                    log::debug!("Skipping stray temporary file {:?}", entry.path());
                    found.temporaries.push(entry.path());
                } else if is_record_name(&name) {
                    segments.push(name);
                    found.records.push(RecordPath::new(segments.iter()));
                    segments.pop();
                }
            }
        }

        Ok(())
    }

    fn found(&self) -> io::Result<Found> {
        let mut found = Found::default();
        if self.depth > 0 {
            self.walk(&self.root, &mut Vec::new(), &mut found)?;
        }
        Ok(found)
    }

    /// Remove the directories between `file` and the root that are left empty.
    fn prune_parents(&self, file: &Path) {
        let mut dir = file.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            match fs::remove_dir(current) {
                Ok(()) => dir = current.parent(),
                Err(err) if err.kind() == io::ErrorKind::NotFound => dir = current.parent(),
                Err(err) if err.kind() == io::ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    log::warn!("Can't prune cache directory {current:?}: {err}");
                    break;
                }
            }
        }
    }
}

#[derive(Default)]
struct Found {
    records: Vec<RecordPath>,
    temporaries: Vec<PathBuf>,
}

fn is_record_name(name: &str) -> bool {
    !name.starts_with('.')
        && Path::new(name)
            .extension()
            .is_some_and(|extension| extension == RECORD_EXTENSION)
}

fn is_temporary(name: &str) -> bool {
    name.starts_with('.')
        && name.ends_with(TMP_EXTENSION)
        && name.contains(&format!(".{RECORD_EXTENSION}."))
}

impl CacheStorage for FileStorage {
    fn read(&self, path: &RecordPath) -> io::Result<Option<Vec<u8>>> {
        self.check_record(path)?;
        match fs::read(self.file_path(path)) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn write(&self, path: &RecordPath, content: &[u8]) -> io::Result<()> {
        self.check_record(path)?;
        let target = self.file_path(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let temporary = Self::temporary_path(&target)?;
        let written = File::create(&temporary).and_then(|mut file| {
            file.write_all(content)?;
            file.sync_all()
        });

        match written.and_then(|_| fs::rename(&temporary, &target)) {
            Ok(()) => Ok(()),
            Err(err) => {
                fs::remove_file(&temporary).ok();
                Err(err)
            }
        }
    }

    fn remove(&self, path: &RecordPath) -> io::Result<bool> {
        self.check_record(path)?;
        match fs::remove_file(self.file_path(path)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn list(&self) -> io::Result<Vec<RecordPath>> {
        let mut records = self.found()?.records;
        records.sort();
        Ok(records)
    }

    fn clear(&self) -> io::Result<()> {
        let found = self.found()?;

        for path in found.records.iter() {
            self.remove(path)?;
            self.prune_parents(&self.file_path(path));
        }
        for temporary in found.temporaries.iter() {
            match fs::remove_file(temporary) {
                Ok(()) => self.prune_parents(temporary),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn temp_root(name: &str) -> PathBuf {
        let suffix: u64 = rand::random();
        std::env::temp_dir().join(format!("gridprim-{name}-{suffix:016x}"))
    }

    #[test]
    fn missing_record_reads_as_none() {
        let storage = FileStorage::new(temp_root("missing"), 3);
        let path = RecordPath::new(["scan", "v1", "key.json"]);

        assert_eq!(storage.read(&path).unwrap(), None);
        assert!(!storage.remove(&path).unwrap());
        assert!(storage.list().unwrap().is_empty());
    }

    #[test]
    fn write_replaces_previous_record() {
        let root = temp_root("replace");
        let storage = FileStorage::new(&root, 4);
        let path = RecordPath::new(["reduce", "v1", "device", "key.json"]);

        storage.write(&path, b"{\"old\":1}").unwrap();
        storage.write(&path, b"{\"new\":2}").unwrap();

        assert_eq!(storage.read(&path).unwrap(), Some(b"{\"new\":2}".to_vec()));
        assert_eq!(storage.list().unwrap(), vec![path]);

        storage.clear().unwrap();
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn paths_outside_the_record_layout_are_rejected() {
        let root = temp_root("layout");
        let storage = FileStorage::new(&root, 3);

        let shallow = RecordPath::new(["scan", "key.json"]);
        let not_json = RecordPath::new(["scan", "v1", "key.txt"]);

        for path in [shallow, not_json] {
            let err = storage.write(&path, b"{}").unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
            assert!(storage.read(&path).is_err());
            assert!(storage.remove(&path).is_err());
        }
        assert!(!root.exists());
    }

    #[test]
    fn stray_temporaries_are_not_records() {
        let root = temp_root("stray");
        let storage = FileStorage::new(&root, 3);
        let path = RecordPath::new(["scan", "v1", "key.json"]);
        storage.write(&path, b"{}").unwrap();

        let stray = storage.file_path(&path).with_file_name(".key.json.42-00ff.tmp");
        fs::write(&stray, b"{\"partial").unwrap();

        assert_eq!(storage.list().unwrap(), vec![path]);

        storage.clear().unwrap();
        assert!(!stray.exists());
        assert!(storage.list().unwrap().is_empty());
        assert!(!root.join("scan").exists());
        assert!(root.exists());
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn clear_only_removes_records() {
        let root = temp_root("foreign");
        let storage = FileStorage::new(&root, 3);
        let scan = RecordPath::new(["scan", "v1", "key.json"]);
        let reduce = RecordPath::new(["reduce", "v1", "key.json"]);
        storage.write(&scan, b"{}").unwrap();
        storage.write(&reduce, b"{}").unwrap();

        let notes = root.join("notes.txt");
        let photo = root.join("photos").join("holiday.jpg");
        let nested = root.join("reduce").join("v1").join("backup").join("old.json");
        let beside = root.join("reduce").join("v1").join("readme.txt");
        fs::create_dir_all(photo.parent().unwrap()).unwrap();
        fs::create_dir_all(nested.parent().unwrap()).unwrap();
        fs::write(&notes, b"notes").unwrap();
        fs::write(&photo, b"jpeg").unwrap();
        fs::write(&nested, b"{}").unwrap();
        fs::write(&beside, b"readme").unwrap();

        assert_eq!(storage.list().unwrap(), vec![reduce.clone(), scan.clone()]);

        storage.clear().unwrap();

        assert!(notes.exists());
        assert!(photo.exists());
        assert!(nested.exists());
        assert!(beside.exists());
        assert!(!storage.file_path(&reduce).exists());
        assert!(!root.join("scan").exists());
        assert!(storage.list().unwrap().is_empty());

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn concurrent_writers_never_produce_partial_records() {
        let root = temp_root("concurrent");
        let storage = Arc::new(FileStorage::new(&root, 3));
        let shared = RecordPath::new(["radixsort", "v1", "shared.json"]);
        let contents: Vec<Vec<u8>> = (0..8u8).map(|i| vec![b'a' + i; 4096]).collect();
        let own = |i: usize| {
            let name = format!("own-{i}.json");
            RecordPath::new(["radixsort", "v1", name.as_str()])
        };

        let handles: Vec<_> = (0..8usize)
            .map(|i| {
                let storage = storage.clone();
                let shared = shared.clone();
                let own = own(i);
                let content = contents[i].clone();
                std::thread::spawn(move || {
                    for _ in 0..16 {
                        storage.write(&shared, &content).unwrap();
                        storage.write(&own, &content).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let last = storage.read(&shared).unwrap().unwrap();
        assert!(contents.contains(&last));
        for i in 0..8usize {
            assert_eq!(storage.read(&own(i)).unwrap(), Some(contents[i].clone()));
        }
        assert_eq!(storage.list().unwrap().len(), 9);

        fs::remove_dir_all(root).ok();
    }
}
