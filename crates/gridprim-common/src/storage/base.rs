use core::fmt::{Debug, Display};
use std::io;

/// Extension of record names.
pub const RECORD_EXTENSION: &str = "json";

/// Location of a single record inside a [storage](CacheStorage).
///
/// Every segment is sanitized on creation, so a path can always be mapped to a file name
/// without escaping its root.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordPath {
    segments: Vec<String>,
}

impl RecordPath {
    /// Create a new record path from its segments.
    pub fn new<S: AsRef<str>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self {
            segments: segments
                .into_iter()
                .map(|segment| sanitize_segment(segment.as_ref()))
                .collect(),
        }
    }

    /// The sanitized segments of the path.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The last segment, used as the record name.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Whether all segments of `prefix` match the first segments of this path.
    pub fn starts_with(&self, prefix: &RecordPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl Display for RecordPath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

#[cfg(feature = "std")]
fn sanitize_segment(segment: &str) -> String {
    let sanitized = sanitize_filename::sanitize(segment);
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        return "_".into();
    }
    sanitized
}

#[cfg(not(feature = "std"))]
fn sanitize_segment(segment: &str) -> String {
    let sanitized: String = segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        return "_".into();
    }
    sanitized
}

/// Storage of opaque records addressed by [record paths](RecordPath).
///
/// Implementations must tolerate concurrent readers and writers on different paths. Writing to
/// a path that already holds a record replaces it as a whole: a concurrent reader observes
/// either the previous or the new content, never a mix of both.
pub trait CacheStorage: Debug + Send + Sync {
    /// Read the record at the given path, `None` when it doesn't exist.
    fn read(&self, path: &RecordPath) -> io::Result<Option<Vec<u8>>>;

    /// Write or replace the record at the given path.
    fn write(&self, path: &RecordPath, content: &[u8]) -> io::Result<()>;

    /// Remove the record at the given path, returning whether a record was removed.
    fn remove(&self, path: &RecordPath) -> io::Result<bool>;

    /// List every record currently stored.
    fn list(&self) -> io::Result<Vec<RecordPath>>;

    /// Remove every record.
    fn clear(&self) -> io::Result<()> {
        for path in self.list()? {
            self.remove(&path)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_path_segments_are_sanitized() {
        let path = RecordPath::new(["scan", "../etc", "a/b.json"]);

        assert_eq!(path.segments().len(), 3);
        for segment in path.segments() {
            assert!(!segment.contains('/'));
            assert_ne!(segment, "..");
        }
        assert_eq!(path.name(), path.segments().last().map(String::as_str));
    }

    #[test]
    fn record_path_prefix() {
        let path = RecordPath::new(["v6", "scan", "device", "key.json"]);

        assert!(path.starts_with(&RecordPath::new(["v6", "scan"])));
        assert!(!path.starts_with(&RecordPath::new(["v6", "reduce"])));
        assert_eq!(path.to_string(), "v6/scan/device/key.json");
    }
}
