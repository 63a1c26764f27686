//! Byte sink abstraction for whole-object storage.
//!
//! The backing store only supports whole-object writes: no appends, no
//! partial updates. `put` must be atomic, so a reader never observes a
//! partially written object at its final key.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use dl_common::{Error, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Marker embedded in temporary object names.
const TMP_MARKER: &str = ".tmp-";

/// Whole-object storage keyed by `/`-separated relative paths.
pub trait ObjectStore: Send + Sync {
    /// Durably and atomically place `data` at `path`, replacing any object.
    fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Read an entire object. `None` if it does not exist.
    fn get(&self, path: &str) -> Result<Option<Bytes>>;

    /// Delete an object. Succeeds if it does not exist.
    fn delete(&self, path: &str) -> Result<()>;

    /// Keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.get(path)?.is_some())
    }
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn put(&self, path: &str, data: Bytes) -> Result<()> {
        (**self).put(path, data)
    }

    fn get(&self, path: &str) -> Result<Option<Bytes>> {
        (**self).get(path)
    }

    fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path)
    }
}

/// Reject absolute keys and keys that escape the store root.
pub fn validate_key(path: &str) -> Result<()> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || Path::new(path)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if invalid {
        return Err(Error::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("invalid object key: {path:?}"),
        )));
    }
    Ok(())
}

// ── Local filesystem ────────────────────────────────────────────────────

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_key(path)?;
        Ok(self.root.join(path))
    }
}

impl ObjectStore for LocalStore {
    fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("object");
        let tmp_path = target.with_file_name(format!(
            ".{file_name}{TMP_MARKER}{}",
            uuid::Uuid::new_v4().simple()
        ));

        let written = (|| -> std::io::Result<()> {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&tmp_path)?;
            file.write_all(&data)?;
            file.flush()?;
            file.sync_all()?;
            fs::rename(&tmp_path, &target)
        })();

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&tmp_path) {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = %tmp_path.display(), error = %cleanup, "failed to remove temp file");
                }
            }
            return Err(Error::Io(e));
        }

        debug!(path = %target.display(), bytes = data.len(), "object written");
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Option<Bytes>> {
        match fs::read(self.resolve(path)?) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn delete(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.resolve(path)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn exists(&self, path: &str) -> Result<bool> {
        match fs::metadata(self.resolve(path)?) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Walk only the deepest directory the prefix names.
        let dir_part = prefix.rfind('/').map(|i| &prefix[..i]).unwrap_or("");
        let walk_root = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.resolve(dir_part)?
        };
        if !walk_root.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&walk_root) {
            let entry = entry.map_err(|e| {
                Error::Io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .filter_map(|c| c.as_os_str().to_str())
                .collect::<Vec<_>>()
                .join("/");
            if key.contains(TMP_MARKER) || !key.starts_with(prefix) {
                continue;
            }
            keys.push(key);
        }
        keys.sort();
        Ok(keys)
    }
}

// ── In-memory ───────────────────────────────────────────────────────────

/// Record of a store operation, for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put { path: String, size: usize },
    Get { path: String },
    Delete { path: String },
    List { prefix: String },
    Exists { path: String },
}

/// Thread-safe in-memory store with an operation log and failure injection.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<BTreeMap<String, Bytes>>>,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    fail_writes: Arc<Mutex<Vec<String>>>,
    fail_reads: Arc<Mutex<Vec<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Io(std::io::Error::other("memory store lock poisoned")))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `put` and `delete` whose key starts with `prefix`.
    pub fn inject_write_failure(&self, prefix: impl Into<String>) -> Result<()> {
        lock(&self.fail_writes)?.push(prefix.into());
        Ok(())
    }

    /// Fail every `get` whose key starts with `prefix`.
    pub fn inject_read_failure(&self, prefix: impl Into<String>) -> Result<()> {
        lock(&self.fail_reads)?.push(prefix.into());
        Ok(())
    }

    pub fn clear_failures(&self) -> Result<()> {
        lock(&self.fail_writes)?.clear();
        lock(&self.fail_reads)?.clear();
        Ok(())
    }

    /// Recorded operations, oldest first.
    pub fn operations(&self) -> Result<Vec<StoreOp>> {
        Ok(lock(&self.operations)?.clone())
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(lock(&self.objects)?.keys().cloned().collect())
    }

    fn record(&self, op: StoreOp) -> Result<()> {
        lock(&self.operations)?.push(op);
        Ok(())
    }

    fn check(list: &Mutex<Vec<String>>, path: &str, what: &str) -> Result<()> {
        if lock(list)?.iter().any(|p| path.starts_with(p.as_str())) {
            return Err(Error::Io(std::io::Error::other(format!(
                "injected {what} failure for {path}"
            ))));
        }
        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    fn put(&self, path: &str, data: Bytes) -> Result<()> {
        validate_key(path)?;
        self.record(StoreOp::Put {
            path: path.to_string(),
            size: data.len(),
        })?;
        Self::check(&self.fail_writes, path, "write")?;
        lock(&self.objects)?.insert(path.to_string(), data);
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Option<Bytes>> {
        self.record(StoreOp::Get {
            path: path.to_string(),
        })?;
        Self::check(&self.fail_reads, path, "read")?;
        Ok(lock(&self.objects)?.get(path).cloned())
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.record(StoreOp::Delete {
            path: path.to_string(),
        })?;
        Self::check(&self.fail_writes, path, "delete")?;
        lock(&self.objects)?.remove(path);
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        self.record(StoreOp::Exists {
            path: path.to_string(),
        })?;
        Self::check(&self.fail_reads, path, "read")?;
        Ok(lock(&self.objects)?.contains_key(path))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.record(StoreOp::List {
            prefix: prefix.to_string(),
        })?;
        Ok(lock(&self.objects)?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("DEA/DEA-2016-0015/iceberg/comments.manifest.json").is_ok());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key("a/./b").is_err());
        assert!(validate_key("").is_err());
    }

    #[test]
    fn test_local_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        store.put("a/b/c.bin", Bytes::from_static(b"hello")).unwrap();
        assert_eq!(store.get("a/b/c.bin").unwrap(), Some(Bytes::from_static(b"hello")));
        assert!(store.exists("a/b/c.bin").unwrap());

        store.put("a/b/c.bin", Bytes::from_static(b"world")).unwrap();
        assert_eq!(store.get("a/b/c.bin").unwrap(), Some(Bytes::from_static(b"world")));

        store.delete("a/b/c.bin").unwrap();
        store.delete("a/b/c.bin").unwrap();
        assert_eq!(store.get("a/b/c.bin").unwrap(), None);
    }

    #[test]
    fn test_local_exists_checks_metadata_only() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        assert!(!store.exists("a/m.json").unwrap());
        store.put("a/m.json", Bytes::from_static(b"{}")).unwrap();
        assert!(store.exists("a/m.json").unwrap());
        // A directory at the key is not an object.
        assert!(!store.exists("a").unwrap());
        assert!(store.exists("../outside").is_err());
    }

    #[test]
    fn test_memory_exists_does_not_read() {
        let store = MemoryStore::new();
        store.put("k/v", Bytes::from_static(b"x")).unwrap();
        assert!(store.exists("k/v").unwrap());
        assert!(!store.exists("k/w").unwrap());

        let ops = store.operations().unwrap();
        assert!(!ops.iter().any(|op| matches!(op, StoreOp::Get { .. })));
        assert_eq!(ops.last(), Some(&StoreOp::Exists { path: "k/w".into() }));

        store.inject_read_failure("k/").unwrap();
        assert!(store.exists("k/v").is_err());
    }

    #[test]
    fn test_local_put_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        store.put("x/one.parquet", Bytes::from_static(b"1")).unwrap();
        store.put("x/one.parquet", Bytes::from_static(b"2")).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path().join("x"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["one.parquet".to_string()]);
    }

    #[test]
    fn test_local_failed_put_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        // A directory at the target key makes the final rename fail.
        fs::create_dir_all(dir.path().join("t/occupied/inner")).unwrap();
        assert!(store.put("t/occupied", Bytes::from_static(b"x")).is_err());

        let names: Vec<_> = fs::read_dir(dir.path().join("t"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["occupied".to_string()]);
    }

    #[test]
    fn test_local_list_sorted_and_prefixed() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        store.put("DEA/D-2/iceberg/b", Bytes::new()).unwrap();
        store.put("DEA/D-1/iceberg/a", Bytes::new()).unwrap();
        store.put("EPA/E-1/iceberg/a", Bytes::new()).unwrap();

        assert_eq!(
            store.list("DEA/").unwrap(),
            vec!["DEA/D-1/iceberg/a".to_string(), "DEA/D-2/iceberg/b".to_string()]
        );
        assert_eq!(store.list("").unwrap().len(), 3);
        assert!(store.list("NONE/").unwrap().is_empty());
    }

    #[test]
    fn test_memory_failure_injection() {
        let store = MemoryStore::new();
        store.inject_write_failure("bad/").unwrap();
        assert!(store.put("bad/x", Bytes::new()).is_err());
        assert!(store.put("good/x", Bytes::new()).is_ok());
        assert_eq!(store.keys().unwrap(), vec!["good/x".to_string()]);

        store.inject_read_failure("good/").unwrap();
        assert!(store.get("good/x").is_err());
        store.clear_failures().unwrap();
        assert!(store.get("good/x").unwrap().is_some());
    }

    #[test]
    fn test_memory_list_and_operations() {
        let store = MemoryStore::new();
        store.put("p/a", Bytes::from_static(b"1")).unwrap();
        store.put("p/b", Bytes::from_static(b"2")).unwrap();
        store.put("q/a", Bytes::from_static(b"3")).unwrap();
        assert_eq!(store.list("p/").unwrap(), vec!["p/a".to_string(), "p/b".to_string()]);

        let ops = store.operations().unwrap();
        assert_eq!(
            ops[0],
            StoreOp::Put {
                path: "p/a".into(),
                size: 1
            }
        );
        assert_eq!(ops.last(), Some(&StoreOp::List { prefix: "p/".into() }));
    }
}
