//! Object Store Gateway: get/put/list over named buckets.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use walkdir::WalkDir;

use super::{TMP_MARKER, atomic_write, validate_name};
use crate::error::{PipelineError, PipelineResult};

/// Bucket/key object storage.
///
/// `put` overwrites any existing object at the same key (no versioning). A missing object or
/// bucket is [`PipelineError::NotFound`]; an unreachable backend is
/// [`PipelineError::StoreUnavailable`]. The two are never conflated with empty content.
pub trait ObjectStore: Send + Sync {
    /// Fetch the full content of an object.
    fn get(&self, bucket: &str, key: &str) -> PipelineResult<Vec<u8>>;

    /// Store `data` at `bucket/key`, replacing any previous object. The bucket must exist.
    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> PipelineResult<()>;

    /// Whether `bucket` exists.
    fn bucket_exists(&self, bucket: &str) -> PipelineResult<bool>;

    /// Create `bucket`. Creating an existing bucket is a no-op.
    fn create_bucket(&self, bucket: &str) -> PipelineResult<()>;

    /// Keys in `bucket` starting with `prefix`, sorted.
    fn list(&self, bucket: &str, prefix: &str) -> PipelineResult<Vec<String>>;

    /// Create `bucket` unless it already exists.
    fn ensure_bucket(&self, bucket: &str) -> PipelineResult<()> {
        if !self.bucket_exists(bucket)? {
            self.create_bucket(bucket)?;
        }
        Ok(())
    }

    /// Whether an object exists at `bucket/key`.
    fn exists(&self, bucket: &str, key: &str) -> PipelineResult<bool> {
        match self.get(bucket, key) {
            Ok(_) => Ok(true),
            Err(PipelineError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

type Buckets = BTreeMap<String, BTreeMap<String, Arc<[u8]>>>;

/// Process-local object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<Buckets>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> PipelineResult<std::sync::RwLockReadGuard<'_, Buckets>> {
        self.buckets
            .read()
            .map_err(|_| PipelineError::unavailable("memory object store lock poisoned"))
    }

    fn write(&self) -> PipelineResult<std::sync::RwLockWriteGuard<'_, Buckets>> {
        self.buckets
            .write()
            .map_err(|_| PipelineError::unavailable("memory object store lock poisoned"))
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, bucket: &str, key: &str) -> PipelineResult<Vec<u8>> {
        self.read()?
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|data| data.to_vec())
            .ok_or_else(|| PipelineError::not_found(bucket, key))
    }

    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> PipelineResult<()> {
        validate_name(key, true)?;
        let mut buckets = self.write()?;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| PipelineError::not_found(bucket, key))?;
        objects.insert(key.to_string(), Arc::from(data));
        Ok(())
    }

    fn bucket_exists(&self, bucket: &str) -> PipelineResult<bool> {
        Ok(self.read()?.contains_key(bucket))
    }

    fn create_bucket(&self, bucket: &str) -> PipelineResult<()> {
        validate_name(bucket, false)?;
        self.write()?.entry(bucket.to_string()).or_default();
        Ok(())
    }

    fn list(&self, bucket: &str, prefix: &str) -> PipelineResult<Vec<String>> {
        let buckets = self.read()?;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| PipelineError::not_found(bucket, prefix))?;
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Object store backed by a local directory: one sub-directory per bucket, one file per key.
///
/// Writes go through a temporary file and a rename, so a reader never sees a partial object.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open (and create, if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> PipelineResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            PipelineError::unavailable(format!("cannot open object store at {}: {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn bucket_path(&self, bucket: &str) -> PipelineResult<PathBuf> {
        validate_name(bucket, false)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PipelineResult<PathBuf> {
        validate_name(key, true)?;
        Ok(self.bucket_path(bucket)?.join(key))
    }
}

impl ObjectStore for FsObjectStore {
    fn get(&self, bucket: &str, key: &str) -> PipelineResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PipelineError::not_found(bucket, key),
            _ => PipelineError::unavailable(format!("read {}: {e}", path.display())),
        })
    }

    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> PipelineResult<()> {
        let path = self.object_path(bucket, key)?;
        if !self.bucket_path(bucket)?.is_dir() {
            return Err(PipelineError::not_found(bucket, key));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PipelineError::unavailable(format!("create {}: {e}", parent.display()))
            })?;
        }
        atomic_write(&path, data)
            .map_err(|e| PipelineError::unavailable(format!("write {}: {e}", path.display())))
    }

    fn bucket_exists(&self, bucket: &str) -> PipelineResult<bool> {
        Ok(self.bucket_path(bucket)?.is_dir())
    }

    fn create_bucket(&self, bucket: &str) -> PipelineResult<()> {
        let path = self.bucket_path(bucket)?;
        fs::create_dir_all(&path)
            .map_err(|e| PipelineError::unavailable(format!("create {}: {e}", path.display())))
    }

    fn list(&self, bucket: &str, prefix: &str) -> PipelineResult<Vec<String>> {
        let dir = self.bucket_path(bucket)?;
        if !dir.is_dir() {
            return Err(PipelineError::not_found(bucket, prefix));
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1) {
            let entry = entry.map_err(|e| {
                PipelineError::unavailable(format!("list {}: {e}", dir.display()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&dir) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
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
