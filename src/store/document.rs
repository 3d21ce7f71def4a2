//! Document store: named collections of flat JSON documents.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use super::{atomic_write, validate_name};
use crate::error::{PipelineError, PipelineResult};

/// One flat key/value document.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Collection-level document storage, as used by the publish stage.
pub trait DocumentStore: Send + Sync {
    /// Names of the existing collections, sorted.
    fn list_collections(&self) -> PipelineResult<Vec<String>>;

    /// Remove a collection and all its documents. Dropping a missing collection is a no-op.
    fn drop_collection(&self, name: &str) -> PipelineResult<()>;

    /// Append documents to a collection (created on first insert). Returns the inserted count.
    fn insert_many(&self, name: &str, documents: Vec<Document>) -> PipelineResult<usize>;

    /// All documents of a collection in insertion order; empty if the collection is missing.
    fn find_all(&self, name: &str) -> PipelineResult<Vec<Document>>;
}

/// Process-local document store.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<BTreeMap<String, Vec<Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> PipelineError {
    PipelineError::unavailable("document store lock poisoned")
}

impl DocumentStore for MemoryDocumentStore {
    fn list_collections(&self) -> PipelineResult<Vec<String>> {
        Ok(self.collections.read().map_err(|_| poisoned())?.keys().cloned().collect())
    }

    fn drop_collection(&self, name: &str) -> PipelineResult<()> {
        self.collections.write().map_err(|_| poisoned())?.remove(name);
        Ok(())
    }

    fn insert_many(&self, name: &str, documents: Vec<Document>) -> PipelineResult<usize> {
        validate_name(name, false)?;
        let n = documents.len();
        self.collections
            .write()
            .map_err(|_| poisoned())?
            .entry(name.to_string())
            .or_default()
            .extend(documents);
        Ok(n)
    }

    fn find_all(&self, name: &str) -> PipelineResult<Vec<Document>> {
        Ok(self
            .collections
            .read()
            .map_err(|_| poisoned())?
            .get(name)
            .cloned()
            .unwrap_or_default())
    }
}

const COLLECTION_EXT: &str = "jsonl";

/// Document store backed by a directory with one JSON-lines file per collection.
///
/// Every mutation rewrites the collection file atomically.
#[derive(Debug)]
pub struct JsonDirDocumentStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonDirDocumentStore {
    /// Open (and create, if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> PipelineResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            PipelineError::unavailable(format!("cannot open document store at {}: {e}", root.display()))
        })?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn collection_path(&self, name: &str) -> PipelineResult<PathBuf> {
        validate_name(name, false)?;
        Ok(self.root.join(format!("{name}.{COLLECTION_EXT}")))
    }

    fn read_collection(&self, path: &std::path::Path) -> PipelineResult<Vec<Document>> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PipelineError::unavailable(format!(
                    "read {}: {e}",
                    path.display()
                )));
            }
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str::<Document>(l).map_err(PipelineError::from))
            .collect()
    }
}

impl DocumentStore for JsonDirDocumentStore {
    fn list_collections(&self) -> PipelineResult<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            PipelineError::unavailable(format!("list {}: {e}", self.root.display()))
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::unavailable(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(COLLECTION_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn drop_collection(&self, name: &str) -> PipelineResult<()> {
        let path = self.collection_path(name)?;
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::unavailable(format!(
                "drop {}: {e}",
                path.display()
            ))),
        }
    }

    fn insert_many(&self, name: &str, documents: Vec<Document>) -> PipelineResult<usize> {
        let path = self.collection_path(name)?;
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;

        let mut all = self.read_collection(&path)?;
        let n = documents.len();
        all.extend(documents);

        let mut out = String::new();
        for doc in &all {
            out.push_str(&serde_json::to_string(doc)?);
            out.push('\n');
        }
        atomic_write(&path, out.as_bytes())
            .map_err(|e| PipelineError::unavailable(format!("write {}: {e}", path.display())))?;
        Ok(n)
    }

    fn find_all(&self, name: &str) -> PipelineResult<Vec<Document>> {
        let path = self.collection_path(name)?;
        self.read_collection(&path)
    }
}
