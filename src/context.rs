use std::fmt;
use std::sync::Arc;

use crate::config::{PipelineConfig, StorageLayout};
use crate::error::PipelineResult;
use crate::store::{
    DocumentStore, FsObjectStore, JsonDirDocumentStore, MemoryDocumentStore, MemoryObjectStore,
    ObjectStore,
};

/// Store handles and artifact layout shared by every unit of work.
///
/// Cheap to clone; the stores are reference counted and safe for concurrent use.
#[derive(Clone)]
pub struct PipelineContext {
    pub objects: Arc<dyn ObjectStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub layout: StorageLayout,
}

impl PipelineContext {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentStore>,
        layout: StorageLayout,
    ) -> Self {
        Self {
            objects,
            documents,
            layout,
        }
    }

    /// In-memory stores with the default layout.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryObjectStore::new()),
            Arc::new(MemoryDocumentStore::new()),
            StorageLayout::default(),
        )
    }

    /// Filesystem stores rooted where `config` says.
    pub fn from_config(config: &PipelineConfig) -> PipelineResult<Self> {
        let objects = FsObjectStore::open(&config.object_store.root)?;
        let documents = JsonDirDocumentStore::open(&config.document_store.root)?;
        Ok(Self::new(
            Arc::new(objects),
            Arc::new(documents),
            config.layout(),
        ))
    }
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
