//! Storage capabilities used by the pipeline.
//!
//! - [`object`]: bucket/key object storage for the raw, intermediate and aggregate tiers
//! - [`document`]: named collections of flat documents for the published views
//!
//! Both are traits; the pipeline only ever holds `Arc<dyn ...>` handles. Each ships with an
//! in-memory adapter (tests, embedding) and a local filesystem adapter (the CLI).

pub mod document;
pub mod object;

use std::fs;
use std::io::Write;
use std::path::{Component, Path};
use std::sync::atomic::{AtomicU64, Ordering};

pub use document::{Document, DocumentStore, JsonDirDocumentStore, MemoryDocumentStore};
pub use object::{FsObjectStore, MemoryObjectStore, ObjectStore};

use crate::error::{PipelineError, PipelineResult};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Marker embedded in temporary file names; listings skip files containing it.
pub(crate) const TMP_MARKER: &str = ".tmp-";

/// Write `bytes` to `path` through a sibling temporary file and a rename.
///
/// Readers observe either the previous content or the complete new content.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp = dir.join(format!(
        ".{file_name}{TMP_MARKER}{}-{seq}",
        std::process::id()
    ));

    let result = (|| {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Reject names that would escape the adapter root or address nothing.
pub(crate) fn validate_name(name: &str, allow_nested: bool) -> PipelineResult<()> {
    let invalid = |reason: &str| PipelineError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("empty"));
    }
    if name.contains(TMP_MARKER) {
        return Err(invalid("reserved temporary-file marker"));
    }
    if !allow_nested && (name.contains('/') || name.contains('\\')) {
        return Err(invalid("path separators are not allowed"));
    }
    for component in Path::new(name).components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(invalid("must be a relative path without '.' or '..'")),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{atomic_write, validate_name};

    #[test]
    fn validate_name_rejects_escapes_and_separators() {
        assert!(validate_name("silver", false).is_ok());
        assert!(validate_name("2024/clients.csv", true).is_ok());
        assert!(validate_name("2024/clients.csv", false).is_err());
        assert!(validate_name("../etc/passwd", true).is_err());
        assert!(validate_name("/abs", true).is_err());
        assert!(validate_name("  ", true).is_err());
    }

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obj.bin");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
