//! Filesystem seam for best-effort physical cleanup.
//!
//! Metadata is the source of truth for which files are live. Deleting a file
//! is only cleanup, so callers log failures instead of propagating them.

use llkv_result::Result;
use std::path::Path;

pub trait FileSystem: Send + Sync {
    fn delete_file(&self, path: &Path) -> Result<()>;
}

/// [`FileSystem`] over the local disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn delete_file(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deleting_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalFileSystem
            .delete_file(&dir.path().join("absent.dcg"))
            .unwrap_err();
        assert!(matches!(err, llkv_result::Error::Io(_)));
    }

    #[test]
    fn deletes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("present.dcg");
        std::fs::write(&path, b"cols").unwrap();
        LocalFileSystem.delete_file(&path).unwrap();
        assert!(!path.exists());
    }
}
