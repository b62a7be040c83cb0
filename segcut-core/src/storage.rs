//! Object storage used to materialize inputs and publish results.

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};

pub trait ObjectStore: Send + Sync {
    /// Fetch the object stored under `key`
    fn download(&self, key: &str) -> Result<Vec<u8>>;

    /// Store `data` under `key`. Returns `false` if the store rejected it.
    fn upload(&self, key: &str, data: &[u8]) -> bool;
}

/// Objects as files below a root directory
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `key` below the root, rejecting keys that would escape it
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            anyhow::bail!("Invalid object key {:?}", key);
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalObjectStore {
    fn download(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        std::fs::read(&path).with_context(|| format!("Failed to read object {:?}", path))
    }

    fn upload(&self, key: &str, data: &[u8]) -> bool {
        let result = self.path_for(key).and_then(|path| {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, data).with_context(|| format!("Failed to write object {:?}", path))
        });
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Upload of {} failed: {:#}", key, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_with_nested_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert!(store.upload("clips/a/raw.mp4", b"bytes"));
        assert_eq!(store.download("clips/a/raw.mp4").unwrap(), b"bytes");
        assert!(store.download("clips/b/raw.mp4").is_err());
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("root"));
        assert!(!store.upload("../outside.mp4", b"x"));
        assert!(!store.upload("/etc/passwd", b"x"));
        assert!(!store.upload("", b"x"));
        assert!(!dir.path().join("outside.mp4").exists());
    }
}
