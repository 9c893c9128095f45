//! Storage media backing the record store
//!
//! A medium holds opaque string blobs under string keys, like browser local
//! storage. The store keeps exactly one blob under its storage key.

use crate::error::StoreError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Synchronous key/blob storage
pub trait StorageMedium: Send + Sync + std::fmt::Debug {
    /// Load the blob stored under `key`, `None` if nothing was ever saved
    ///
    /// # Errors
    /// Medium-specific read failure
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the blob stored under `key`
    ///
    /// # Errors
    /// Medium-specific write failure
    fn save(&self, key: &str, blob: &str) -> Result<(), StoreError>;
}

/// Process-local medium
///
/// Clones share the same blobs, so a second store built over a clone sees
/// what the first one persisted. Used when no store path is configured and
/// throughout the tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedium {
    blobs: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryMedium {
    /// Create empty medium
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw blob, bypassing the store
    pub fn put_raw(&self, key: impl Into<String>, blob: impl Into<String>) {
        self.blobs.lock().insert(key.into(), blob.into());
    }

    /// Peek at a raw blob
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.blobs.lock().get(key).cloned()
    }
}

impl StorageMedium for MemoryMedium {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    fn save(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        self.blobs.lock().insert(key.to_string(), blob.to_string());
        Ok(())
    }
}

/// One JSON file per key inside a directory
///
/// Writes go to `<key>.tmp` and are renamed over `<key>.json`, so a crash
/// mid-write leaves the previous blob intact.
#[derive(Debug, Clone)]
pub struct FileMedium {
    dir: PathBuf,
}

impl FileMedium {
    /// Create medium rooted at `dir`; the directory is created on first save
    #[inline]
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the blobs
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl StorageMedium for FileMedium {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }

    fn save(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|err| StoreError::io(&self.dir, err))?;

        let path = self.path_for(key);
        let tmp_path = path.with_extension("tmp");

        fs::write(&tmp_path, blob).map_err(|err| StoreError::io(&tmp_path, err))?;
        fs::rename(&tmp_path, &path).map_err(|err| StoreError::io(&path, err))?;

        Ok(())
    }
}
