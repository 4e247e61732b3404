//! Key-value blob interface for model artifacts.
//!
//! Keys are `/`-separated, version-scoped paths such as
//! `models/risk_scorer/<model_id>/model.bin`. The filesystem backend writes
//! through a temp file and an atomic rename, so a reader never sees a
//! half-written object.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::{Result, StorageError};

pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;
    fn get(&self, key: &str) -> Result<Vec<u8>>;
    /// Returns false when the key was already absent.
    fn delete(&self, key: &str) -> Result<bool>;
    fn exists(&self, key: &str) -> bool;
    fn size(&self, key: &str) -> Result<Option<u64>>;
}

fn check_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with('/')
        && key.split('/').all(|seg| {
            !seg.is_empty()
                && seg != "."
                && seg != ".."
                && seg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        });
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open a blob store rooted at `root/artifacts`.
    pub fn open(root: &Path) -> Result<Self> {
        let root = root.join("artifacts");
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut f = fs::File::create(path)?;
    f.write_all(data)?;
    f.sync_all()
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // unique temp name so concurrent writers of one key never share a file
        let tmp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        let written = write_synced(&tmp_path, data).and_then(|()| fs::rename(&tmp_path, &path));
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&tmp_path) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %tmp_path.display(), error = %cleanup, "temp blob left behind");
                }
            }
            return Err(e.into());
        }
        tracing::debug!(key, size = data.len(), "blob stored");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.object_path(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn size(&self, key: &str) -> Result<Option<u64>> {
        let path = self.object_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::metadata(&path)?.len()))
    }
}

/// In-process backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        check_key(key)?;
        self.objects.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.objects.write().remove(key).is_some())
    }

    fn exists(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    fn size(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.objects.read().get(key).map(|d| d.len() as u64))
    }
}
