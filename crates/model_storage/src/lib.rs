//! Artifact blobs, bundle checksums, and the SQLite metadata store.

pub mod artifacts;
pub mod blob;
pub mod metadata;
pub mod schema;

use thiserror::Error;

use model_types::LifecycleError;

pub use artifacts::{bundle_checksum, ArtifactBundle, ArtifactStore};
pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use metadata::{MetadataStore, VersionGrouping};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid blob key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for LifecycleError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => LifecycleError::NotFound(what),
            other => LifecycleError::TransientStorage(other.to_string()),
        }
    }
}
