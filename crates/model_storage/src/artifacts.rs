//! Model bundles on top of a [`BlobStore`]: version-scoped keys, checksums,
//! and the serving location used by the active version.

use std::collections::BTreeMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use model_types::ArtifactKind;

use crate::blob::BlobStore;
use crate::{Result, StorageError};

pub type ArtifactBundle = BTreeMap<ArtifactKind, Vec<u8>>;

/// SHA-256 over every file of a bundle, in artifact-kind order. Each file is
/// framed by its kind and length so two bundles cannot collide by shifting
/// bytes between files.
pub fn bundle_checksum(bundle: &ArtifactBundle) -> String {
    let mut hasher = Sha256::new();
    for (kind, bytes) in bundle {
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct ArtifactStore {
    blobs: Arc<dyn BlobStore>,
}

impl ArtifactStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn version_key(model_type: &str, model_id: &str, kind: ArtifactKind) -> String {
        format!("models/{model_type}/{model_id}/{kind}.bin")
    }

    pub fn serving_key(model_type: &str, kind: ArtifactKind) -> String {
        format!("serving/{model_type}/{kind}.bin")
    }

    pub fn optimized_key(model_type: &str, model_id: &str, level: &str) -> String {
        format!("optimized/{model_type}/{model_id}/{level}.bin")
    }

    /// Write every file of `bundle` under the version's keys. Files already
    /// written are removed again if a later one fails.
    pub fn store_bundle(
        &self,
        model_type: &str,
        model_id: &str,
        bundle: &ArtifactBundle,
    ) -> Result<(BTreeMap<ArtifactKind, String>, String)> {
        let mut refs = BTreeMap::new();
        for (kind, bytes) in bundle {
            let key = Self::version_key(model_type, model_id, *kind);
            if let Err(e) = self.blobs.put(&key, bytes) {
                self.delete_refs(&refs);
                return Err(e);
            }
            refs.insert(*kind, key);
        }
        Ok((refs, bundle_checksum(bundle)))
    }

    pub fn load_bundle(&self, refs: &BTreeMap<ArtifactKind, String>) -> Result<ArtifactBundle> {
        let mut bundle = ArtifactBundle::new();
        for (kind, key) in refs {
            bundle.insert(*kind, self.blobs.get(key)?);
        }
        Ok(bundle)
    }

    pub fn load(&self, refs: &BTreeMap<ArtifactKind, String>, kind: ArtifactKind) -> Result<Vec<u8>> {
        let key = refs
            .get(&kind)
            .ok_or_else(|| StorageError::NotFound(format!("{kind} artifact ref")))?;
        self.blobs.get(key)
    }

    /// Kinds whose blob is absent from the store.
    pub fn missing(&self, refs: &BTreeMap<ArtifactKind, String>) -> Vec<ArtifactKind> {
        refs.iter()
            .filter(|(_, key)| !self.blobs.exists(key))
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn recompute_checksum(&self, refs: &BTreeMap<ArtifactKind, String>) -> Result<String> {
        Ok(bundle_checksum(&self.load_bundle(refs)?))
    }

    /// Copy a bundle into the serving location of its model type. Each file
    /// lands through the blob store's atomic write.
    pub fn promote_to_serving(&self, model_type: &str, bundle: &ArtifactBundle) -> Result<()> {
        for (kind, bytes) in bundle {
            self.blobs.put(&Self::serving_key(model_type, *kind), bytes)?;
        }
        Ok(())
    }

    /// Current serving files, empty when nothing was ever promoted.
    pub fn serving_snapshot(&self, model_type: &str) -> Result<ArtifactBundle> {
        let mut bundle = ArtifactBundle::new();
        for kind in [ArtifactKind::Model, ArtifactKind::Preprocessor] {
            let key = Self::serving_key(model_type, kind);
            if self.blobs.exists(&key) {
                bundle.insert(kind, self.blobs.get(&key)?);
            }
        }
        Ok(bundle)
    }

    /// Put back a snapshot taken with [`Self::serving_snapshot`].
    pub fn restore_serving(&self, model_type: &str, snapshot: &ArtifactBundle) -> Result<()> {
        for kind in [ArtifactKind::Model, ArtifactKind::Preprocessor] {
            let key = Self::serving_key(model_type, kind);
            match snapshot.get(&kind) {
                Some(bytes) => self.blobs.put(&key, bytes)?,
                None => {
                    self.blobs.delete(&key)?;
                }
            }
        }
        Ok(())
    }

    /// Best-effort removal; returns how many blobs were deleted.
    pub fn delete_refs(&self, refs: &BTreeMap<ArtifactKind, String>) -> usize {
        let mut deleted = 0;
        for key in refs.values() {
            match self.blobs.delete(key) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "artifact delete failed"),
            }
        }
        deleted
    }

    pub fn total_size(&self, refs: &BTreeMap<ArtifactKind, String>) -> u64 {
        refs.values()
            .filter_map(|key| self.blobs.size(key).ok().flatten())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{FsBlobStore, MemoryBlobStore};
    use tempfile::TempDir;

    fn bundle(model: &[u8], pre: &[u8]) -> ArtifactBundle {
        let mut b = ArtifactBundle::new();
        b.insert(ArtifactKind::Model, model.to_vec());
        b.insert(ArtifactKind::Preprocessor, pre.to_vec());
        b
    }

    #[test]
    fn checksum_survives_store_and_reload() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(Arc::new(FsBlobStore::open(tmp.path()).unwrap()));
        let b = bundle(b"weights", b"scaler");

        let (refs, checksum) = store.store_bundle("risk_scorer", "m1", &b).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(store.recompute_checksum(&refs).unwrap(), checksum);
    }

    #[test]
    fn altered_byte_changes_checksum() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = ArtifactStore::new(blobs.clone());
        let (refs, checksum) = store
            .store_bundle("risk_scorer", "m1", &bundle(b"weights", b"scaler"))
            .unwrap();

        blobs.put(&refs[&ArtifactKind::Model], b"weightz").unwrap();
        assert_ne!(store.recompute_checksum(&refs).unwrap(), checksum);
    }

    #[test]
    fn framing_prevents_boundary_shift_collisions() {
        assert_ne!(
            bundle_checksum(&bundle(b"ab", b"c")),
            bundle_checksum(&bundle(b"a", b"bc"))
        );
    }

    #[test]
    fn missing_lists_deleted_kinds() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = ArtifactStore::new(blobs.clone());
        let (refs, _) = store
            .store_bundle("risk_scorer", "m1", &bundle(b"w", b"s"))
            .unwrap();
        blobs.delete(&refs[&ArtifactKind::Preprocessor]).unwrap();
        assert_eq!(store.missing(&refs), vec![ArtifactKind::Preprocessor]);
        assert!(store.recompute_checksum(&refs).is_err());
    }

    #[test]
    fn serving_snapshot_and_restore() {
        let store = ArtifactStore::new(Arc::new(MemoryBlobStore::new()));
        assert!(store.serving_snapshot("risk_scorer").unwrap().is_empty());

        store
            .promote_to_serving("risk_scorer", &bundle(b"v1", b"s1"))
            .unwrap();
        let snap = store.serving_snapshot("risk_scorer").unwrap();
        store
            .promote_to_serving("risk_scorer", &bundle(b"v2", b"s2"))
            .unwrap();
        store.restore_serving("risk_scorer", &snap).unwrap();

        let now = store.serving_snapshot("risk_scorer").unwrap();
        assert_eq!(now[&ArtifactKind::Model], b"v1");
    }
}
