//! Deterministic extractors for tests, CI and local runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::bail;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use model_types::{Clock, Feature, FeatureVector};

use crate::FeatureExtractor;

/// Serves vectors registered up front. Unknown entities and ids marked with
/// `fail_on` produce errors.
pub struct StaticExtractor {
    clock: Arc<dyn Clock>,
    vectors: RwLock<HashMap<(String, String), Vec<Feature>>>,
    failing: RwLock<HashSet<String>>,
    calls: AtomicUsize,
}

impl StaticExtractor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            vectors: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, entity_id: &str, entity_type: &str, features: Vec<Feature>) {
        self.vectors
            .write()
            .insert((entity_type.into(), entity_id.into()), features);
    }

    pub fn fail_on(&self, entity_id: &str) {
        self.failing.write().insert(entity_id.into());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FeatureExtractor for StaticExtractor {
    fn name(&self) -> &str {
        "static"
    }

    async fn extract(&self, entity_id: &str, entity_type: &str) -> anyhow::Result<FeatureVector> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.read().contains(entity_id) {
            bail!("extraction failed for {entity_type}/{entity_id}");
        }
        let features = self
            .vectors
            .read()
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned();
        match features {
            Some(f) => Ok(FeatureVector::new(
                entity_id,
                entity_type,
                f,
                self.clock.now_ms(),
            )),
            None => bail!("no features for {entity_type}/{entity_id}"),
        }
    }
}

/// Derives `dims` numerical features in `[0, 1)` from a hash of the entity
/// key. Stable across runs, never fails.
pub struct SyntheticExtractor {
    clock: Arc<dyn Clock>,
    dims: usize,
}

impl SyntheticExtractor {
    pub fn new(clock: Arc<dyn Clock>, dims: usize) -> Self {
        Self {
            clock,
            dims: dims.max(1),
        }
    }

    pub fn feature_names(&self) -> Vec<String> {
        (0..self.dims).map(|i| format!("f{i}")).collect()
    }
}

#[async_trait::async_trait]
impl FeatureExtractor for SyntheticExtractor {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn extract(&self, entity_id: &str, entity_type: &str) -> anyhow::Result<FeatureVector> {
        let features = (0..self.dims)
            .map(|i| {
                let digest = Sha256::digest(format!("{entity_type}/{entity_id}/{i}").as_bytes());
                let bucket = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
                Feature::numerical(&format!("f{i}"), bucket as f64 / (u32::MAX as f64 + 1.0))
            })
            .collect();
        tracing::trace!(entity_id, entity_type, dims = self.dims, "synthetic features");
        Ok(FeatureVector::new(
            entity_id,
            entity_type,
            features,
            self.clock.now_ms(),
        ))
    }
}
