//! Caching front for a `FeatureExtractor`.
//!
//! Lookups are cached per entity with a TTL. Each cached vector is also
//! indexed by its content hash so identical feature payloads coming from
//! different entities share one entry, and serving can fetch a vector by
//! hash without re-extracting.

use std::sync::Arc;
use std::time::Duration;

use model_types::{CacheStats, Clock, FeatureVector, TtlCache};

use crate::FeatureExtractor;

pub struct FeatureStore {
    extractor: Arc<dyn FeatureExtractor>,
    by_entity: TtlCache<(String, String), String>,
    by_hash: TtlCache<String, Arc<FeatureVector>>,
}

impl FeatureStore {
    pub fn new(extractor: Arc<dyn FeatureExtractor>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            extractor,
            by_entity: TtlCache::new(ttl, clock.clone()),
            by_hash: TtlCache::new(ttl, clock),
        }
    }

    pub fn extractor_name(&self) -> &str {
        self.extractor.name()
    }

    /// Cached extract. Extraction errors pass through and are not cached.
    pub async fn features(
        &self,
        entity_id: &str,
        entity_type: &str,
    ) -> anyhow::Result<Arc<FeatureVector>> {
        let key = (entity_type.to_string(), entity_id.to_string());
        if let Some(hash) = self.by_entity.get(&key) {
            if let Some(v) = self.by_hash.get(&hash) {
                return Ok(v);
            }
        }

        let vector = self.extractor.extract(entity_id, entity_type).await?;
        let vector = Arc::new(vector);
        self.by_hash
            .insert(vector.content_hash.clone(), vector.clone());
        self.by_entity.insert(key, vector.content_hash.clone());
        Ok(vector)
    }

    pub fn by_content_hash(&self, hash: &str) -> Option<Arc<FeatureVector>> {
        self.by_hash.get(&hash.to_string())
    }

    pub fn invalidate_entity(&self, entity_id: &str, entity_type: &str) -> bool {
        self.by_entity
            .invalidate(&(entity_type.to_string(), entity_id.to_string()))
    }

    pub fn stats(&self) -> CacheStats {
        self.by_entity.stats()
    }
}
