//! Loaded model objects, keyed by model type, version and optimization level.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use model_algos::{Preprocessor, Trainable};
use model_types::{CacheStats, Clock, OptimizationLevel, TtlCache};

/// A deserialized model with its scaler, ready to predict.
pub struct LoadedModel {
    pub model_id: String,
    pub version: String,
    /// `None` for the registered artifact.
    pub level: Option<OptimizationLevel>,
    pub model: Box<dyn Trainable>,
    pub scaler: Preprocessor,
}

impl LoadedModel {
    /// Align `features` to the scaler, scale and predict.
    pub fn predict_row(&self, raw: &[f64]) -> model_algos::Result<model_algos::Prediction> {
        let row = self.scaler.transform_row(raw)?;
        self.model.predict(&row)
    }
}

pub type CacheKey = (String, String, Option<OptimizationLevel>);

pub struct ModelCache {
    inner: TtlCache<CacheKey, Arc<LoadedModel>>,
    /// (model_type, model_id) -> level of its optimized variant, `None` once
    /// looked up and absent.
    levels: RwLock<HashMap<(String, String), Option<OptimizationLevel>>>,
}

impl ModelCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: TtlCache::new(ttl, clock),
            levels: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(
        &self,
        model_type: &str,
        version: &str,
        level: Option<OptimizationLevel>,
    ) -> Option<Arc<LoadedModel>> {
        self.inner
            .get(&(model_type.to_string(), version.to_string(), level))
    }

    pub fn insert(&self, model_type: &str, model: Arc<LoadedModel>) {
        self.inner.insert(
            (model_type.to_string(), model.version.clone(), model.level),
            model,
        );
    }

    pub fn invalidate(&self, model_type: &str, version: &str, level: Option<OptimizationLevel>) -> bool {
        self.inner
            .invalidate(&(model_type.to_string(), version.to_string(), level))
    }

    /// Outer `None` when `model_id` was never looked up.
    pub fn optimized_level(&self, model_type: &str, model_id: &str) -> Option<Option<OptimizationLevel>> {
        self.levels
            .read()
            .get(&(model_type.to_string(), model_id.to_string()))
            .copied()
    }

    pub fn set_optimized_level(
        &self,
        model_type: &str,
        model_id: &str,
        level: Option<OptimizationLevel>,
    ) {
        self.levels
            .write()
            .insert((model_type.to_string(), model_id.to_string()), level);
    }

    /// Drop every entry of `model_type`, known optimized levels included.
    /// Returns how many models were removed.
    pub fn invalidate_model_type(&self, model_type: &str) -> usize {
        self.levels.write().retain(|(t, _), _| t != model_type);
        self.inner.invalidate_where(|(t, _, _)| t == model_type)
    }

    pub fn clear(&self) {
        self.levels.write().clear();
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

/// Drop cached models of a type whenever the registry reports a serving
/// change. A lagged receiver clears the whole cache.
pub fn spawn_invalidation_listener(
    cache: Arc<ModelCache>,
    mut events: broadcast::Receiver<model_types::DeploymentEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let dropped = cache.invalidate_model_type(&event.model_type);
                    tracing::info!(
                        model_type = %event.model_type,
                        version = %event.version,
                        kind = ?event.kind,
                        dropped,
                        "model cache invalidated"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "deployment events lagged; clearing model cache");
                    cache.clear();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_algos::{new_model, ArtifactFormat};
    use model_types::{
        AlgorithmKind, DeploymentEvent, DeploymentEventKind, ManualClock, OpaqueConfig,
    };

    fn loaded(version: &str, level: Option<OptimizationLevel>) -> Arc<LoadedModel> {
        let mut model = new_model(AlgorithmKind::Logistic, &OpaqueConfig::new()).unwrap();
        model
            .fit(&[vec![-1.0], vec![1.0]], &[0.0, 1.0])
            .unwrap();
        let bytes = model.serialize(ArtifactFormat::Json).unwrap();
        Arc::new(LoadedModel {
            model_id: format!("id-{version}"),
            version: version.into(),
            level,
            model: model_algos::deserialize(&bytes).unwrap(),
            scaler: Preprocessor::fit(vec!["x".into()], &[vec![-1.0], vec![1.0]]).unwrap(),
        })
    }

    #[test]
    fn keyed_by_level() {
        let cache = ModelCache::new(Duration::from_secs(60), Arc::new(ManualClock::new(0)));
        cache.insert("risk_scorer", loaded("v1", None));
        cache.insert("risk_scorer", loaded("v1", Some(OptimizationLevel::Basic)));
        assert!(cache.get("risk_scorer", "v1", None).is_some());
        assert!(cache.get("risk_scorer", "v1", Some(OptimizationLevel::Ultra)).is_none());
        assert!(cache.invalidate("risk_scorer", "v1", Some(OptimizationLevel::Basic)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expires_with_clock() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = ModelCache::new(Duration::from_secs(60), clock.clone());
        cache.insert("risk_scorer", loaded("v1", None));
        clock.advance(Duration::from_secs(61));
        assert!(cache.get("risk_scorer", "v1", None).is_none());
    }

    #[tokio::test]
    async fn listener_drops_type_on_event() {
        let cache = Arc::new(ModelCache::new(
            Duration::from_secs(60),
            Arc::new(ManualClock::new(0)),
        ));
        cache.insert("risk_scorer", loaded("v1", None));
        cache.insert("impact_classifier", loaded("v1", None));
        cache.set_optimized_level("risk_scorer", "id-v1", None);
        cache.set_optimized_level("impact_classifier", "id-v1", Some(OptimizationLevel::Basic));

        let (tx, rx) = broadcast::channel(4);
        let handle = spawn_invalidation_listener(cache.clone(), rx);
        tx.send(DeploymentEvent {
            model_type: "risk_scorer".into(),
            version: "v2".into(),
            kind: DeploymentEventKind::Deployed,
        })
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(cache.get("risk_scorer", "v1", None).is_none());
        assert!(cache.get("impact_classifier", "v1", None).is_some());
        assert_eq!(cache.optimized_level("risk_scorer", "id-v1"), None);
        assert_eq!(
            cache.optimized_level("impact_classifier", "id-v1"),
            Some(Some(OptimizationLevel::Basic))
        );
    }
}
