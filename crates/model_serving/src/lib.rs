//! Serving path: optimized model variants, single predictions with graceful
//! fallback, and a priority batch queue.

pub mod batch;
pub mod cache;
pub mod metrics;
pub mod optimizer;
pub mod service;

pub use batch::{BatchEntry, BatchHandler, BatchQueue, BatchResult};
pub use cache::{spawn_invalidation_listener, LoadedModel, ModelCache};
pub use metrics::{PerformanceSnapshot, ServingMetrics};
pub use optimizer::{BenchmarkMetrics, InferenceOptimizer, OptimizationResult};
pub use service::InferenceService;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use model_types::{FeatureVector, LifecycleError, OptimizationLevel};

#[derive(Debug, Clone, Deserialize)]
pub struct ServingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_benchmark_samples")]
    pub benchmark_samples: usize,
    #[serde(default = "default_warmup_runs")]
    pub warmup_runs: usize,
    #[serde(default = "default_benchmark_budget_ms")]
    pub benchmark_budget_ms: u64,
    /// Confidence reported by heuristic fallback predictions.
    #[serde(default = "default_fallback_confidence")]
    pub fallback_confidence: f64,
    /// Longest a prediction waits on feature extraction before answering
    /// from an empty vector.
    #[serde(default = "default_feature_timeout_ms")]
    pub feature_timeout_ms: u64,
}

fn default_batch_size() -> usize {
    32
}
fn default_batch_timeout_ms() -> u64 {
    50
}
fn default_cache_ttl_secs() -> u64 {
    600
}
fn default_benchmark_samples() -> usize {
    1000
}
fn default_warmup_runs() -> usize {
    50
}
fn default_benchmark_budget_ms() -> u64 {
    10_000
}
fn default_fallback_confidence() -> f64 {
    0.3
}
fn default_feature_timeout_ms() -> u64 {
    500
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            benchmark_samples: default_benchmark_samples(),
            warmup_runs: default_warmup_runs(),
            benchmark_budget_ms: default_benchmark_budget_ms(),
            fallback_confidence: default_fallback_confidence(),
            feature_timeout_ms: default_feature_timeout_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServingError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("benchmark for level {level} exceeded its {budget_ms}ms budget")]
    BudgetExceeded {
        level: OptimizationLevel,
        budget_ms: u64,
    },
}

impl From<model_algos::AlgoError> for ServingError {
    fn from(err: model_algos::AlgoError) -> Self {
        Self::Lifecycle(err.into())
    }
}

impl From<model_storage::StorageError> for ServingError {
    fn from(err: model_storage::StorageError) -> Self {
        Self::Lifecycle(err.into())
    }
}

pub type Result<T> = std::result::Result<T, ServingError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub request_id: String,
    /// The model type that answers this request.
    pub prediction_type: String,
    pub entity_id: String,
    pub entity_type: String,
    /// Precomputed features; extracted on demand when absent.
    #[serde(default)]
    pub features: Option<FeatureVector>,
}

impl PredictionRequest {
    pub fn new(prediction_type: &str, entity_id: &str, entity_type: &str) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            prediction_type: prediction_type.into(),
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            features: None,
        }
    }

    pub fn with_features(mut self, features: FeatureVector) -> Self {
        self.features = Some(features);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub request_id: String,
    pub prediction_type: String,
    pub value: f64,
    pub confidence: f64,
    /// Version that answered, or `"heuristic"` for fallback results.
    pub model_version: String,
    pub processing_time_ms: f64,
    pub fallback_used: bool,
    pub optimized: bool,
}

pub const HEURISTIC_VERSION: &str = "heuristic";

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;
    use std::time::Duration;

    use model_algos::{new_model, ArtifactFormat, Preprocessor};
    use model_features::{FeatureStore, StaticExtractor};
    use model_policy::PolicyEngine;
    use model_registry::{ModelRegistry, NewVersion};
    use model_storage::{ArtifactBundle, ArtifactStore, MemoryBlobStore, MetadataStore};
    use model_types::{
        AlgorithmKind, ArtifactKind, Feature, FeatureVector, ManualClock, ModelCatalog,
        OpaqueConfig, WorkerPool,
    };

    use crate::{InferenceOptimizer, InferenceService, ModelCache, ServingConfig};

    pub struct Fixture {
        pub registry: Arc<ModelRegistry>,
        pub optimizer: Arc<InferenceOptimizer>,
        pub service: Arc<InferenceService>,
        pub cache: Arc<ModelCache>,
        pub blobs: Arc<MemoryBlobStore>,
        pub clock: Arc<ManualClock>,
        pub extractor: Arc<StaticExtractor>,
        pub pool: WorkerPool,
        /// Id of the version registered by `setup_with_model`.
        pub model_id: String,
    }

    impl Fixture {
        pub fn set_budget_ms(&mut self, ms: u64) {
            let config = ServingConfig {
                benchmark_budget_ms: ms,
                ..ServingConfig::default()
            };
            self.optimizer = Arc::new(InferenceOptimizer::new(
                self.registry.clone(),
                self.cache.clone(),
                self.pool.clone(),
                config,
            ));
        }
    }

    pub async fn setup() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let blobs = Arc::new(MemoryBlobStore::new());
        let catalog = Arc::new(ModelCatalog::with_defaults());
        let registry = Arc::new(ModelRegistry::new(
            Arc::new(MetadataStore::open_in_memory().unwrap()),
            ArtifactStore::new(blobs.clone()),
            Arc::new(PolicyEngine::with_defaults(catalog)),
            clock.clone(),
        ));
        let config = ServingConfig::default();
        let cache = Arc::new(ModelCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            clock.clone(),
        ));
        let pool = WorkerPool::new(2);
        let optimizer = Arc::new(InferenceOptimizer::new(
            registry.clone(),
            cache.clone(),
            pool.clone(),
            config.clone(),
        ));
        let extractor = Arc::new(StaticExtractor::new(clock.clone()));
        let features = Arc::new(FeatureStore::new(
            extractor.clone(),
            Duration::from_secs(60),
            clock.clone(),
        ));
        let service = Arc::new(InferenceService::new(optimizer.clone(), features, config));
        Fixture {
            registry,
            optimizer,
            service,
            cache,
            blobs,
            clock,
            extractor,
            pool,
            model_id: String::new(),
        }
    }

    pub async fn setup_with_model(model_type: &str, version: &str) -> Fixture {
        let mut f = setup().await;
        let (model, _) = trained_stumps();
        f.model_id = register_raw(&f, model_type, version, model).await;
        f
    }

    /// Register `model_bytes` with the fixture's scaler and a passing f1.
    pub async fn register_raw(f: &Fixture, model_type: &str, version: &str, model_bytes: Vec<u8>) -> String {
        let (_, scaler) = trained_stumps();
        let mut artifacts = ArtifactBundle::new();
        artifacts.insert(ArtifactKind::Model, model_bytes);
        artifacts.insert(ArtifactKind::Preprocessor, scaler.to_bytes().unwrap());
        f.registry
            .register(NewVersion {
                model_type: model_type.into(),
                version: version.into(),
                artifacts,
                metrics: [("f1_score".to_string(), 0.9)].into_iter().collect(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    pub fn features_at(entity_id: &str, a: f64, b: f64) -> FeatureVector {
        FeatureVector::new(
            entity_id,
            "article",
            vec![Feature::numerical("a", a), Feature::numerical("b", b)],
            0,
        )
    }

    /// Boosted stumps on a grid labeled by `a + b > 1`.
    pub fn trained_stumps() -> (Vec<u8>, Preprocessor) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..12 {
            for j in 0..12 {
                let (a, b) = (i as f64 / 11.0, j as f64 / 11.0);
                x.push(vec![a, b]);
                y.push(if a + b > 1.0 { 1.0 } else { 0.0 });
            }
        }
        let scaler = Preprocessor::fit(vec!["a".into(), "b".into()], &x).unwrap();
        let mut model = new_model(
            AlgorithmKind::BoostedStumps,
            &OpaqueConfig::new().with("n_estimators", 30i64),
        )
        .unwrap();
        model.fit(&scaler.transform(&x).unwrap(), &y).unwrap();
        (model.serialize(ArtifactFormat::Json).unwrap(), scaler)
    }
}
