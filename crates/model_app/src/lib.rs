//! Process wiring: configuration, service construction, background loops.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use model_features::{FeatureExtractor, FeatureStore, SyntheticExtractor};
use model_policy::{PolicyConfig, PolicyEngine};
use model_registry::ModelRegistry;
use model_serving::{
    spawn_invalidation_listener, BatchQueue, InferenceOptimizer, InferenceService, ModelCache,
    ServingConfig,
};
use model_storage::{ArtifactStore, FsBlobStore, MetadataStore};
use model_trainer::{dedupe_triggers, JobHandle, TrainerConfig, TrainingOrchestrator};
use model_types::{
    AlgorithmKind, Clock, JobStatus, ModelCatalog, ModelTypeSpec, OpaqueConfig, SystemClock,
    WorkerPool,
};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_trigger_interval")]
    pub trigger_interval_secs: u64,
    /// Dimensions of the synthetic feature extractor used when no real
    /// extraction service is wired in.
    #[serde(default = "default_feature_dims")]
    pub feature_dims: usize,
    #[serde(default = "default_feature_ttl")]
    pub feature_cache_ttl_secs: u64,
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub serving: ServingConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Per model type overrides of the built-in catalog.
    #[serde(default)]
    pub catalog: BTreeMap<String, CatalogOverride>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_trigger_interval() -> u64 {
    3600
}
fn default_feature_dims() -> usize {
    8
}
fn default_feature_ttl() -> u64 {
    300
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            trigger_interval_secs: default_trigger_interval(),
            feature_dims: default_feature_dims(),
            feature_cache_ttl_secs: default_feature_ttl(),
            trainer: TrainerConfig::default(),
            serving: ServingConfig::default(),
            policy: PolicyConfig::default(),
            catalog: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogOverride {
    #[serde(default)]
    pub performance_threshold: Option<f64>,
    #[serde(default)]
    pub min_training_samples: Option<usize>,
    #[serde(default)]
    pub min_deploy_metric: Option<f64>,
    #[serde(default)]
    pub algorithm: Option<AlgorithmKind>,
    /// Replaces the default hyperparameters entirely.
    #[serde(default)]
    pub hyperparameters: Option<OpaqueConfig>,
}

impl CatalogOverride {
    fn apply(&self, spec: &mut ModelTypeSpec) {
        if let Some(v) = self.performance_threshold {
            spec.performance_threshold = v;
        }
        if let Some(v) = self.min_training_samples {
            spec.min_training_samples = v;
        }
        if let Some(v) = self.min_deploy_metric {
            spec.min_deploy_metric = v;
        }
        if let Some(v) = self.algorithm {
            spec.algorithm = v;
        }
        if let Some(v) = &self.hyperparameters {
            spec.hyperparameters = v.clone();
        }
    }
}

/// Read `path` if it exists, otherwise use defaults.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let config: AppConfig =
            toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
        Ok(config)
    } else {
        Ok(AppConfig::default())
    }
}

/// Built-in catalog with `overrides` applied. Every resulting type must have
/// hyperparameters its algorithm accepts.
pub fn build_catalog(overrides: &BTreeMap<String, CatalogOverride>) -> Result<ModelCatalog> {
    let defaults = ModelCatalog::with_defaults();
    for name in overrides.keys() {
        if !defaults.contains(name) {
            bail!("catalog override for unknown model type '{name}'");
        }
    }
    let specs: Vec<ModelTypeSpec> = defaults
        .specs()
        .cloned()
        .map(|mut spec| {
            if let Some(o) = overrides.get(&spec.name) {
                o.apply(&mut spec);
            }
            spec
        })
        .collect();
    for spec in &specs {
        model_algos::new_model(spec.algorithm, &spec.hyperparameters)
            .with_context(|| format!("hyperparameters for {}", spec.name))?;
    }
    Ok(ModelCatalog::new(specs))
}

/// Every long-lived component of the process.
pub struct Services {
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub metadata: Arc<MetadataStore>,
    pub registry: Arc<ModelRegistry>,
    pub features: Arc<FeatureStore>,
    pub trainer: Arc<TrainingOrchestrator>,
    pub cache: Arc<ModelCache>,
    pub optimizer: Arc<InferenceOptimizer>,
    pub inference: Arc<InferenceService>,
    pub batch: Arc<BatchQueue>,
}

impl Services {
    /// Production wiring: system clock and the synthetic extractor.
    pub fn build(config: AppConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let extractor = Arc::new(SyntheticExtractor::new(clock.clone(), config.feature_dims));
        Self::build_with(config, clock, extractor)
    }

    pub fn build_with(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        extractor: Arc<dyn FeatureExtractor>,
    ) -> Result<Self> {
        std::fs::create_dir_all(config.data_dir.join("sqlite")).context("create data dir")?;
        let blobs = FsBlobStore::open(&config.data_dir)
            .context("open artifact store")?;
        let metadata = Arc::new(
            MetadataStore::open(&config.data_dir.join("sqlite").join("modelops.db"))
                .context("open metadata store")?,
        );

        let catalog = Arc::new(build_catalog(&config.catalog)?);
        let policy = Arc::new(PolicyEngine::new(config.policy.clone(), catalog));
        let registry = Arc::new(ModelRegistry::new(
            metadata.clone(),
            ArtifactStore::new(Arc::new(blobs)),
            policy.clone(),
            clock.clone(),
        ));

        let features = Arc::new(FeatureStore::new(
            extractor,
            Duration::from_secs(config.feature_cache_ttl_secs),
            clock.clone(),
        ));
        let pool = WorkerPool::new(config.trainer.worker_threads);
        let trainer = Arc::new(TrainingOrchestrator::new(
            registry.clone(),
            features.clone(),
            policy,
            pool.clone(),
            clock.clone(),
            config.trainer.clone(),
        ));

        let cache = Arc::new(ModelCache::new(
            Duration::from_secs(config.serving.cache_ttl_secs),
            clock.clone(),
        ));
        let optimizer = Arc::new(InferenceOptimizer::new(
            registry.clone(),
            cache.clone(),
            pool,
            config.serving.clone(),
        ));
        let inference = Arc::new(InferenceService::new(
            optimizer.clone(),
            features.clone(),
            config.serving.clone(),
        ));
        let batch = Arc::new(BatchQueue::new(inference.clone(), &config.serving));

        tracing::info!(
            data_dir = %config.data_dir.display(),
            extractor = features.extractor_name(),
            worker_threads = config.trainer.worker_threads,
            "services wired"
        );
        Ok(Self {
            config,
            clock,
            metadata,
            registry,
            features,
            trainer,
            cache,
            optimizer,
            inference,
            batch,
        })
    }

    /// Start the batch processor, trigger loop and cache-invalidation
    /// listener. They stop when `shutdown` flips to true.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Background {
        let listener = spawn_invalidation_listener(self.cache.clone(), self.registry.subscribe());
        let batch = self.batch.spawn(shutdown.clone());
        let triggers = spawn_trigger_loop(
            self.trainer.clone(),
            Duration::from_secs(self.config.trigger_interval_secs.max(1)),
            shutdown,
        );
        Background {
            tasks: vec![batch, triggers],
            listener,
        }
    }
}

pub struct Background {
    tasks: Vec<JoinHandle<()>>,
    listener: JoinHandle<()>,
}

impl Background {
    /// Wait for the loops to finish, then stop the listener.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        self.listener.abort();
    }
}

/// One trigger check: start at most one job per model type, skipping types
/// that already have a job in flight. Returns handles of the started jobs;
/// dropping one leaves its job running.
pub fn run_trigger_cycle(trainer: &Arc<TrainingOrchestrator>) -> Vec<JobHandle> {
    let triggers = match trainer.check_retraining_triggers() {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "retraining trigger check failed");
            return Vec::new();
        }
    };

    let mut started = Vec::new();
    for (model_type, trigger) in dedupe_triggers(&triggers) {
        match has_job_in_flight(trainer, &model_type) {
            Ok(true) => {
                tracing::debug!(model_type = %model_type, "training already in flight");
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(model_type = %model_type, error = %e, "job lookup failed");
                continue;
            }
        }
        match trainer.start_training_job(&model_type, trigger, None) {
            Ok(handle) => {
                tracing::info!(
                    model_type = %model_type,
                    trigger = %trigger,
                    job_id = %handle.job_id,
                    "retraining started"
                );
                started.push(handle);
            }
            Err(e) => {
                tracing::warn!(model_type = %model_type, trigger = %trigger, error = %e, "retraining not started");
            }
        }
    }
    started
}

fn has_job_in_flight(trainer: &TrainingOrchestrator, model_type: &str) -> model_types::Result<bool> {
    Ok(trainer
        .list_jobs(Some(model_type), 20)?
        .iter()
        .any(|j| matches!(j.status, JobStatus::Pending | JobStatus::Running)))
}

pub fn spawn_trigger_loop(
    trainer: Arc<TrainingOrchestrator>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let started = run_trigger_cycle(&trainer);
                    if !started.is_empty() {
                        tracing::info!(jobs = started.len(), "trigger cycle started jobs");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("trigger loop stopped");
    })
}
