//! Benchmark and compress registered models; load serving variants.
//!
//! An optimized variant is written under its own key next to the registered
//! artifacts and never replaces them. Benchmarks use synthetic inputs drawn
//! around the scaler's means, exclude warm-up runs from timing, and abort a
//! level once its wall-clock budget is spent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use model_algos::{deserialize, CompressionOptions, Preprocessor, Trainable};
use model_registry::ModelRegistry;
use model_storage::ArtifactStore;
use model_types::{ArtifactKind, LifecycleError, ModelVersion, OptimizationLevel, WorkerPool};

use crate::cache::{LoadedModel, ModelCache};
use crate::metrics::percentile;
use crate::{Result, ServingConfig, ServingError};

const MIN_BENCHMARK_SAMPLES: usize = 1000;
const BENCHMARK_SEED: u64 = 0x5eed;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkMetrics {
    pub samples: usize,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub throughput_per_sec: f64,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub model_type: String,
    pub version: String,
    pub level: OptimizationLevel,
    /// Baseline p50 over optimized p50.
    pub speedup_factor: f64,
    /// Original size over optimized size.
    pub compression_ratio: f64,
    /// Set when the optimized artifact is larger than the original.
    pub size_regression: bool,
    /// Mean absolute difference between original and optimized predictions.
    pub prediction_drift: f64,
    pub values_rounded: usize,
    pub members_pruned: usize,
    pub metrics_before: BenchmarkMetrics,
    pub metrics_after: BenchmarkMetrics,
    pub artifact_key: String,
}

impl OptimizationResult {
    /// Smaller or faster without growing the artifact.
    pub fn is_improvement(&self) -> bool {
        !self.size_regression && (self.compression_ratio > 1.0 || self.speedup_factor > 1.0)
    }
}

pub struct InferenceOptimizer {
    registry: Arc<ModelRegistry>,
    cache: Arc<ModelCache>,
    pool: WorkerPool,
    config: ServingConfig,
}

impl InferenceOptimizer {
    pub fn new(
        registry: Arc<ModelRegistry>,
        cache: Arc<ModelCache>,
        pool: WorkerPool,
        config: ServingConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            pool,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    pub async fn optimize(
        &self,
        version: &str,
        model_type: &str,
        level: OptimizationLevel,
    ) -> Result<OptimizationResult> {
        let mv = self.registry.get_version(model_type, version)?;
        let artifacts = self.registry.artifacts();
        let model_bytes = artifacts.load(&mv.artifact_refs, ArtifactKind::Model)?;
        let scaler_bytes = artifacts.load(&mv.artifact_refs, ArtifactKind::Preprocessor)?;

        let settings = BenchSettings {
            samples: self.config.benchmark_samples.max(MIN_BENCHMARK_SAMPLES),
            warmup: self.config.warmup_runs,
            budget: Duration::from_millis(self.config.benchmark_budget_ms),
            level,
        };
        let out = self
            .pool
            .run(move || optimize_blocking(&model_bytes, &scaler_bytes, &settings))
            .await??;

        let key = ArtifactStore::optimized_key(model_type, &mv.model_id, level.as_str());
        artifacts.blobs().put(&key, &out.bytes)?;
        self.cache
            .set_optimized_level(model_type, &mv.model_id, Some(level));
        self.cache.invalidate(model_type, version, Some(level));

        let before = out.before;
        let after = out.after;
        let compression_ratio = before.size_bytes as f64 / after.size_bytes.max(1) as f64;
        let speedup_factor = if after.p50_ms > 0.0 {
            before.p50_ms / after.p50_ms
        } else {
            1.0
        };
        let result = OptimizationResult {
            model_type: model_type.to_string(),
            version: version.to_string(),
            level,
            speedup_factor,
            compression_ratio,
            size_regression: compression_ratio < 1.0,
            prediction_drift: out.drift,
            values_rounded: out.report.values_rounded,
            members_pruned: out.report.members_pruned,
            metrics_before: before,
            metrics_after: after,
            artifact_key: key,
        };
        if result.size_regression {
            tracing::warn!(
                model_type,
                version,
                level = %level,
                ratio = result.compression_ratio,
                "optimized artifact is larger than the original"
            );
        } else {
            tracing::info!(
                model_type,
                version,
                level = %level,
                ratio = result.compression_ratio,
                speedup = result.speedup_factor,
                drift = result.prediction_drift,
                "model optimized"
            );
        }
        Ok(result)
    }

    /// Run several levels one after another. A level that fails, including
    /// one that runs over its budget, does not stop the others.
    pub async fn optimize_levels(
        &self,
        version: &str,
        model_type: &str,
        levels: &[OptimizationLevel],
    ) -> Vec<(OptimizationLevel, Result<OptimizationResult>)> {
        let mut out = Vec::with_capacity(levels.len());
        for level in levels {
            let res = self.optimize(version, model_type, *level).await;
            if let Err(e) = &res {
                tracing::warn!(model_type, version, level = %level, error = %e, "optimization level skipped");
            }
            out.push((*level, res));
        }
        out
    }

    /// Level of the optimized variant stored for `mv`, if any. The answer is
    /// remembered until the next serving change of the type.
    pub fn optimized_level(&self, mv: &ModelVersion) -> Option<OptimizationLevel> {
        if let Some(known) = self.cache.optimized_level(&mv.model_type, &mv.model_id) {
            return known;
        }
        let blobs = self.registry.artifacts().blobs();
        let found = OptimizationLevel::ALL.into_iter().rev().find(|l| {
            blobs.exists(&ArtifactStore::optimized_key(
                &mv.model_type,
                &mv.model_id,
                l.as_str(),
            ))
        });
        self.cache
            .set_optimized_level(&mv.model_type, &mv.model_id, found);
        found
    }

    /// Cached model for `mv` at `level` (`None` = registered artifact). A warm
    /// hit returns without suspending.
    pub async fn load_model(
        &self,
        mv: &ModelVersion,
        level: Option<OptimizationLevel>,
    ) -> Result<Arc<LoadedModel>> {
        if let Some(hit) = self.cache.get(&mv.model_type, &mv.version, level) {
            return Ok(hit);
        }

        let artifacts = self.registry.artifacts().clone();
        let mv_owned = mv.clone();
        let loaded = tokio::task::spawn_blocking(move || read_model(&artifacts, mv_owned, level))
            .await
            .map_err(|e| LifecycleError::storage(format!("model load task failed: {e}")))??;

        let loaded = Arc::new(loaded);
        self.cache.insert(&mv.model_type, loaded.clone());
        tracing::debug!(
            model_type = %mv.model_type,
            version = %mv.version,
            level = ?level,
            "model loaded into cache"
        );
        Ok(loaded)
    }
}

fn read_model(
    artifacts: &ArtifactStore,
    mv: ModelVersion,
    level: Option<OptimizationLevel>,
) -> Result<LoadedModel> {
    let model_bytes = match level {
        None => artifacts.load(&mv.artifact_refs, ArtifactKind::Model)?,
        Some(l) => artifacts.blobs().get(&ArtifactStore::optimized_key(
            &mv.model_type,
            &mv.model_id,
            l.as_str(),
        ))?,
    };
    let scaler = Preprocessor::from_bytes(&artifacts.load(&mv.artifact_refs, ArtifactKind::Preprocessor)?)?;
    Ok(LoadedModel {
        model: deserialize(&model_bytes)?,
        scaler,
        model_id: mv.model_id,
        version: mv.version,
        level,
    })
}

struct BenchSettings {
    samples: usize,
    warmup: usize,
    budget: Duration,
    level: OptimizationLevel,
}

struct Optimized {
    bytes: Vec<u8>,
    before: BenchmarkMetrics,
    after: BenchmarkMetrics,
    report: model_algos::CompressionReport,
    drift: f64,
}

fn optimize_blocking(model_bytes: &[u8], scaler_bytes: &[u8], s: &BenchSettings) -> Result<Optimized> {
    let scaler = Preprocessor::from_bytes(scaler_bytes)?;
    let original = deserialize(model_bytes)?;
    let inputs = synthetic_inputs(&scaler, s.samples);
    let deadline = Instant::now() + s.budget;

    let before = benchmark(original.as_ref(), &scaler, &inputs, model_bytes.len(), s, deadline)?;

    let mut compressed = deserialize(model_bytes)?;
    let opts = CompressionOptions::for_level(s.level);
    let report = compressed.compress(&opts);
    let bytes = compressed.serialize(opts.format)?;

    let after = benchmark(compressed.as_ref(), &scaler, &inputs, bytes.len(), s, deadline)?;

    let mut drift = 0.0;
    for raw in &inputs {
        let row = scaler.transform_row(raw)?;
        drift += (original.predict(&row)?.value - compressed.predict(&row)?.value).abs();
    }
    drift /= inputs.len().max(1) as f64;

    Ok(Optimized {
        bytes,
        before,
        after,
        report,
        drift,
    })
}

/// Rows spread over two standard deviations around each feature mean.
fn synthetic_inputs(scaler: &Preprocessor, samples: usize) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(BENCHMARK_SEED);
    (0..samples)
        .map(|_| {
            scaler
                .means
                .iter()
                .zip(&scaler.stds)
                .map(|(m, sd)| m + sd * rng.gen_range(-2.0..=2.0))
                .collect()
        })
        .collect()
}

fn benchmark(
    model: &dyn Trainable,
    scaler: &Preprocessor,
    inputs: &[Vec<f64>],
    size_bytes: usize,
    s: &BenchSettings,
    deadline: Instant,
) -> Result<BenchmarkMetrics> {
    let over_budget = || ServingError::BudgetExceeded {
        level: s.level,
        budget_ms: s.budget.as_millis() as u64,
    };

    for raw in inputs.iter().cycle().take(s.warmup) {
        model.predict(&scaler.transform_row(raw)?)?;
    }

    let mut latencies = Vec::with_capacity(inputs.len());
    let started = Instant::now();
    for (i, raw) in inputs.iter().enumerate() {
        if i % 64 == 0 && Instant::now() >= deadline {
            return Err(over_budget());
        }
        let t = Instant::now();
        model.predict(&scaler.transform_row(raw)?)?;
        latencies.push(t.elapsed().as_secs_f64() * 1000.0);
    }
    let total = started.elapsed().as_secs_f64();

    latencies.sort_by(|a, b| a.total_cmp(b));
    Ok(BenchmarkMetrics {
        samples: latencies.len(),
        p50_ms: percentile(&latencies, 0.50),
        p95_ms: percentile(&latencies, 0.95),
        p99_ms: percentile(&latencies, 0.99),
        throughput_per_sec: if total > 0.0 {
            latencies.len() as f64 / total
        } else {
            0.0
        },
        size_bytes,
    })
}
