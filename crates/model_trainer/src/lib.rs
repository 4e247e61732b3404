//! Training orchestrator: decides when a model type needs retraining and
//! runs training jobs in the background.
//!
//! Design:
//! - Trigger checks only report; the caller picks one job per model type
//! - `start_training_job` records a pending job and returns a handle at once
//! - Fit and evaluation run on the shared worker pool
//! - Every failure ends the job `failed` with the message kept verbatim;
//!   nothing is retried and nothing is registered

mod pipeline;
mod triggers;

pub use triggers::dedupe_triggers;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use tokio::task::JoinHandle;

use model_features::FeatureStore;
use model_policy::{PolicyDecision, PolicyEngine};
use model_registry::{ModelRegistry, NewVersion};
use model_storage::MetadataStore;
use model_types::{
    Clock, JobStatus, LifecycleError, MetricRecord, OpaqueConfig, Result, TrainingJob,
    TriggerType, WorkerPool, DAY_MS,
};

use crate::pipeline::FitInput;

#[derive(Debug, Clone, Deserialize)]
pub struct TrainerConfig {
    #[serde(default = "default_schedule_days")]
    pub schedule_interval_days: u32,
    /// Unprocessed feedback per category that triggers its owner.
    #[serde(default = "default_category_min")]
    pub feedback_category_min: usize,
    /// The feedback check is skipped below this many unprocessed records.
    #[serde(default = "default_total_gate")]
    pub feedback_total_gate: usize,
    #[serde(default = "default_train_fraction")]
    pub train_fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Size of the shared worker pool for fits and benchmarks.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

fn default_schedule_days() -> u32 {
    7
}
fn default_category_min() -> usize {
    20
}
fn default_total_gate() -> usize {
    50
}
fn default_train_fraction() -> f64 {
    0.8
}
fn default_seed() -> u64 {
    42
}
fn default_worker_threads() -> usize {
    2
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            schedule_interval_days: default_schedule_days(),
            feedback_category_min: default_category_min(),
            feedback_total_gate: default_total_gate(),
            train_fraction: default_train_fraction(),
            seed: default_seed(),
            worker_threads: default_worker_threads(),
        }
    }
}

/// Keys the trainer itself reads from a job's training config; everything
/// else goes to the algorithm.
const TRAINER_KEYS: &[&str] = &["seed"];

/// Handle to a background training job.
pub struct JobHandle {
    pub job_id: String,
    task: JoinHandle<TrainingJob>,
}

impl JobHandle {
    /// Wait for the job to reach a terminal state.
    pub async fn wait(self) -> Result<TrainingJob> {
        self.task
            .await
            .map_err(|e| LifecycleError::storage(format!("training task {} aborted: {e}", self.job_id)))
    }
}

pub struct TrainingOrchestrator {
    metadata: Arc<MetadataStore>,
    registry: Arc<ModelRegistry>,
    features: Arc<FeatureStore>,
    policy: Arc<PolicyEngine>,
    pool: WorkerPool,
    clock: Arc<dyn Clock>,
    config: TrainerConfig,
}

impl TrainingOrchestrator {
    pub fn new(
        registry: Arc<ModelRegistry>,
        features: Arc<FeatureStore>,
        policy: Arc<PolicyEngine>,
        pool: WorkerPool,
        clock: Arc<dyn Clock>,
        config: TrainerConfig,
    ) -> Self {
        Self {
            metadata: registry.metadata().clone(),
            registry,
            features,
            policy,
            pool,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Record a pending job and run it in the background. Configuration
    /// problems are reported here; anything later lands on the job row.
    pub fn start_training_job(
        self: &Arc<Self>,
        model_type: &str,
        trigger_type: TriggerType,
        config_override: Option<OpaqueConfig>,
    ) -> Result<JobHandle> {
        if let PolicyDecision::Deny(reason) = self.policy.can_train(model_type) {
            return Err(LifecycleError::validation(reason));
        }
        let spec = self.registry.catalog().get(model_type)?;
        let training_config = match &config_override {
            Some(o) => spec.hyperparameters.merged(o),
            None => spec.hyperparameters.clone(),
        };
        let mut algo_config = training_config.clone();
        for key in TRAINER_KEYS {
            algo_config.remove(key);
        }
        model_algos::new_model(spec.algorithm, &algo_config)?;
        if training_config.get("seed").is_some() && training_config.get_u64("seed").is_none() {
            return Err(LifecycleError::validation("seed must be a non-negative integer"));
        }

        let now = self.clock.now_ms();
        let job_id = uuid::Uuid::new_v4().to_string();
        let job = TrainingJob {
            new_model_version: format!("v{now}-{}", &job_id[..8]),
            job_id: job_id.clone(),
            model_type: model_type.to_string(),
            trigger_type,
            status: JobStatus::Pending,
            previous_model_version: self.metadata.active_version(model_type)?.map(|v| v.version),
            new_model_id: None,
            training_config,
            created_at_ms: now,
            started_at_ms: None,
            completed_at_ms: None,
            performance_improvement: None,
            error_message: None,
        };
        self.metadata.insert_job(&job)?;
        tracing::info!(
            job_id = %job_id,
            model_type,
            trigger = %trigger_type,
            version = %job.new_model_version,
            "training job queued"
        );

        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.run_job(job).await });
        Ok(JobHandle { job_id, task })
    }

    pub fn get_training_job_status(&self, job_id: &str) -> Result<TrainingJob> {
        self.metadata
            .get_job(job_id)?
            .ok_or_else(|| LifecycleError::not_found(format!("training job {job_id}")))
    }

    pub fn list_jobs(&self, model_type: Option<&str>, limit: usize) -> Result<Vec<TrainingJob>> {
        Ok(self.metadata.list_jobs(model_type, limit)?)
    }

    /// Metric records for `model_type` from the last `days` days, oldest first.
    pub fn get_performance_history(&self, model_type: &str, days: u32) -> Result<Vec<MetricRecord>> {
        self.registry.catalog().get(model_type)?;
        let since = self.clock.now_ms() - days as i64 * DAY_MS;
        Ok(self.metadata.metric_history(model_type, since)?)
    }

    async fn run_job(&self, mut job: TrainingJob) -> TrainingJob {
        job.status = JobStatus::Running;
        job.started_at_ms = Some(self.clock.now_ms());
        if let Err(e) = self.metadata.update_job(&job) {
            tracing::warn!(job_id = %job.job_id, error = %e, "could not mark job running");
        }
        tracing::info!(job_id = %job.job_id, model_type = %job.model_type, "training job started");

        match self.execute(&job).await {
            Ok(outcome) => {
                job.status = JobStatus::Completed;
                job.new_model_id = Some(outcome.model_id);
                job.performance_improvement = outcome.improvement;
                tracing::info!(
                    job_id = %job.job_id,
                    model_type = %job.model_type,
                    version = %job.new_model_version,
                    samples = outcome.samples,
                    improvement = ?outcome.improvement,
                    "training job completed"
                );
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error_message = Some(e.to_string());
                tracing::warn!(
                    job_id = %job.job_id,
                    model_type = %job.model_type,
                    error = %e,
                    "training job failed"
                );
            }
        }
        job.completed_at_ms = Some(self.clock.now_ms());
        if let Err(e) = self.metadata.update_job(&job) {
            tracing::error!(job_id = %job.job_id, error = %e, "could not record job outcome");
        }
        job
    }

    async fn execute(&self, job: &TrainingJob) -> Result<JobOutcome> {
        let spec = self.registry.catalog().get(&job.model_type)?.clone();

        let prepared = pipeline::prepare(&self.metadata, &self.features, &spec).await?;
        if prepared.samples() < spec.min_training_samples {
            return Err(LifecycleError::InsufficientData {
                model_type: spec.name.clone(),
                found: prepared.samples(),
                required: spec.min_training_samples,
            });
        }
        let samples = prepared.samples();

        let mut hyper = job.training_config.clone();
        let seed = hyper.get_u64("seed").unwrap_or(self.config.seed);
        for key in TRAINER_KEYS {
            hyper.remove(key);
        }
        let input = FitInput {
            task: spec.task,
            algorithm: spec.algorithm,
            hyper,
            feature_names: prepared.feature_names,
            x: prepared.x,
            y: prepared.y,
            train_fraction: self.config.train_fraction,
            seed,
        };
        let trained = self.pool.run(move || pipeline::fit_and_evaluate(input)).await??;

        let improvement = match &job.previous_model_version {
            Some(prev) => self
                .metadata
                .find_version(&job.model_type, prev)?
                .and_then(|v| v.metric(&spec.primary_metric))
                .zip(trained.metrics.get(&spec.primary_metric).copied())
                .map(|(old, new)| new - old),
            None => None,
        };

        let tags: BTreeSet<String> = [
            format!("trigger:{}", job.trigger_type),
            format!("job:{}", job.job_id),
        ]
        .into_iter()
        .collect();
        let model_id = self
            .registry
            .register(NewVersion {
                model_type: job.model_type.clone(),
                version: job.new_model_version.clone(),
                artifacts: trained.bundle,
                metrics: trained.metrics.clone(),
                config: job.training_config.clone(),
                tags,
            })
            .await?;

        let now = self.clock.now_ms();
        let metrics: Vec<MetricRecord> = trained
            .metrics
            .iter()
            .map(|(name, value)| MetricRecord {
                model_type: job.model_type.clone(),
                model_version: job.new_model_version.clone(),
                metric_name: name.clone(),
                value: *value,
                recorded_at_ms: now,
            })
            .collect();
        let marked = match self
            .metadata
            .record_training_outcome(&metrics, &prepared.feedback_ids)
        {
            Ok(marked) => marked,
            Err(e) => {
                // roll the registration back
                if let Err(discard) = self.registry.discard_version(&model_id).await {
                    tracing::error!(
                        job_id = %job.job_id,
                        model_id = %model_id,
                        error = %discard,
                        "could not discard version of failed job"
                    );
                }
                return Err(e.into());
            }
        };
        tracing::debug!(job_id = %job.job_id, marked, "feedback consumed");

        Ok(JobOutcome {
            model_id,
            improvement,
            samples,
        })
    }
}

struct JobOutcome {
    model_id: String,
    improvement: Option<f64>,
    samples: usize,
}
