//! Shared data model for the model lifecycle: versions, training jobs,
//! A/B tests, feature vectors, opaque configuration and the model-type catalog.

pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod deploy;
pub mod error;
pub mod features;
pub mod job;
pub mod level;
pub mod pool;
pub mod records;
pub mod version;

pub use cache::{CacheStats, TtlCache};
pub use catalog::{AlgorithmKind, ModelCatalog, ModelTypeSpec, TaskKind};
pub use clock::{Clock, ManualClock, SystemClock, DAY_MS};
pub use config::{ConfigValue, KeySpec, OpaqueConfig, ValueType};
pub use deploy::{
    ABTestConfig, DeploymentEvent, DeploymentEventKind, DeploymentStrategy, RollbackPlan,
};
pub use error::{LifecycleError, Result};
pub use features::{Feature, FeatureKind, FeatureValue, FeatureVector};
pub use job::{JobStatus, TrainingJob, TriggerType};
pub use level::OptimizationLevel;
pub use pool::WorkerPool;
pub use records::{FeedbackRecord, MetricRecord};
pub use version::{ArtifactKind, ModelStatus, ModelVersion};
