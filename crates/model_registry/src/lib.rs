//! Model registry: source of truth for versions, their status and the
//! active slot per model type.
//!
//! Design:
//! - Register copies artifacts into the store and records an inactive version
//! - Deploy/Rollback/Promote run under a per-model-type async lock, and the
//!   active swap itself is one SQLite transaction
//! - Routing reads the active A/B test through a TTL cache that every
//!   mutation invalidates
//! - Every serving change is published on a broadcast channel

mod deploy;
mod maintenance;
mod routing;

pub use maintenance::{ModelInfo, RegistryStatistics};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use model_policy::{PolicyEngine, ValidationCheck, VersionEvidence};
use model_storage::{ArtifactBundle, ArtifactStore, MetadataStore};
use model_types::{
    ABTestConfig, Clock, DeploymentEvent, LifecycleError, ModelCatalog, ModelStatus, ModelVersion,
    OpaqueConfig, Result, TtlCache,
};

const EVENT_CAPACITY: usize = 64;
const AB_CACHE_TTL: Duration = Duration::from_secs(30);

/// Input to [`ModelRegistry::register`].
#[derive(Debug, Clone, Default)]
pub struct NewVersion {
    pub model_type: String,
    pub version: String,
    pub artifacts: ArtifactBundle,
    pub metrics: BTreeMap<String, f64>,
    pub config: OpaqueConfig,
    pub tags: BTreeSet<String>,
}

pub struct ModelRegistry {
    metadata: Arc<MetadataStore>,
    artifacts: ArtifactStore,
    policy: Arc<PolicyEngine>,
    clock: Arc<dyn Clock>,
    slot_locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    ab_cache: TtlCache<String, Option<ABTestConfig>>,
    events: broadcast::Sender<DeploymentEvent>,
}

impl ModelRegistry {
    pub fn new(
        metadata: Arc<MetadataStore>,
        artifacts: ArtifactStore,
        policy: Arc<PolicyEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            metadata,
            artifacts,
            policy,
            ab_cache: TtlCache::new(AB_CACHE_TTL, clock.clone()),
            clock,
            slot_locks: parking_lot::Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        self.policy.catalog()
    }

    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.events.subscribe()
    }

    /// Store the artifacts under a fresh id and record an inactive version.
    pub async fn register(&self, new: NewVersion) -> Result<String> {
        let spec = self.catalog().get(&new.model_type)?;
        if new.version.trim().is_empty() {
            return Err(LifecycleError::validation("version string is empty"));
        }
        let missing: Vec<&str> = spec
            .required_artifacts
            .iter()
            .filter(|k| !new.artifacts.contains_key(*k))
            .map(|k| k.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(LifecycleError::validation(format!(
                "{} {}: missing artifact kinds: {}",
                new.model_type,
                new.version,
                missing.join(", ")
            )));
        }
        if self
            .metadata
            .find_version(&new.model_type, &new.version)?
            .is_some()
        {
            return Err(LifecycleError::validation(format!(
                "{} {} is already registered",
                new.model_type, new.version
            )));
        }

        let model_id = uuid::Uuid::new_v4().to_string();
        let (artifact_refs, checksum) =
            self.artifacts
                .store_bundle(&new.model_type, &model_id, &new.artifacts)?;

        let version = ModelVersion {
            model_id: model_id.clone(),
            model_type: new.model_type,
            version: new.version,
            status: ModelStatus::Inactive,
            created_at_ms: self.clock.now_ms(),
            deployed_at_ms: None,
            deprecated_at_ms: None,
            performance_metrics: new.metrics,
            training_config: new.config,
            artifact_refs,
            checksum,
            tags: new.tags,
        };
        if let Err(e) = self.metadata.insert_version(&version) {
            self.artifacts.delete_refs(&version.artifact_refs);
            return Err(e.into());
        }

        tracing::info!(
            model_type = %version.model_type,
            version = %version.version,
            model_id = %model_id,
            checksum = %version.checksum,
            "model registered"
        );
        Ok(model_id)
    }

    pub fn list_models(
        &self,
        model_type: Option<&str>,
        status: Option<ModelStatus>,
    ) -> Result<Vec<ModelVersion>> {
        Ok(self.metadata.list_versions(model_type, status)?)
    }

    /// Version of `model_type` named `version`.
    pub fn get_version(&self, model_type: &str, version: &str) -> Result<ModelVersion> {
        self.require_named(model_type, version)
    }

    pub(crate) fn require_version(&self, model_id: &str) -> Result<ModelVersion> {
        self.metadata
            .get_version(model_id)?
            .ok_or_else(|| LifecycleError::not_found(format!("model {model_id}")))
    }

    pub(crate) fn require_named(&self, model_type: &str, version: &str) -> Result<ModelVersion> {
        self.metadata
            .find_version(model_type, version)?
            .ok_or_else(|| LifecycleError::not_found(format!("{model_type} version {version}")))
    }

    pub(crate) fn slot_lock(&self, model_type: &str) -> Arc<Mutex<()>> {
        self.slot_locks
            .lock()
            .entry(model_type.to_string())
            .or_default()
            .clone()
    }

    /// Run `checks` against what the store currently holds for `version`.
    /// A recomputed checksum that differs is an integrity incident; any other
    /// failed check is a validation error.
    pub(crate) fn validate(&self, checks: &[ValidationCheck], version: &ModelVersion) -> Result<()> {
        let missing_artifacts = self.artifacts.missing(&version.artifact_refs);
        let recomputed_checksum = if missing_artifacts.is_empty() {
            Some(self.artifacts.recompute_checksum(&version.artifact_refs)?)
        } else {
            None
        };
        let evidence = VersionEvidence {
            version,
            missing_artifacts,
            recomputed_checksum,
        };

        match self.policy.evaluate(checks, &evidence) {
            Ok(()) => Ok(()),
            Err(failure) if failure.check == ValidationCheck::ChecksumMatches => {
                let actual = evidence.recomputed_checksum.unwrap_or_default();
                tracing::error!(
                    model_type = %version.model_type,
                    version = %version.version,
                    model_id = %version.model_id,
                    expected = %version.checksum,
                    actual = %actual,
                    "artifact checksum mismatch"
                );
                Err(LifecycleError::Integrity {
                    model_id: version.model_id.clone(),
                    expected: version.checksum.clone(),
                    actual,
                })
            }
            Err(failure) => Err(LifecycleError::validation(format!(
                "{} {}: {} failed: {}",
                version.model_type, version.version, failure.check, failure.reason
            ))),
        }
    }

    pub(crate) fn publish(&self, event: DeploymentEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use model_types::ArtifactKind;

    #[tokio::test]
    async fn register_records_inactive_version() {
        let f = setup();
        let id = f
            .registry
            .register(new_version("risk_scorer", "v1", 0.9))
            .await
            .unwrap();

        let v = f.registry.require_version(&id).unwrap();
        assert_eq!(v.status, ModelStatus::Inactive);
        assert_eq!(v.artifact_refs.len(), 2);
        assert_eq!(v.checksum.len(), 64);
        assert_eq!(f.blobs.len(), 2);
    }

    #[tokio::test]
    async fn register_requires_artifact_kinds() {
        let f = setup();
        let mut nv = new_version("risk_scorer", "v1", 0.9);
        nv.artifacts.remove(&ArtifactKind::Preprocessor);
        let err = f.registry.register(nv).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(ref m) if m.contains("preprocessor")));
        assert!(f.blobs.is_empty());
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_unknown_types() {
        let f = setup();
        f.registry
            .register(new_version("risk_scorer", "v1", 0.9))
            .await
            .unwrap();
        assert!(f
            .registry
            .register(new_version("risk_scorer", "v1", 0.9))
            .await
            .unwrap_err()
            .is_validation());
        assert!(f
            .registry
            .register(new_version("sentiment", "v1", 0.9))
            .await
            .unwrap_err()
            .is_validation());
    }

    #[tokio::test]
    async fn list_filters_by_type_and_status() {
        let f = setup();
        f.registry
            .register(new_version("risk_scorer", "v1", 0.9))
            .await
            .unwrap();
        f.registry
            .register(new_version("impact_classifier", "v1", 0.9))
            .await
            .unwrap();
        assert_eq!(f.registry.list_models(None, None).unwrap().len(), 2);
        assert_eq!(
            f.registry
                .list_models(Some("risk_scorer"), Some(ModelStatus::Inactive))
                .unwrap()
                .len(),
            1
        );
        assert!(f
            .registry
            .list_models(None, Some(ModelStatus::Active))
            .unwrap()
            .is_empty());
    }
}
