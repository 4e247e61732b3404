use std::collections::BTreeMap;

use serde::Serialize;

use model_storage::{ArtifactStore, VersionGrouping};
use model_types::{
    ArtifactKind, LifecycleError, ModelStatus, ModelVersion, OptimizationLevel, Result, DAY_MS,
};

use crate::ModelRegistry;

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub version: ModelVersion,
    pub artifact_bytes: u64,
    pub missing_artifacts: Vec<ArtifactKind>,
    pub in_ab_test: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStatistics {
    pub total_versions: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_model_type: BTreeMap<String, usize>,
    /// model_type -> active version string
    pub active_versions: BTreeMap<String, String>,
    pub active_ab_tests: usize,
    pub total_artifact_bytes: u64,
}

impl ModelRegistry {
    pub fn get_model_info(&self, model_id: &str) -> Result<ModelInfo> {
        let version = self.require_version(model_id)?;
        let in_ab_test = self
            .metadata
            .active_ab_test(&version.model_type)?
            .map_or(false, |t| t.version_a == version.version || t.version_b == version.version);
        Ok(ModelInfo {
            artifact_bytes: self.artifacts.total_size(&version.artifact_refs),
            missing_artifacts: self.artifacts.missing(&version.artifact_refs),
            in_ab_test,
            version,
        })
    }

    /// Delete records and artifacts of inactive or deprecated versions
    /// created more than `older_than_days` ago. Versions still named by an
    /// active A/B test are kept. Each version is removed under its type's
    /// slot lock. A failure on one version is logged and the rest still run.
    /// Returns the number of records removed.
    pub async fn cleanup_old(&self, older_than_days: u32) -> Result<usize> {
        let cutoff = self.clock.now_ms() - older_than_days as i64 * DAY_MS;
        let candidates = self.metadata.retired_versions_before(cutoff)?;

        let mut removed = 0;
        for v in candidates {
            let lock = self.slot_lock(&v.model_type);
            let _slot = lock.lock().await;

            match self.metadata.active_ab_test(&v.model_type) {
                Ok(Some(t)) if t.version_a == v.version || t.version_b == v.version => continue,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(model_id = %v.model_id, error = %e, "cleanup skipped version");
                    continue;
                }
            }
            match self.remove_retired_locked(&v) {
                Ok(true) => removed += 1,
                Ok(false) => {
                    tracing::debug!(model_id = %v.model_id, "version back in service, kept")
                }
                Err(e) => {
                    tracing::warn!(model_id = %v.model_id, error = %e, "version record delete failed")
                }
            }
        }
        Ok(removed)
    }

    /// Remove a freshly registered version that never went into service,
    /// such as the output of a training run whose bookkeeping failed.
    pub async fn discard_version(&self, model_id: &str) -> Result<()> {
        let v = self.require_version(model_id)?;
        let lock = self.slot_lock(&v.model_type);
        let _slot = lock.lock().await;

        if self.remove_retired_locked(&v)? {
            Ok(())
        } else {
            Err(LifecycleError::validation(format!(
                "{} {} is in service and cannot be discarded",
                v.model_type, v.version
            )))
        }
    }

    /// Delete the record of `v` if it is still retired, then its files.
    /// Returns false when the record was gone or back in service, in which
    /// case no file is touched. Caller holds the slot lock.
    fn remove_retired_locked(&self, v: &ModelVersion) -> Result<bool> {
        if !self.metadata.delete_retired_version(&v.model_id)? {
            return Ok(false);
        }
        let blobs = self.artifacts.delete_refs(&v.artifact_refs);
        for level in OptimizationLevel::ALL {
            let key = ArtifactStore::optimized_key(&v.model_type, &v.model_id, level.as_str());
            if let Err(e) = self.artifacts.blobs().delete(&key) {
                tracing::warn!(key = %key, error = %e, "optimized artifact delete failed");
            }
        }
        tracing::info!(
            model_type = %v.model_type,
            version = %v.version,
            blobs,
            "retired version removed"
        );
        Ok(true)
    }

    pub fn get_registry_statistics(&self) -> Result<RegistryStatistics> {
        let by_status = self.metadata.count_versions_by(VersionGrouping::Status)?;
        let by_model_type = self.metadata.count_versions_by(VersionGrouping::ModelType)?;
        let all = self.metadata.list_versions(None, None)?;

        let active_versions = all
            .iter()
            .filter(|v| v.status == ModelStatus::Active)
            .map(|v| (v.model_type.clone(), v.version.clone()))
            .collect();
        let total_artifact_bytes = all
            .iter()
            .map(|v| self.artifacts.total_size(&v.artifact_refs))
            .sum();

        Ok(RegistryStatistics {
            total_versions: all.len(),
            by_status,
            by_model_type,
            active_versions,
            active_ab_tests: self.metadata.count_running_ab_tests(self.clock.now_ms())?,
            total_artifact_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use model_types::{DeploymentStrategy, ModelStatus};

    use crate::testutil::*;

    #[tokio::test]
    async fn cleanup_is_idempotent_and_spares_active() {
        let f = setup();
        let v1 = f
            .registry
            .register(new_version("risk_scorer", "v1", 0.9))
            .await
            .unwrap();
        let v2 = f
            .registry
            .register(new_version("risk_scorer", "v2", 0.9))
            .await
            .unwrap();
        f.registry
            .deploy(&v2, DeploymentStrategy::Immediate, None)
            .await
            .unwrap();
        f.clock.advance(Duration::from_secs(40 * 86_400));

        assert_eq!(f.registry.cleanup_old(30).await.unwrap(), 1);
        assert_eq!(f.registry.cleanup_old(30).await.unwrap(), 0);
        assert!(f.registry.get_model_info(&v1).is_err());
        assert!(f.registry.get_model_info(&v2).is_ok());
        // only v2's two files remain, plus its serving copies
        assert_eq!(f.blobs.len(), 4);
    }

    #[tokio::test]
    async fn recent_versions_survive_cleanup() {
        let f = setup();
        f.registry
            .register(new_version("risk_scorer", "v1", 0.9))
            .await
            .unwrap();
        assert_eq!(f.registry.cleanup_old(30).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cleanup_keeps_a_version_reactivated_while_it_waited() {
        let f = setup();
        let v1 = f
            .registry
            .register(new_version("risk_scorer", "v1", 0.9))
            .await
            .unwrap();
        let v2 = f
            .registry
            .register(new_version("risk_scorer", "v2", 0.9))
            .await
            .unwrap();
        f.registry
            .deploy(&v2, DeploymentStrategy::Immediate, None)
            .await
            .unwrap();
        f.clock.advance(Duration::from_secs(40 * 86_400));

        let registry = Arc::new(f.registry);
        let lock = registry.slot_lock("risk_scorer");
        let slot = lock.lock().await;
        let cleanup = tokio::spawn({
            let registry = registry.clone();
            async move { registry.cleanup_old(30).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        // a rollback puts v1 back in service while cleanup holds a stale list
        registry
            .metadata()
            .activate("risk_scorer", &v1, 1, 1)
            .unwrap();
        drop(slot);

        assert_eq!(cleanup.await.unwrap().unwrap(), 0);
        let info = registry.get_model_info(&v1).unwrap();
        assert_eq!(info.version.status, ModelStatus::Active);
        assert!(info.missing_artifacts.is_empty());
    }

    #[tokio::test]
    async fn discard_removes_unused_version_only() {
        let f = setup();
        let v1 = f
            .registry
            .register(new_version("risk_scorer", "v1", 0.9))
            .await
            .unwrap();
        let v2 = f
            .registry
            .register(new_version("risk_scorer", "v2", 0.9))
            .await
            .unwrap();
        f.registry
            .deploy(&v1, DeploymentStrategy::Immediate, None)
            .await
            .unwrap();
        let before = f.blobs.len();

        f.registry.discard_version(&v2).await.unwrap();
        assert!(f.registry.get_model_info(&v2).is_err());
        assert_eq!(f.blobs.len(), before - 2);

        assert!(f.registry.discard_version(&v1).await.unwrap_err().is_validation());
        assert!(f.registry.get_model_info(&v1).is_ok());
    }

    #[tokio::test]
    async fn statistics_summarize_registry() {
        let f = setup();
        let v1 = f
            .registry
            .register(new_version("risk_scorer", "v1", 0.9))
            .await
            .unwrap();
        f.registry
            .register(new_version("impact_classifier", "v1", 0.9))
            .await
            .unwrap();
        f.registry
            .deploy(&v1, DeploymentStrategy::Immediate, None)
            .await
            .unwrap();

        let stats = f.registry.get_registry_statistics().unwrap();
        assert_eq!(stats.total_versions, 2);
        assert_eq!(stats.by_status.get("active"), Some(&1));
        assert_eq!(stats.by_status.get("inactive"), Some(&1));
        assert_eq!(stats.by_model_type.get("risk_scorer"), Some(&1));
        assert_eq!(stats.active_versions.get("risk_scorer").map(String::as_str), Some("v1"));
        assert_eq!(stats.active_ab_tests, 0);
        assert!(stats.total_artifact_bytes > 0);

        let info = f.registry.get_model_info(&v1).unwrap();
        assert!(info.missing_artifacts.is_empty());
        assert!(!info.in_ab_test);
    }
}
