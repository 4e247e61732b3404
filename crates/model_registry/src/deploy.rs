use model_policy::{DEPLOY_CHECKS, ROLLBACK_CHECKS};
use model_types::{
    ABTestConfig, DeploymentEvent, DeploymentEventKind, DeploymentStrategy, LifecycleError,
    ModelStatus, ModelVersion, Result, RollbackPlan,
};

use crate::ModelRegistry;

impl ModelRegistry {
    /// Validate `model_id` and put it into service with `strategy`.
    ///
    /// Validation failures are errors. `Ok(false)` means validation passed
    /// but a strategy precondition did not hold and nothing was changed.
    pub async fn deploy(
        &self,
        model_id: &str,
        strategy: DeploymentStrategy,
        ab_config: Option<ABTestConfig>,
    ) -> Result<bool> {
        let model_type = self.require_version(model_id)?.model_type;
        let lock = self.slot_lock(&model_type);
        let _slot = lock.lock().await;

        let candidate = self.require_version(model_id)?;
        if candidate.status == ModelStatus::Failed {
            return Err(LifecycleError::validation(format!(
                "{} {} is marked failed",
                candidate.model_type, candidate.version
            )));
        }
        self.validate(DEPLOY_CHECKS, &candidate)?;

        match strategy {
            DeploymentStrategy::Immediate => {
                self.activate_locked(&candidate, DeploymentEventKind::Deployed)?;
                Ok(true)
            }
            DeploymentStrategy::Gradual | DeploymentStrategy::Canary => {
                tracing::warn!(
                    model_type = %candidate.model_type,
                    version = %candidate.version,
                    strategy = %strategy,
                    "staged rollout is delegated to the load balancer; deploying immediately"
                );
                self.activate_locked(&candidate, DeploymentEventKind::Deployed)?;
                Ok(true)
            }
            DeploymentStrategy::AbTest => self.start_ab_test_locked(&candidate, ab_config),
        }
    }

    /// Swap the active slot back to `target_version`, or to the most recently
    /// deployed version older than the current one.
    pub async fn rollback(
        &self,
        model_type: &str,
        target_version: Option<&str>,
        reason: &str,
    ) -> Result<bool> {
        self.catalog().get(model_type)?;
        let lock = self.slot_lock(model_type);
        let _slot = lock.lock().await;

        let current = self.metadata.active_version(model_type)?;
        let target = match target_version {
            Some(v) => self.require_named(model_type, v)?,
            None => self.previous_deployment(model_type, current.as_ref())?,
        };
        if current.as_ref().map(|c| &c.model_id) == Some(&target.model_id) {
            tracing::warn!(model_type, version = %target.version, "rollback target is already active");
            return Ok(false);
        }

        let plan = RollbackPlan {
            current_version: current.map(|c| c.version).unwrap_or_default(),
            target_version: target.version.clone(),
            reason: reason.to_string(),
            strategy: DeploymentStrategy::Immediate,
            validation_checks: ROLLBACK_CHECKS.iter().map(|c| c.to_string()).collect(),
        };
        tracing::info!(
            model_type,
            from = %plan.current_version,
            to = %plan.target_version,
            reason = %plan.reason,
            checks = ?plan.validation_checks,
            "rolling back"
        );

        self.validate(ROLLBACK_CHECKS, &target)?;
        self.activate_locked(&target, DeploymentEventKind::RolledBack)?;
        Ok(true)
    }

    /// End the running A/B test of `model_type` with `winning_version` taking
    /// the active slot. The losing version goes back to inactive.
    pub async fn promote_ab_winner(&self, model_type: &str, winning_version: &str) -> Result<bool> {
        let lock = self.slot_lock(model_type);
        let _slot = lock.lock().await;

        let test = self
            .metadata
            .active_ab_test(model_type)?
            .ok_or_else(|| LifecycleError::not_found(format!("active A/B test for {model_type}")))?;
        let loser = if test.version_a == winning_version {
            &test.version_b
        } else if test.version_b == winning_version {
            &test.version_a
        } else {
            return Err(LifecycleError::validation(format!(
                "{winning_version} is not part of A/B test {}",
                test.test_id
            )));
        };

        let winner = self.require_named(model_type, winning_version)?;
        self.validate(DEPLOY_CHECKS, &winner)?;

        let loser_id = self
            .metadata
            .find_version(model_type, loser)?
            .map(|l| l.model_id);

        // The test stays running until the winner holds the active slot.
        let was_active = winner.is_active();
        if !was_active {
            self.activate_locked(&winner, DeploymentEventKind::Promoted)?;
        }
        self.metadata
            .conclude_ab_tests(model_type, loser_id.as_deref())?;
        self.ab_cache.invalidate(&model_type.to_string());
        if was_active {
            self.publish(DeploymentEvent {
                model_type: model_type.to_string(),
                version: winner.version.clone(),
                kind: DeploymentEventKind::Promoted,
            });
        }
        tracing::info!(model_type, test_id = %test.test_id, winner = %winning_version, "A/B test concluded");
        Ok(true)
    }

    /// Most recently deployed version strictly older than `current`'s deploy
    /// time, or the most recently deployed one at all when nothing is active.
    fn previous_deployment(
        &self,
        model_type: &str,
        current: Option<&ModelVersion>,
    ) -> Result<ModelVersion> {
        let cutoff = current.and_then(|c| c.deployed_at_ms).unwrap_or(i64::MAX);
        self.metadata
            .list_versions(Some(model_type), None)?
            .into_iter()
            .filter(|v| v.status != ModelStatus::Failed)
            .filter(|v| current.map_or(true, |c| c.model_id != v.model_id))
            .filter_map(|v| v.deployed_at_ms.filter(|d| *d < cutoff).map(|d| (d, v)))
            .max_by_key(|(d, _)| *d)
            .map(|(_, v)| v)
            .ok_or_else(|| {
                LifecycleError::not_found(format!("no earlier deployment of {model_type} to roll back to"))
            })
    }

    /// Deploy timestamp for a new activation, strictly after every earlier
    /// deployment of the type.
    fn next_deploy_time(&self, model_type: &str) -> Result<i64> {
        let now = self.clock.now_ms();
        let latest = self
            .metadata
            .list_versions(Some(model_type), None)?
            .iter()
            .filter_map(|v| v.deployed_at_ms)
            .max();
        Ok(match latest {
            Some(last) if last >= now => last + 1,
            _ => now,
        })
    }

    /// Copy `version` into the serving location and make it the only active
    /// version of its type. Serving files are restored if the metadata swap
    /// fails. Caller holds the slot lock.
    fn activate_locked(&self, version: &ModelVersion, kind: DeploymentEventKind) -> Result<()> {
        let model_type = &version.model_type;
        let now = self.clock.now_ms();
        let deployed_at = self.next_deploy_time(model_type)?;

        let snapshot = self.artifacts.serving_snapshot(model_type)?;
        let bundle = self.artifacts.load_bundle(&version.artifact_refs)?;
        if let Err(e) = self.artifacts.promote_to_serving(model_type, &bundle) {
            self.restore_serving(model_type, &snapshot);
            return Err(e.into());
        }
        let demoted = match self
            .metadata
            .activate(model_type, &version.model_id, deployed_at, now)
        {
            Ok(d) => d,
            Err(e) => {
                self.restore_serving(model_type, &snapshot);
                return Err(e.into());
            }
        };

        self.ab_cache.invalidate(model_type);
        tracing::info!(
            model_type = %model_type,
            version = %version.version,
            model_id = %version.model_id,
            demoted = ?demoted,
            event = ?kind,
            "active version changed"
        );
        self.publish(DeploymentEvent {
            model_type: model_type.clone(),
            version: version.version.clone(),
            kind,
        });
        Ok(())
    }

    fn restore_serving(&self, model_type: &str, snapshot: &model_storage::ArtifactBundle) {
        if let Err(e) = self.artifacts.restore_serving(model_type, snapshot) {
            tracing::error!(model_type, error = %e, "could not restore serving artifacts");
        }
    }

    fn start_ab_test_locked(
        &self,
        candidate: &ModelVersion,
        ab_config: Option<ABTestConfig>,
    ) -> Result<bool> {
        let Some(cfg) = ab_config else {
            tracing::warn!(model_id = %candidate.model_id, "A/B deploy without a test config");
            return Ok(false);
        };
        if let Err(e) = cfg.check_shape() {
            tracing::warn!(test_id = %cfg.test_id, error = %e, "A/B test config rejected");
            return Ok(false);
        }
        if cfg.model_type != candidate.model_type
            || (cfg.version_a != candidate.version && cfg.version_b != candidate.version)
        {
            tracing::warn!(
                test_id = %cfg.test_id,
                version = %candidate.version,
                "A/B test config does not cover the candidate"
            );
            return Ok(false);
        }
        let other = if cfg.version_a == candidate.version {
            &cfg.version_b
        } else {
            &cfg.version_a
        };
        if self.metadata.find_version(&cfg.model_type, other)?.is_none() {
            tracing::warn!(test_id = %cfg.test_id, other = %other, "A/B test arm is not registered");
            return Ok(false);
        }

        let testing = (!candidate.is_active()).then_some(candidate.model_id.as_str());
        self.metadata.insert_ab_test(&cfg, testing)?;
        self.ab_cache.invalidate(&cfg.model_type);
        tracing::info!(
            model_type = %cfg.model_type,
            test_id = %cfg.test_id,
            version_a = %cfg.version_a,
            version_b = %cfg.version_b,
            split = cfg.traffic_split,
            "A/B test started"
        );
        self.publish(DeploymentEvent {
            model_type: cfg.model_type.clone(),
            version: candidate.version.clone(),
            kind: DeploymentEventKind::AbTestStarted,
        });
        Ok(true)
    }
}
