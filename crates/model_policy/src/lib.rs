//! Deployment, rollback and training gates.
//!
//! Default policy:
//! - Every artifact kind the model type requires must be referenced and present
//! - The recomputed bundle checksum must equal the stored one
//! - Deploy needs the primary metric at or above the model type's floor
//! - Rollback re-checks artifacts and checksum only
//! - Training is allowed for every catalog type unless narrowed by config

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use model_types::{ArtifactKind, ModelCatalog, ModelVersion};

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Global deploy floor; when set it replaces the per-type `min_deploy_metric`.
    #[serde(default)]
    pub min_deploy_metric: Option<f64>,
    /// Whether this process may run training jobs at all.
    #[serde(default = "default_true")]
    pub allow_train: bool,
    /// Model types allowed to train; empty means every catalog type.
    #[serde(default)]
    pub trainable_model_types: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_deploy_metric: None,
            allow_train: true,
            trainable_model_types: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(String),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCheck {
    ArtifactsExist,
    ChecksumMatches,
    MinimumPerformance,
}

impl ValidationCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArtifactsExist => "artifacts_exist",
            Self::ChecksumMatches => "checksum_matches",
            Self::MinimumPerformance => "minimum_performance",
        }
    }
}

impl fmt::Display for ValidationCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEPLOY_CHECKS: &[ValidationCheck] = &[
    ValidationCheck::ArtifactsExist,
    ValidationCheck::ChecksumMatches,
    ValidationCheck::MinimumPerformance,
];

pub const ROLLBACK_CHECKS: &[ValidationCheck] = &[
    ValidationCheck::ArtifactsExist,
    ValidationCheck::ChecksumMatches,
];

/// What the registry observed about a version before asking for a decision.
#[derive(Debug, Clone)]
pub struct VersionEvidence<'a> {
    pub version: &'a ModelVersion,
    /// Referenced kinds whose blob is absent.
    pub missing_artifacts: Vec<ArtifactKind>,
    /// `None` when the artifacts could not be read back.
    pub recomputed_checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckFailure {
    pub check: ValidationCheck,
    pub reason: String,
}

pub struct PolicyEngine {
    config: PolicyConfig,
    catalog: Arc<ModelCatalog>,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig, catalog: Arc<ModelCatalog>) -> Self {
        Self { config, catalog }
    }

    pub fn with_defaults(catalog: Arc<ModelCatalog>) -> Self {
        Self::new(PolicyConfig::default(), catalog)
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    /// Run `checks` in order and report the first that fails.
    pub fn evaluate(
        &self,
        checks: &[ValidationCheck],
        evidence: &VersionEvidence<'_>,
    ) -> Result<(), CheckFailure> {
        for check in checks {
            if let PolicyDecision::Deny(reason) = self.evaluate_one(*check, evidence) {
                tracing::debug!(
                    model_id = %evidence.version.model_id,
                    check = %check,
                    reason = %reason,
                    "validation check failed"
                );
                return Err(CheckFailure {
                    check: *check,
                    reason,
                });
            }
        }
        Ok(())
    }

    pub fn evaluate_one(
        &self,
        check: ValidationCheck,
        evidence: &VersionEvidence<'_>,
    ) -> PolicyDecision {
        let v = evidence.version;
        match check {
            ValidationCheck::ArtifactsExist => {
                if let Ok(spec) = self.catalog.get(&v.model_type) {
                    if let Some(kind) = spec
                        .required_artifacts
                        .iter()
                        .find(|k| !v.artifact_refs.contains_key(*k))
                    {
                        return PolicyDecision::Deny(format!("no {kind} artifact registered"));
                    }
                }
                if !evidence.missing_artifacts.is_empty() {
                    let kinds: Vec<&str> =
                        evidence.missing_artifacts.iter().map(|k| k.as_str()).collect();
                    return PolicyDecision::Deny(format!(
                        "artifacts missing from store: {}",
                        kinds.join(", ")
                    ));
                }
                PolicyDecision::Allow
            }
            ValidationCheck::ChecksumMatches => match &evidence.recomputed_checksum {
                None => PolicyDecision::Deny("artifacts could not be read back".into()),
                Some(actual) if *actual != v.checksum => PolicyDecision::Deny(format!(
                    "checksum mismatch: stored {}, recomputed {actual}",
                    v.checksum
                )),
                Some(_) => PolicyDecision::Allow,
            },
            ValidationCheck::MinimumPerformance => {
                let spec = match self.catalog.get(&v.model_type) {
                    Ok(spec) => spec,
                    Err(e) => return PolicyDecision::Deny(e.to_string()),
                };
                let floor = self.config.min_deploy_metric.unwrap_or(spec.min_deploy_metric);
                match v.metric(&spec.primary_metric) {
                    None => PolicyDecision::Deny(format!(
                        "primary metric {} not recorded",
                        spec.primary_metric
                    )),
                    Some(value) if value.is_nan() || value < floor => PolicyDecision::Deny(format!(
                        "{} {value:.3} below minimum {floor:.3}",
                        spec.primary_metric
                    )),
                    Some(_) => PolicyDecision::Allow,
                }
            }
        }
    }

    /// Can a training job be started for this model type?
    pub fn can_train(&self, model_type: &str) -> PolicyDecision {
        if !self.config.allow_train {
            return PolicyDecision::Deny("training is disabled for this process".into());
        }

        if !self.catalog.contains(model_type) {
            return PolicyDecision::Deny(format!("unknown model type '{model_type}'"));
        }

        if !self.config.trainable_model_types.is_empty()
            && !self
                .config
                .trainable_model_types
                .iter()
                .any(|t| t == model_type)
        {
            return PolicyDecision::Deny(format!("model type '{model_type}' is not trainable here"));
        }

        PolicyDecision::Allow
    }
}
