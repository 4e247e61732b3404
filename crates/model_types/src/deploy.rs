//! Deployment strategies, A/B test configuration and rollback plans.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStrategy {
    Immediate,
    AbTest,
    /// Executed as `Immediate`; traffic shaping belongs to the load balancer.
    Gradual,
    /// Executed as `Immediate`; traffic shaping belongs to the load balancer.
    Canary,
}

impl DeploymentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::AbTest => "ab_test",
            Self::Gradual => "gradual",
            Self::Canary => "canary",
        }
    }
}

impl fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ABTestConfig {
    pub test_id: String,
    pub model_type: String,
    pub version_a: String,
    pub version_b: String,
    /// Probability of routing a request to `version_b`.
    pub traffic_split: f64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub success_metrics: Vec<String>,
    pub minimum_samples: u64,
}

impl ABTestConfig {
    pub fn is_running(&self, now_ms: i64) -> bool {
        self.start_ms <= now_ms && now_ms <= self.end_ms
    }

    /// Shape checks that do not need the registry.
    pub fn check_shape(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.traffic_split) {
            return Err(LifecycleError::validation(format!(
                "traffic_split {} outside [0, 1]",
                self.traffic_split
            )));
        }
        if self.end_ms < self.start_ms {
            return Err(LifecycleError::validation("A/B test ends before it starts"));
        }
        if self.version_a == self.version_b {
            return Err(LifecycleError::validation(
                "A/B test needs two distinct versions",
            ));
        }
        Ok(())
    }
}

/// Built for one rollback and dropped afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub current_version: String,
    pub target_version: String,
    pub reason: String,
    pub strategy: DeploymentStrategy,
    pub validation_checks: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentEventKind {
    Deployed,
    AbTestStarted,
    RolledBack,
    Promoted,
}

/// Published by the registry whenever the serving picture of a model type changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub model_type: String,
    pub version: String,
    pub kind: DeploymentEventKind,
}
