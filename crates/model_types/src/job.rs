//! Training job record and trigger vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::OpaqueConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Scheduled,
    PerformanceDrop,
    FeedbackThreshold,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::PerformanceDrop => "performance_drop",
            Self::FeedbackThreshold => "feedback_threshold",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "performance_drop" => Some(Self::PerformanceDrop),
            "feedback_threshold" => Some(Self::FeedbackThreshold),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Higher wins when several triggers fire for one model type.
    pub fn urgency(&self) -> u8 {
        match self {
            Self::Manual => 3,
            Self::PerformanceDrop => 2,
            Self::FeedbackThreshold => 1,
            Self::Scheduled => 0,
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub job_id: String,
    pub model_type: String,
    pub trigger_type: TriggerType,
    pub status: JobStatus,
    pub previous_model_version: Option<String>,
    pub new_model_version: String,
    /// Registry id of the produced version, set on completion.
    pub new_model_id: Option<String>,
    pub training_config: OpaqueConfig,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub performance_improvement: Option<f64>,
    pub error_message: Option<String>,
}
