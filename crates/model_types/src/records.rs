//! Human feedback and recorded metric rows.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub feedback_id: String,
    /// Feedback category; each model type claims one or more.
    pub category: String,
    pub entity_id: String,
    pub entity_type: String,
    /// Ground-truth label: 0/1 for classifiers, a real value for regressors.
    pub label: f64,
    pub processed: bool,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub model_type: String,
    pub model_version: String,
    pub metric_name: String,
    pub value: f64,
    pub recorded_at_ms: i64,
}
