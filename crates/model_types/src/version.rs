//! ModelVersion and its status / artifact vocabulary.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::OpaqueConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Active,
    Inactive,
    Testing,
    Deprecated,
    Failed,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Testing => "testing",
            Self::Deprecated => "deprecated",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "testing" => Some(Self::Testing),
            "deprecated" => Some(Self::Deprecated),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of file that make up a model bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The fitted estimator.
    Model,
    /// Companion pre-processing state (fitted scaler + feature names).
    Preprocessor,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Preprocessor => "preprocessor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "model" => Some(Self::Model),
            "preprocessor" => Some(Self::Preprocessor),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub model_id: String,
    pub model_type: String,
    pub version: String,
    pub status: ModelStatus,
    pub created_at_ms: i64,
    pub deployed_at_ms: Option<i64>,
    pub deprecated_at_ms: Option<i64>,
    pub performance_metrics: BTreeMap<String, f64>,
    pub training_config: OpaqueConfig,
    /// Artifact kind -> blob key in the artifact store.
    pub artifact_refs: BTreeMap<ArtifactKind, String>,
    /// SHA-256 over every artifact file, see `model_storage::bundle_checksum`.
    pub checksum: String,
    pub tags: BTreeSet<String>,
}

impl ModelVersion {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.performance_metrics.get(name).copied()
    }

    pub fn is_active(&self) -> bool {
        self.status == ModelStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            ModelStatus::Active,
            ModelStatus::Inactive,
            ModelStatus::Testing,
            ModelStatus::Deprecated,
            ModelStatus::Failed,
        ] {
            assert_eq!(ModelStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ModelStatus::parse("retired"), None);
    }

    #[test]
    fn artifact_refs_serialize_with_string_keys() {
        let mut refs = BTreeMap::new();
        refs.insert(ArtifactKind::Model, "models/a/model.bin".to_string());
        let json = serde_json::to_string(&refs).unwrap();
        assert_eq!(json, r#"{"model":"models/a/model.bin"}"#);
        let back: BTreeMap<ArtifactKind, String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, refs);
    }
}
