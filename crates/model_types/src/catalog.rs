//! Per-model-type settings: task, algorithm, thresholds and feedback ownership.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::OpaqueConfig;
use crate::error::{LifecycleError, Result};
use crate::version::ArtifactKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Classification,
    Regression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    Logistic,
    Linear,
    BoostedStumps,
}

impl AlgorithmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logistic => "logistic",
            Self::Linear => "linear",
            Self::BoostedStumps => "boosted_stumps",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTypeSpec {
    pub name: String,
    pub task: TaskKind,
    pub algorithm: AlgorithmKind,
    /// Metric compared against `performance_threshold` and `min_deploy_metric`.
    pub primary_metric: String,
    /// Retraining fires when the latest primary metric drops below this.
    pub performance_threshold: f64,
    pub min_training_samples: usize,
    /// Deploy validation floor for the primary metric.
    pub min_deploy_metric: f64,
    pub feedback_categories: Vec<String>,
    pub required_artifacts: Vec<ArtifactKind>,
    #[serde(default)]
    pub hyperparameters: OpaqueConfig,
}

impl ModelTypeSpec {
    fn classifier(name: &str, algorithm: AlgorithmKind, threshold: f64, min_samples: usize) -> Self {
        Self {
            name: name.into(),
            task: TaskKind::Classification,
            algorithm,
            primary_metric: "f1_score".into(),
            performance_threshold: threshold,
            min_training_samples: min_samples,
            min_deploy_metric: 0.70,
            feedback_categories: Vec::new(),
            required_artifacts: vec![ArtifactKind::Model, ArtifactKind::Preprocessor],
            hyperparameters: OpaqueConfig::new(),
        }
    }

    fn with_categories(mut self, categories: &[&str]) -> Self {
        self.feedback_categories = categories.iter().map(|c| c.to_string()).collect();
        self
    }

    fn with_hyperparameters(mut self, hyper: OpaqueConfig) -> Self {
        self.hyperparameters = hyper;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    specs: BTreeMap<String, ModelTypeSpec>,
}

impl ModelCatalog {
    pub fn new(specs: impl IntoIterator<Item = ModelTypeSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    /// The four scorers used for competitive-intelligence artifacts.
    pub fn with_defaults() -> Self {
        let impact = ModelTypeSpec::classifier("impact_classifier", AlgorithmKind::Logistic, 0.85, 100)
            .with_categories(&["impact_assessment"])
            .with_hyperparameters(
                OpaqueConfig::new()
                    .with("learning_rate", 0.1)
                    .with("epochs", 300i64)
                    .with("l2", 0.001),
            );
        let risk = ModelTypeSpec::classifier("risk_scorer", AlgorithmKind::BoostedStumps, 0.80, 150)
            .with_categories(&["risk_assessment"])
            .with_hyperparameters(OpaqueConfig::new().with("n_estimators", 40i64));
        let relevance =
            ModelTypeSpec::classifier("relevance_scorer", AlgorithmKind::Logistic, 0.80, 100)
                .with_categories(&["relevance", "content_quality"]);
        let trend = ModelTypeSpec {
            name: "trend_predictor".into(),
            task: TaskKind::Regression,
            algorithm: AlgorithmKind::Linear,
            primary_metric: "r2_score".into(),
            performance_threshold: 0.60,
            min_training_samples: 200,
            min_deploy_metric: 0.50,
            feedback_categories: vec!["trend_prediction".into()],
            required_artifacts: vec![ArtifactKind::Model, ArtifactKind::Preprocessor],
            hyperparameters: OpaqueConfig::new().with("epochs", 400i64),
        };
        Self::new([impact, risk, relevance, trend])
    }

    pub fn get(&self, model_type: &str) -> Result<&ModelTypeSpec> {
        self.specs
            .get(model_type)
            .ok_or_else(|| LifecycleError::validation(format!("unknown model type '{model_type}'")))
    }

    pub fn contains(&self, model_type: &str) -> bool {
        self.specs.contains_key(model_type)
    }

    pub fn insert(&mut self, spec: ModelTypeSpec) {
        self.specs.insert(spec.name.clone(), spec);
    }

    pub fn get_mut(&mut self, model_type: &str) -> Option<&mut ModelTypeSpec> {
        self.specs.get_mut(model_type)
    }

    pub fn specs(&self) -> impl Iterator<Item = &ModelTypeSpec> {
        self.specs.values()
    }

    pub fn model_types(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    /// Model type that claims a feedback category, if any.
    pub fn owner_of_category(&self, category: &str) -> Option<&ModelTypeSpec> {
        self.specs
            .values()
            .find(|s| s.feedback_categories.iter().any(|c| c == category))
    }
}
