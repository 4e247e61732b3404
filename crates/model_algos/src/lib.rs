//! Estimators behind a common `Trainable` surface, plus the scaler, metrics,
//! data split and compression helpers the trainer and optimizer share.
//!
//! Families:
//! - logistic regression (binary classification)
//! - ridge linear regression
//! - boosted decision stumps (binary classification, prunable ensemble)

pub mod codec;
pub mod linear;
pub mod logistic;
pub mod metrics;
pub mod preprocess;
pub mod split;
pub mod stumps;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use model_types::{AlgorithmKind, LifecycleError, OpaqueConfig, OptimizationLevel};

pub use codec::{deserialize, ArtifactFormat, ModelParams};
pub use preprocess::Preprocessor;
pub use split::{train_test_split, Dataset};

#[derive(Debug, Error)]
pub enum AlgoError {
    #[error("invalid training data: {0}")]
    InvalidData(String),
    #[error("feature dimension mismatch: model expects {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("model is not fitted")]
    NotFitted,
    #[error("artifact encode error: {0}")]
    Encode(String),
    #[error("artifact decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Config(#[from] LifecycleError),
}

pub type Result<T> = std::result::Result<T, AlgoError>;

impl From<AlgoError> for LifecycleError {
    fn from(err: AlgoError) -> Self {
        match err {
            AlgoError::Config(inner) => inner,
            AlgoError::Decode(msg) => LifecycleError::TransientStorage(format!("artifact decode: {msg}")),
            other => LifecycleError::Validation(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub value: f64,
    /// In `[0, 1]`.
    pub confidence: f64,
}

/// Compression techniques, each independently toggleable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionOptions {
    /// Round coefficients and thresholds to this many decimals.
    pub round_decimals: Option<u32>,
    /// Drop this fraction of the weakest ensemble members.
    pub prune_fraction: Option<f64>,
    pub format: ArtifactFormat,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            round_decimals: None,
            prune_fraction: None,
            format: ArtifactFormat::Json,
        }
    }
}

impl CompressionOptions {
    pub fn for_level(level: OptimizationLevel) -> Self {
        match level {
            OptimizationLevel::None => Self::default(),
            OptimizationLevel::Basic => Self {
                round_decimals: Some(4),
                ..Self::default()
            },
            OptimizationLevel::Aggressive => Self {
                round_decimals: Some(3),
                prune_fraction: Some(0.25),
                ..Self::default()
            },
            OptimizationLevel::Ultra => Self {
                round_decimals: Some(2),
                prune_fraction: Some(0.5),
                format: ArtifactFormat::Binary,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionReport {
    pub values_rounded: usize,
    pub members_pruned: usize,
}

pub trait Trainable: Send + Sync {
    fn family(&self) -> AlgorithmKind;

    /// Fit on standardized rows. `y` is 0/1 for classifiers.
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()>;

    fn predict(&self, row: &[f64]) -> Result<Prediction>;

    fn predict_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<Prediction>> {
        rows.iter().map(|r| self.predict(r)).collect()
    }

    /// Snapshot of the fitted parameters, used by the codec.
    fn params(&self) -> ModelParams;

    fn compress(&mut self, opts: &CompressionOptions) -> CompressionReport;

    fn serialize(&self, format: ArtifactFormat) -> Result<Vec<u8>> {
        codec::encode(&self.params(), format)
    }
}

pub(crate) fn round_to(v: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (v * scale).round() / scale
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

pub(crate) fn check_training_shape(x: &[Vec<f64>], y: &[f64]) -> Result<usize> {
    if x.is_empty() {
        return Err(AlgoError::InvalidData("no rows".into()));
    }
    if x.len() != y.len() {
        return Err(AlgoError::InvalidData(format!(
            "{} rows but {} labels",
            x.len(),
            y.len()
        )));
    }
    let dim = x[0].len();
    if let Some(bad) = x.iter().find(|r| r.len() != dim) {
        return Err(AlgoError::Dimension {
            expected: dim,
            actual: bad.len(),
        });
    }
    if x.iter().flatten().chain(y).any(|v| !v.is_finite()) {
        return Err(AlgoError::InvalidData("non-finite value".into()));
    }
    Ok(dim)
}

/// Model-type algorithm to estimator constructor. Hyperparameters are
/// validated against the family's recognized keys.
pub fn new_model(kind: AlgorithmKind, hyper: &OpaqueConfig) -> Result<Box<dyn Trainable>> {
    let model: Box<dyn Trainable> = match kind {
        AlgorithmKind::Logistic => Box::new(logistic::LogisticRegression::from_config(hyper)?),
        AlgorithmKind::Linear => Box::new(linear::LinearRegression::from_config(hyper)?),
        AlgorithmKind::BoostedStumps => Box::new(stumps::StumpEnsemble::from_config(hyper)?),
    };
    Ok(model)
}
