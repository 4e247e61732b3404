//! Error taxonomy shared by the registry, trainer and serving crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("insufficient training data for {model_type}: {found} samples, need {required}")]
    InsufficientData {
        model_type: String,
        found: usize,
        required: usize,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("integrity check failed for {model_id}: expected {expected}, got {actual}")]
    Integrity {
        model_id: String,
        expected: String,
        actual: String,
    },
    #[error("storage error: {0}")]
    TransientStorage(String),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

impl LifecycleError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Self::TransientStorage(msg.to_string())
    }

    /// True for the caller-input failures that are never retried.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InsufficientData { .. })
    }
}
