//! Single predictions with graceful degradation.
//!
//! Order of attempts: the optimized variant of the routed version (when asked
//! for and present), the registered artifact, then a feature-mean heuristic.
//! `predict` always yields a result; fallbacks are flagged on it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use model_features::FeatureStore;
use model_types::{FeatureKind, FeatureVector, LifecycleError, ModelVersion};

use crate::batch::BatchHandler;
use crate::metrics::{PerformanceSnapshot, ServingMetrics};
use crate::optimizer::InferenceOptimizer;
use crate::{PredictionRequest, PredictionResult, ServingConfig, HEURISTIC_VERSION};

pub struct InferenceService {
    optimizer: Arc<InferenceOptimizer>,
    features: Arc<FeatureStore>,
    metrics: ServingMetrics,
    config: ServingConfig,
}

struct Answer {
    value: f64,
    confidence: f64,
    version: String,
    optimized: bool,
}

impl InferenceService {
    pub fn new(
        optimizer: Arc<InferenceOptimizer>,
        features: Arc<FeatureStore>,
        config: ServingConfig,
    ) -> Self {
        Self {
            optimizer,
            features,
            metrics: ServingMetrics::new(),
            config,
        }
    }

    pub fn optimizer(&self) -> &Arc<InferenceOptimizer> {
        &self.optimizer
    }

    pub async fn predict(&self, req: &PredictionRequest, use_optimized: bool) -> PredictionResult {
        let started = Instant::now();
        let features = self.request_features(req).await;

        let answer = match self.model_answer(req, &features, use_optimized).await {
            Some(a) => a,
            None => Answer {
                value: heuristic_value(&features),
                confidence: self.config.fallback_confidence,
                version: HEURISTIC_VERSION.to_string(),
                optimized: false,
            },
        };
        let fallback_used = answer.version == HEURISTIC_VERSION;
        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record(
            &req.prediction_type,
            processing_time_ms,
            fallback_used,
            answer.optimized,
        );

        PredictionResult {
            request_id: req.request_id.clone(),
            prediction_type: req.prediction_type.clone(),
            value: answer.value,
            confidence: answer.confidence,
            model_version: answer.version,
            processing_time_ms,
            fallback_used,
            optimized: answer.optimized,
        }
    }

    /// Like [`predict`](Self::predict) but rejects prediction types the
    /// catalog does not know.
    pub async fn try_predict(
        &self,
        req: &PredictionRequest,
        use_optimized: bool,
    ) -> Result<PredictionResult, LifecycleError> {
        if !self.optimizer.registry().catalog().contains(&req.prediction_type) {
            return Err(LifecycleError::validation(format!(
                "unknown prediction type '{}'",
                req.prediction_type
            )));
        }
        Ok(self.predict(req, use_optimized).await)
    }

    pub fn get_performance_metrics(&self, prediction_type: Option<&str>) -> PerformanceSnapshot {
        let hit_ratio = self.optimizer.cache().stats().hit_ratio();
        self.metrics.snapshot(prediction_type, hit_ratio)
    }

    pub fn metrics(&self) -> &ServingMetrics {
        &self.metrics
    }

    async fn request_features(&self, req: &PredictionRequest) -> FeatureVector {
        if let Some(fv) = &req.features {
            return fv.clone();
        }
        let budget = Duration::from_millis(self.config.feature_timeout_ms);
        let lookup = self.features.features(&req.entity_id, &req.entity_type);
        match tokio::time::timeout(budget, lookup).await {
            Ok(Ok(fv)) => fv.as_ref().clone(),
            Ok(Err(e)) => {
                tracing::warn!(
                    entity_id = %req.entity_id,
                    error = %e,
                    "feature extraction failed, predicting on an empty vector"
                );
                FeatureVector::new(&req.entity_id, &req.entity_type, Vec::new(), 0)
            }
            Err(_) => {
                tracing::warn!(
                    entity_id = %req.entity_id,
                    timeout_ms = self.config.feature_timeout_ms,
                    "feature extraction timed out, predicting on an empty vector"
                );
                FeatureVector::new(&req.entity_id, &req.entity_type, Vec::new(), 0)
            }
        }
    }

    async fn model_answer(
        &self,
        req: &PredictionRequest,
        features: &FeatureVector,
        use_optimized: bool,
    ) -> Option<Answer> {
        let mv = match self.optimizer.registry().serving_model(&req.prediction_type, true) {
            Ok(mv) => mv,
            Err(e) => {
                tracing::debug!(prediction_type = %req.prediction_type, error = %e, "no serving model");
                return None;
            }
        };

        if use_optimized {
            if let Some(level) = self.optimizer.optimized_level(&mv) {
                match self.run_model(&mv, Some(level), features).await {
                    Ok(a) => return Some(a),
                    Err(e) => tracing::warn!(
                        prediction_type = %req.prediction_type,
                        version = %mv.version,
                        level = %level,
                        error = %e,
                        "optimized model failed, using registered artifact"
                    ),
                }
            }
        }

        match self.run_model(&mv, None, features).await {
            Ok(a) => Some(a),
            Err(e) => {
                tracing::warn!(
                    prediction_type = %req.prediction_type,
                    version = %mv.version,
                    error = %e,
                    "model prediction failed, using heuristic"
                );
                None
            }
        }
    }

    async fn run_model(
        &self,
        mv: &ModelVersion,
        level: Option<model_types::OptimizationLevel>,
        features: &FeatureVector,
    ) -> crate::Result<Answer> {
        let loaded = self.optimizer.load_model(mv, level).await?;
        let raw = features.dense(&loaded.scaler.feature_names);
        let p = loaded.predict_row(&raw)?;
        Ok(Answer {
            value: p.value,
            confidence: p.confidence,
            version: mv.version.clone(),
            optimized: level.is_some(),
        })
    }
}

/// Mean of the numerical features clamped to `[0, 1]`, or 0.5 without any.
fn heuristic_value(features: &FeatureVector) -> f64 {
    let nums: Vec<f64> = features
        .features
        .iter()
        .filter(|f| f.kind == FeatureKind::Numerical)
        .map(|f| f.value.as_f64())
        .collect();
    if nums.is_empty() {
        return 0.5;
    }
    (nums.iter().sum::<f64>() / nums.len() as f64).clamp(0.0, 1.0)
}

#[async_trait]
impl BatchHandler for InferenceService {
    async fn warm(&self, prediction_type: &str) {
        let registry = self.optimizer.registry();
        let Ok(mv) = registry.serving_model(prediction_type, false) else {
            return;
        };
        let level = self.optimizer.optimized_level(&mv);
        if let Err(e) = self.optimizer.load_model(&mv, level).await {
            tracing::debug!(prediction_type, error = %e, "batch warm-up skipped");
        }
    }

    async fn handle(&self, req: PredictionRequest) -> anyhow::Result<PredictionResult> {
        Ok(self.try_predict(&req, true).await?)
    }

    fn on_failure(&self, prediction_type: &str, _error: &str) {
        self.metrics.record_error(prediction_type);
    }
}
