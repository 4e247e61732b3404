//! Dataset preparation and the CPU-bound fit/evaluate step.

use std::collections::{BTreeMap, BTreeSet};

use model_algos::{metrics, new_model, train_test_split, ArtifactFormat, Preprocessor};
use model_features::FeatureStore;
use model_storage::{ArtifactBundle, MetadataStore};
use model_types::{
    AlgorithmKind, ArtifactKind, LifecycleError, ModelTypeSpec, OpaqueConfig, Result, TaskKind,
};

pub(crate) struct Prepared {
    pub feature_names: Vec<String>,
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
    /// Every feedback row read for this run, including ones whose entity
    /// could not be extracted.
    pub feedback_ids: Vec<String>,
}

impl Prepared {
    pub fn samples(&self) -> usize {
        self.y.len()
    }
}

/// Join unprocessed feedback of the model type's categories to entity
/// features. Entities whose extraction fails are skipped.
pub(crate) async fn prepare(
    metadata: &MetadataStore,
    features: &FeatureStore,
    spec: &ModelTypeSpec,
) -> Result<Prepared> {
    let feedback = metadata.unprocessed_feedback(&spec.feedback_categories)?;
    let mut vectors = Vec::with_capacity(feedback.len());
    let mut labels = Vec::with_capacity(feedback.len());
    let mut skipped = 0usize;

    for fb in &feedback {
        match features.features(&fb.entity_id, &fb.entity_type).await {
            Ok(v) => {
                vectors.push(v);
                labels.push(fb.label);
            }
            Err(e) => {
                skipped += 1;
                tracing::debug!(entity_id = %fb.entity_id, error = %e, "feature extraction failed");
            }
        }
    }
    if skipped > 0 {
        tracing::warn!(model_type = %spec.name, skipped, "feedback rows without features");
    }

    let names: BTreeSet<String> = vectors.iter().flat_map(|v| v.feature_names()).collect();
    let feature_names: Vec<String> = names.into_iter().collect();
    let x = vectors.iter().map(|v| v.dense(&feature_names)).collect();

    Ok(Prepared {
        feature_names,
        x,
        y: labels,
        feedback_ids: feedback.into_iter().map(|fb| fb.feedback_id).collect(),
    })
}

pub(crate) struct FitInput {
    pub task: TaskKind,
    pub algorithm: AlgorithmKind,
    pub hyper: OpaqueConfig,
    pub feature_names: Vec<String>,
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
    pub train_fraction: f64,
    pub seed: u64,
}

pub(crate) struct Trained {
    pub bundle: ArtifactBundle,
    pub metrics: BTreeMap<String, f64>,
}

/// Split, scale, fit and score on the held-out part. Runs on a pool thread.
pub(crate) fn fit_and_evaluate(input: FitInput) -> Result<Trained> {
    let classify = input.task == TaskKind::Classification;
    let y = if classify {
        input.y.iter().map(|v| if *v >= 0.5 { 1.0 } else { 0.0 }).collect()
    } else {
        input.y
    };

    let (train, test) = train_test_split(input.x, y, input.train_fraction, classify, input.seed);
    if train.is_empty() || test.is_empty() {
        return Err(LifecycleError::validation(format!(
            "split left {} training and {} test rows",
            train.len(),
            test.len()
        )));
    }

    let scaler = Preprocessor::fit(input.feature_names, &train.x)?;
    let train_x = scaler.transform(&train.x)?;
    let test_x = scaler.transform(&test.x)?;

    let mut model = new_model(input.algorithm, &input.hyper)?;
    model.fit(&train_x, &train.y)?;
    let predicted: Vec<f64> = model
        .predict_batch(&test_x)?
        .into_iter()
        .map(|p| p.value)
        .collect();
    let metrics = metrics::evaluate(input.task, &test.y, &predicted);

    let mut bundle = ArtifactBundle::new();
    bundle.insert(ArtifactKind::Model, model.serialize(ArtifactFormat::Json)?);
    bundle.insert(ArtifactKind::Preprocessor, scaler.to_bytes()?);
    Ok(Trained { bundle, metrics })
}
