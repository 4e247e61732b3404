//! Evaluation metrics. Names match the `performance_metrics` keys stored on
//! a model version.

use std::collections::BTreeMap;

use model_types::TaskKind;

pub const ACCURACY: &str = "accuracy";
pub const PRECISION: &str = "precision";
pub const RECALL: &str = "recall";
pub const F1_SCORE: &str = "f1_score";
pub const RMSE: &str = "rmse";
pub const MAE: &str = "mae";
pub const R2_SCORE: &str = "r2_score";

/// Binary classification metrics at a 0.5 cut. Empty input yields zeros.
pub fn classification(truth: &[f64], predicted: &[f64]) -> BTreeMap<String, f64> {
    let (mut tp, mut fp, mut tn, mut fneg) = (0.0, 0.0, 0.0, 0.0);
    for (t, p) in truth.iter().zip(predicted) {
        match (*t >= 0.5, *p >= 0.5) {
            (true, true) => tp += 1.0,
            (false, true) => fp += 1.0,
            (false, false) => tn += 1.0,
            (true, false) => fneg += 1.0,
        }
    }
    let total: f64 = tp + fp + tn + fneg;
    let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { 0.0 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fneg);
    let f1 = ratio(2.0 * precision * recall, precision + recall);

    BTreeMap::from([
        (ACCURACY.to_string(), ratio(tp + tn, total)),
        (PRECISION.to_string(), precision),
        (RECALL.to_string(), recall),
        (F1_SCORE.to_string(), f1),
    ])
}

pub fn regression(truth: &[f64], predicted: &[f64]) -> BTreeMap<String, f64> {
    let n = truth.len().min(predicted.len());
    if n == 0 {
        return BTreeMap::from([
            (RMSE.to_string(), 0.0),
            (MAE.to_string(), 0.0),
            (R2_SCORE.to_string(), 0.0),
        ]);
    }
    let nf = n as f64;
    let mean = truth[..n].iter().sum::<f64>() / nf;
    let (mut sse, mut sae, mut sst) = (0.0, 0.0, 0.0);
    for (t, p) in truth.iter().zip(predicted) {
        sse += (t - p).powi(2);
        sae += (t - p).abs();
        sst += (t - mean).powi(2);
    }
    let r2 = if sst > 0.0 { 1.0 - sse / sst } else { 0.0 };
    BTreeMap::from([
        (RMSE.to_string(), (sse / nf).sqrt()),
        (MAE.to_string(), sae / nf),
        (R2_SCORE.to_string(), r2),
    ])
}

pub fn evaluate(task: TaskKind, truth: &[f64], predicted: &[f64]) -> BTreeMap<String, f64> {
    match task {
        TaskKind::Classification => classification(truth, predicted),
        TaskKind::Regression => regression(truth, predicted),
    }
}
