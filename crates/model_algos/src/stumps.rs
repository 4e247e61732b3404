//! AdaBoost over one-feature decision stumps.

use serde::{Deserialize, Serialize};

use model_types::{AlgorithmKind, KeySpec, OpaqueConfig, ValueType};

use crate::codec::ModelParams;
use crate::{
    check_training_shape, round_to, sigmoid, AlgoError, CompressionOptions, CompressionReport,
    Prediction, Result, Trainable,
};

pub const RECOGNIZED_KEYS: &[KeySpec] = &[
    KeySpec::new("n_estimators", ValueType::Integer),
    KeySpec::new("max_thresholds", ValueType::Integer),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f64,
    /// +1 predicts positive above the threshold, -1 below.
    pub polarity: i8,
    pub alpha: f64,
}

impl Stump {
    fn vote(&self, row: &[f64]) -> f64 {
        let above = row.get(self.feature).copied().unwrap_or(0.0) > self.threshold;
        let sign = if above { 1.0 } else { -1.0 };
        sign * self.polarity as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StumpParams {
    pub stumps: Vec<Stump>,
    pub n_features: usize,
    pub n_estimators: u64,
    pub max_thresholds: u64,
}

pub struct StumpEnsemble {
    p: StumpParams,
}

impl StumpEnsemble {
    pub fn from_config(hyper: &OpaqueConfig) -> Result<Self> {
        hyper.validate(RECOGNIZED_KEYS, "boosted_stumps")?;
        Ok(Self {
            p: StumpParams {
                stumps: vec![],
                n_features: 0,
                n_estimators: hyper.get_u64("n_estimators").unwrap_or(50).max(1),
                max_thresholds: hyper.get_u64("max_thresholds").unwrap_or(16).max(1),
            },
        })
    }

    pub fn from_params(p: StumpParams) -> Self {
        Self { p }
    }

    pub fn len(&self) -> usize {
        self.p.stumps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p.stumps.is_empty()
    }

    fn candidate_thresholds(&self, x: &[Vec<f64>], feature: usize) -> Vec<f64> {
        let mut values: Vec<f64> = x.iter().map(|r| r[feature]).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();
        if values.len() < 2 {
            return values;
        }
        let mids: Vec<f64> = values.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
        let max = self.p.max_thresholds as usize;
        if mids.len() <= max {
            return mids;
        }
        (0..max).map(|i| mids[i * mids.len() / max]).collect()
    }

    /// Best stump under sample weights `w`, with its weighted error.
    fn best_stump(&self, x: &[Vec<f64>], signs: &[f64], w: &[f64]) -> Option<(Stump, f64)> {
        let mut best: Option<(Stump, f64)> = None;
        for feature in 0..self.p.n_features {
            for threshold in self.candidate_thresholds(x, feature) {
                for polarity in [1i8, -1i8] {
                    let stump = Stump {
                        feature,
                        threshold,
                        polarity,
                        alpha: 0.0,
                    };
                    let err: f64 = x
                        .iter()
                        .zip(signs)
                        .zip(w)
                        .filter(|((row, s), _)| stump.vote(row) != **s)
                        .map(|(_, wi)| wi)
                        .sum();
                    if best.as_ref().map_or(true, |(_, e)| err < *e) {
                        best = Some((stump, err));
                    }
                }
            }
        }
        best
    }

    fn margin(&self, row: &[f64]) -> f64 {
        self.p.stumps.iter().map(|s| s.alpha * s.vote(row)).sum()
    }
}

impl Trainable for StumpEnsemble {
    fn family(&self) -> AlgorithmKind {
        AlgorithmKind::BoostedStumps
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        let dim = check_training_shape(x, y)?;
        self.p.n_features = dim;
        self.p.stumps.clear();

        let n = x.len();
        let signs: Vec<f64> = y.iter().map(|v| if *v >= 0.5 { 1.0 } else { -1.0 }).collect();
        let mut w = vec![1.0 / n as f64; n];

        for _ in 0..self.p.n_estimators {
            let Some((mut stump, err)) = self.best_stump(x, &signs, &w) else {
                break;
            };
            if err >= 0.5 {
                break;
            }
            let err = err.clamp(1e-10, 1.0 - 1e-10);
            stump.alpha = 0.5 * ((1.0 - err) / err).ln();

            let mut total = 0.0;
            for ((wi, row), s) in w.iter_mut().zip(x).zip(&signs) {
                *wi *= (-stump.alpha * s * stump.vote(row)).exp();
                total += *wi;
            }
            for wi in &mut w {
                *wi /= total;
            }

            let perfect = err <= 1e-10;
            self.p.stumps.push(stump);
            if perfect {
                break;
            }
        }

        if self.p.stumps.is_empty() {
            return Err(AlgoError::InvalidData(
                "no stump better than chance; labels may be constant".into(),
            ));
        }
        Ok(())
    }

    fn predict(&self, row: &[f64]) -> Result<Prediction> {
        if self.p.stumps.is_empty() {
            return Err(AlgoError::NotFitted);
        }
        if row.len() != self.p.n_features {
            return Err(AlgoError::Dimension {
                expected: self.p.n_features,
                actual: row.len(),
            });
        }
        let p = sigmoid(2.0 * self.margin(row));
        Ok(Prediction {
            value: p,
            confidence: p.max(1.0 - p),
        })
    }

    fn params(&self) -> ModelParams {
        ModelParams::BoostedStumps(self.p.clone())
    }

    fn compress(&mut self, opts: &CompressionOptions) -> CompressionReport {
        let mut report = CompressionReport::default();

        if let Some(fraction) = opts.prune_fraction {
            let fraction = fraction.clamp(0.0, 1.0);
            // always keep at least one member
            let drop = ((self.p.stumps.len() as f64 * fraction).floor() as usize)
                .min(self.p.stumps.len().saturating_sub(1));
            if drop > 0 {
                let mut order: Vec<usize> = (0..self.p.stumps.len()).collect();
                order.sort_by(|a, b| {
                    self.p.stumps[*a]
                        .alpha
                        .abs()
                        .total_cmp(&self.p.stumps[*b].alpha.abs())
                });
                let weakest: Vec<usize> = order.into_iter().take(drop).collect();
                let mut idx = 0;
                self.p.stumps.retain(|_| {
                    let keep = !weakest.contains(&idx);
                    idx += 1;
                    keep
                });
                report.members_pruned = drop;
            }
        }

        if let Some(d) = opts.round_decimals {
            for s in &mut self.p.stumps {
                s.threshold = round_to(s.threshold, d);
                s.alpha = round_to(s.alpha, d);
            }
            report.values_rounded = self.p.stumps.len() * 2;
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..80)
            .map(|i| vec![(i % 10) as f64, i as f64 / 80.0])
            .collect();
        let y = x
            .iter()
            .map(|r| if r[1] > 0.5 || r[0] > 7.0 { 1.0 } else { 0.0 })
            .collect();
        (x, y)
    }

    fn fitted(n: i64) -> StumpEnsemble {
        let (x, y) = data();
        let mut m =
            StumpEnsemble::from_config(&OpaqueConfig::new().with("n_estimators", n)).unwrap();
        m.fit(&x, &y).unwrap();
        m
    }

    #[test]
    fn fits_two_feature_rule() {
        let m = fitted(30);
        assert!(m.predict(&[9.0, 0.1]).unwrap().value > 0.5);
        assert!(m.predict(&[1.0, 0.9]).unwrap().value > 0.5);
        assert!(m.predict(&[1.0, 0.1]).unwrap().value < 0.5);
    }

    #[test]
    fn pruning_drops_weakest_members() {
        let mut m = fitted(30);
        let before = m.len();
        assert!(before >= 4, "only {before} stumps");
        let strongest = m
            .p
            .stumps
            .iter()
            .map(|s| s.alpha.abs())
            .fold(0.0, f64::max);

        let report = m.compress(&CompressionOptions {
            prune_fraction: Some(0.5),
            ..Default::default()
        });
        assert_eq!(report.members_pruned, before / 2);
        assert_eq!(m.len(), before - before / 2);
        assert!(m.p.stumps.iter().any(|s| s.alpha.abs() == strongest));
    }

    #[test]
    fn pruning_keeps_one_member() {
        let mut m = fitted(30);
        m.compress(&CompressionOptions {
            prune_fraction: Some(1.0),
            ..Default::default()
        });
        assert_eq!(m.len(), 1);
        assert!(m.predict(&[9.0, 0.9]).is_ok());
    }

    #[test]
    fn indistinguishable_rows_fail() {
        let x = vec![vec![1.0], vec![1.0]];
        let mut m = StumpEnsemble::from_config(&OpaqueConfig::new()).unwrap();
        assert!(matches!(
            m.fit(&x, &[0.0, 1.0]),
            Err(AlgoError::InvalidData(_))
        ));
        assert!(matches!(m.predict(&[1.0]), Err(AlgoError::NotFitted)));
    }
}
