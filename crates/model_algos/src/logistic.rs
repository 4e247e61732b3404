//! Binary logistic regression fitted by full-batch gradient descent.

use serde::{Deserialize, Serialize};

use model_types::{AlgorithmKind, KeySpec, OpaqueConfig, ValueType};

use crate::codec::ModelParams;
use crate::{
    check_training_shape, round_to, sigmoid, AlgoError, CompressionOptions, CompressionReport,
    Prediction, Result, Trainable,
};

pub const RECOGNIZED_KEYS: &[KeySpec] = &[
    KeySpec::new("learning_rate", ValueType::Number),
    KeySpec::new("epochs", ValueType::Integer),
    KeySpec::new("l2", ValueType::Number),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub learning_rate: f64,
    pub epochs: u64,
    pub l2: f64,
}

pub struct LogisticRegression {
    p: LogisticParams,
}

impl LogisticRegression {
    pub fn from_config(hyper: &OpaqueConfig) -> Result<Self> {
        hyper.validate(RECOGNIZED_KEYS, "logistic")?;
        Ok(Self {
            p: LogisticParams {
                weights: vec![],
                bias: 0.0,
                learning_rate: hyper.get_f64("learning_rate").unwrap_or(0.1),
                epochs: hyper.get_u64("epochs").unwrap_or(200),
                l2: hyper.get_f64("l2").unwrap_or(0.0),
            },
        })
    }

    pub fn from_params(p: LogisticParams) -> Self {
        Self { p }
    }

    fn score(&self, row: &[f64]) -> f64 {
        self.p
            .weights
            .iter()
            .zip(row)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.p.bias
    }
}

impl Trainable for LogisticRegression {
    fn family(&self) -> AlgorithmKind {
        AlgorithmKind::Logistic
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        let dim = check_training_shape(x, y)?;
        let n = x.len() as f64;
        self.p.weights = vec![0.0; dim];
        self.p.bias = 0.0;

        for _ in 0..self.p.epochs {
            let mut grad_w = vec![0.0; dim];
            let mut grad_b = 0.0;
            for (row, target) in x.iter().zip(y) {
                let err = sigmoid(self.score(row)) - target;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }
            for (w, g) in self.p.weights.iter_mut().zip(&grad_w) {
                *w -= self.p.learning_rate * (g / n + self.p.l2 * *w);
            }
            self.p.bias -= self.p.learning_rate * grad_b / n;
        }
        Ok(())
    }

    fn predict(&self, row: &[f64]) -> Result<Prediction> {
        if self.p.weights.is_empty() {
            return Err(AlgoError::NotFitted);
        }
        if row.len() != self.p.weights.len() {
            return Err(AlgoError::Dimension {
                expected: self.p.weights.len(),
                actual: row.len(),
            });
        }
        let p = sigmoid(self.score(row));
        Ok(Prediction {
            value: p,
            confidence: p.max(1.0 - p),
        })
    }

    fn params(&self) -> ModelParams {
        ModelParams::Logistic(self.p.clone())
    }

    fn compress(&mut self, opts: &CompressionOptions) -> CompressionReport {
        let mut report = CompressionReport::default();
        if let Some(d) = opts.round_decimals {
            for w in &mut self.p.weights {
                *w = round_to(*w, d);
            }
            self.p.bias = round_to(self.p.bias, d);
            report.values_rounded = self.p.weights.len() + 1;
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..100)
            .map(|i| {
                let t = i as f64 / 50.0 - 1.0;
                vec![t, -t * 0.5]
            })
            .collect();
        let y = x.iter().map(|r| if r[0] > 0.0 { 1.0 } else { 0.0 }).collect();
        (x, y)
    }

    #[test]
    fn learns_separable_data() {
        let (x, y) = separable();
        let mut m = LogisticRegression::from_config(&OpaqueConfig::new().with("epochs", 500i64)).unwrap();
        m.fit(&x, &y).unwrap();

        let hi = m.predict(&[0.9, -0.45]).unwrap();
        let lo = m.predict(&[-0.9, 0.45]).unwrap();
        assert!(hi.value > 0.8, "{hi:?}");
        assert!(lo.value < 0.2, "{lo:?}");
        assert!(hi.confidence >= 0.5);
    }

    #[test]
    fn unfitted_and_wrong_width() {
        let m = LogisticRegression::from_config(&OpaqueConfig::new()).unwrap();
        assert!(matches!(m.predict(&[1.0]), Err(AlgoError::NotFitted)));

        let (x, y) = separable();
        let mut m = LogisticRegression::from_config(&OpaqueConfig::new()).unwrap();
        m.fit(&x, &y).unwrap();
        assert!(matches!(
            m.predict(&[1.0]),
            Err(AlgoError::Dimension { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn rounding_changes_little() {
        let (x, y) = separable();
        let mut m = LogisticRegression::from_config(&OpaqueConfig::new()).unwrap();
        m.fit(&x, &y).unwrap();
        let before = m.predict(&[0.3, -0.15]).unwrap().value;
        let report = m.compress(&CompressionOptions {
            round_decimals: Some(3),
            ..Default::default()
        });
        assert_eq!(report.values_rounded, 3);
        let after = m.predict(&[0.3, -0.15]).unwrap().value;
        assert!((before - after).abs() < 0.01);
    }
}
