//! Ridge linear regression fitted by full-batch gradient descent.

use serde::{Deserialize, Serialize};

use model_types::{AlgorithmKind, KeySpec, OpaqueConfig, ValueType};

use crate::codec::ModelParams;
use crate::{
    check_training_shape, round_to, AlgoError, CompressionOptions, CompressionReport, Prediction,
    Result, Trainable,
};

pub const RECOGNIZED_KEYS: &[KeySpec] = &[
    KeySpec::new("learning_rate", ValueType::Number),
    KeySpec::new("epochs", ValueType::Integer),
    KeySpec::new("l2", ValueType::Number),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearParams {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub learning_rate: f64,
    pub epochs: u64,
    pub l2: f64,
    /// Training residual standard deviation; drives prediction confidence.
    pub residual_std: f64,
}

pub struct LinearRegression {
    p: LinearParams,
}

impl LinearRegression {
    pub fn from_config(hyper: &OpaqueConfig) -> Result<Self> {
        hyper.validate(RECOGNIZED_KEYS, "linear")?;
        Ok(Self {
            p: LinearParams {
                weights: vec![],
                bias: 0.0,
                learning_rate: hyper.get_f64("learning_rate").unwrap_or(0.05),
                epochs: hyper.get_u64("epochs").unwrap_or(300),
                l2: hyper.get_f64("l2").unwrap_or(0.0),
                residual_std: 0.0,
            },
        })
    }

    pub fn from_params(p: LinearParams) -> Self {
        Self { p }
    }

    fn raw(&self, row: &[f64]) -> f64 {
        self.p
            .weights
            .iter()
            .zip(row)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.p.bias
    }
}

impl Trainable for LinearRegression {
    fn family(&self) -> AlgorithmKind {
        AlgorithmKind::Linear
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        let dim = check_training_shape(x, y)?;
        let n = x.len() as f64;
        self.p.weights = vec![0.0; dim];
        self.p.bias = y.iter().sum::<f64>() / n;

        for _ in 0..self.p.epochs {
            let mut grad_w = vec![0.0; dim];
            let mut grad_b = 0.0;
            for (row, target) in x.iter().zip(y) {
                let err = self.raw(row) - target;
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

        let sse: f64 = x
            .iter()
            .zip(y)
            .map(|(row, t)| (self.raw(row) - t).powi(2))
            .sum();
        self.p.residual_std = (sse / n).sqrt();
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
        Ok(Prediction {
            value: self.raw(row),
            confidence: 1.0 / (1.0 + self.p.residual_std),
        })
    }

    fn params(&self) -> ModelParams {
        ModelParams::Linear(self.p.clone())
    }

    fn compress(&mut self, opts: &CompressionOptions) -> CompressionReport {
        let mut report = CompressionReport::default();
        if let Some(d) = opts.round_decimals {
            for w in &mut self.p.weights {
                *w = round_to(*w, d);
            }
            self.p.bias = round_to(self.p.bias, d);
            self.p.residual_std = round_to(self.p.residual_std, d);
            report.values_rounded = self.p.weights.len() + 2;
        }
        report
    }
}
