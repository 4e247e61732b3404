//! Standard scaler persisted as the `preprocessor` artifact.

use serde::{Deserialize, Serialize};

use crate::{AlgoError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    pub feature_names: Vec<String>,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Preprocessor {
    pub fn fit(feature_names: Vec<String>, x: &[Vec<f64>]) -> Result<Self> {
        let dim = feature_names.len();
        if x.is_empty() {
            return Err(AlgoError::InvalidData("cannot fit scaler on zero rows".into()));
        }
        if let Some(bad) = x.iter().find(|r| r.len() != dim) {
            return Err(AlgoError::Dimension {
                expected: dim,
                actual: bad.len(),
            });
        }
        let n = x.len() as f64;
        let mut means = vec![0.0; dim];
        for row in x {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut stds = vec![0.0; dim];
        for row in x {
            for ((s, v), m) in stds.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in &mut stds {
            *s = s.sqrt();
        }
        Ok(Self {
            feature_names,
            means,
            stds,
        })
    }

    pub fn dim(&self) -> usize {
        self.feature_names.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.dim() {
            return Err(AlgoError::Dimension {
                expected: self.dim(),
                actual: row.len(),
            });
        }
        Ok(row
            .iter()
            .zip(&self.means)
            .zip(&self.stds)
            .map(|((v, m), s)| {
                // zero-variance columns only get centered
                let s = if *s > f64::EPSILON { *s } else { 1.0 };
                (v - m) / s
            })
            .collect())
    }

    pub fn transform(&self, x: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        x.iter().map(|r| self.transform_row(r)).collect()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| AlgoError::Encode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| AlgoError::Decode(e.to_string()))
    }
}
