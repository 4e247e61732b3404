//! Feature vectors produced by the external extraction collaborator.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::DAY_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Numerical,
    Categorical,
    Temporal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureValue {
    Number(f64),
    Category(String),
    /// Unix milliseconds.
    Timestamp(i64),
}

impl FeatureValue {
    /// Numeric encoding used by the estimators. Categories map to a stable
    /// bucket in `[0, 1)`, timestamps to days since the epoch.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Number(v) if v.is_finite() => *v,
            Self::Number(_) => 0.0,
            Self::Category(c) => {
                let digest = Sha256::digest(c.as_bytes());
                let bucket = u16::from_be_bytes([digest[0], digest[1]]);
                bucket as f64 / 65_536.0
            }
            Self::Timestamp(ms) => *ms as f64 / DAY_MS as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub value: FeatureValue,
    pub kind: FeatureKind,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl Feature {
    pub fn numerical(name: &str, value: f64) -> Self {
        Self {
            name: name.into(),
            value: FeatureValue::Number(value),
            kind: FeatureKind::Numerical,
            confidence: 1.0,
        }
    }

    pub fn categorical(name: &str, value: &str) -> Self {
        Self {
            name: name.into(),
            value: FeatureValue::Category(value.into()),
            kind: FeatureKind::Categorical,
            confidence: 1.0,
        }
    }

    pub fn temporal(name: &str, unix_ms: i64) -> Self {
        Self {
            name: name.into(),
            value: FeatureValue::Timestamp(unix_ms),
            kind: FeatureKind::Temporal,
            confidence: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub entity_id: String,
    pub entity_type: String,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub extracted_at_ms: i64,
    #[serde(default)]
    pub content_hash: String,
}

impl FeatureVector {
    /// Build a vector and stamp its content hash.
    pub fn new(entity_id: &str, entity_type: &str, features: Vec<Feature>, now_ms: i64) -> Self {
        let content_hash = content_hash(&features);
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            features,
            extracted_at_ms: now_ms,
            content_hash,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Value of `name`, zero when the collaborator left it out.
    pub fn value_or_zero(&self, name: &str) -> f64 {
        self.get(name).map(|f| f.value.as_f64()).unwrap_or(0.0)
    }

    /// Dense row in the order of `names`; missing features are zero.
    pub fn dense(&self, names: &[String]) -> Vec<f64> {
        names.iter().map(|n| self.value_or_zero(n)).collect()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    pub fn mean_confidence(&self) -> f64 {
        if self.features.is_empty() {
            return 0.0;
        }
        self.features.iter().map(|f| f.confidence).sum::<f64>() / self.features.len() as f64
    }
}

/// SHA-256 over the canonical JSON of the features, sorted by name.
pub fn content_hash(features: &[Feature]) -> String {
    let mut sorted: Vec<&Feature> = features.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    let encoded = serde_json::to_vec(&sorted).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_defaults_missing_to_zero() {
        let v = FeatureVector::new(
            "e1",
            "competitor",
            vec![Feature::numerical("mentions", 4.0)],
            0,
        );
        let row = v.dense(&["mentions".into(), "sentiment".into()]);
        assert_eq!(row, vec![4.0, 0.0]);
    }

    #[test]
    fn content_hash_ignores_feature_order() {
        let a = vec![Feature::numerical("x", 1.0), Feature::categorical("tier", "gold")];
        let b = vec![Feature::categorical("tier", "gold"), Feature::numerical("x", 1.0)];
        assert_eq!(content_hash(&a), content_hash(&b));
        let c = vec![Feature::numerical("x", 2.0)];
        assert_ne!(content_hash(&a), content_hash(&c));
    }

    #[test]
    fn categorical_bucket_is_stable_and_bounded() {
        let v = FeatureValue::Category("enterprise".into()).as_f64();
        assert_eq!(v, FeatureValue::Category("enterprise".into()).as_f64());
        assert!((0.0..1.0).contains(&v));
        assert_eq!(FeatureValue::Number(f64::NAN).as_f64(), 0.0);
        assert_eq!(FeatureValue::Timestamp(2 * DAY_MS).as_f64(), 2.0);
    }
}
