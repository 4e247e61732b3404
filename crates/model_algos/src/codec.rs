//! Artifact encoding for fitted estimators.
//!
//! Default artifacts are JSON. The binary form (bincode behind a 4-byte
//! magic) is what the optimizer's format conversion emits; `deserialize`
//! accepts either.

use serde::{Deserialize, Serialize};

use crate::linear::{LinearParams, LinearRegression};
use crate::logistic::{LogisticParams, LogisticRegression};
use crate::stumps::{StumpEnsemble, StumpParams};
use crate::{AlgoError, Result, Trainable};

const BINARY_MAGIC: &[u8; 4] = b"MLB1";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    Json,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelParams {
    Logistic(LogisticParams),
    Linear(LinearParams),
    BoostedStumps(StumpParams),
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    params: ModelParams,
}

pub fn encode(params: &ModelParams, format: ArtifactFormat) -> Result<Vec<u8>> {
    let envelope = Envelope {
        format_version: FORMAT_VERSION,
        params: params.clone(),
    };
    match format {
        ArtifactFormat::Json => {
            serde_json::to_vec(&envelope).map_err(|e| AlgoError::Encode(e.to_string()))
        }
        ArtifactFormat::Binary => {
            let mut out = BINARY_MAGIC.to_vec();
            let body = bincode::serialize(&envelope).map_err(|e| AlgoError::Encode(e.to_string()))?;
            out.extend_from_slice(&body);
            Ok(out)
        }
    }
}

pub fn detect_format(bytes: &[u8]) -> ArtifactFormat {
    if bytes.starts_with(BINARY_MAGIC) {
        ArtifactFormat::Binary
    } else {
        ArtifactFormat::Json
    }
}

/// Rebuild an estimator from artifact bytes, dispatching on the family tag.
pub fn deserialize(bytes: &[u8]) -> Result<Box<dyn Trainable>> {
    let envelope: Envelope = match detect_format(bytes) {
        ArtifactFormat::Binary => bincode::deserialize(&bytes[BINARY_MAGIC.len()..])
            .map_err(|e| AlgoError::Decode(e.to_string()))?,
        ArtifactFormat::Json => {
            serde_json::from_slice(bytes).map_err(|e| AlgoError::Decode(e.to_string()))?
        }
    };
    if envelope.format_version != FORMAT_VERSION {
        return Err(AlgoError::Decode(format!(
            "unsupported artifact format version {}",
            envelope.format_version
        )));
    }
    let model: Box<dyn Trainable> = match envelope.params {
        ModelParams::Logistic(p) => Box::new(LogisticRegression::from_params(p)),
        ModelParams::Linear(p) => Box::new(LinearRegression::from_params(p)),
        ModelParams::BoostedStumps(p) => Box::new(StumpEnsemble::from_params(p)),
    };
    Ok(model)
}
