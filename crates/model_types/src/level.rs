use std::fmt;

use serde::{Deserialize, Serialize};

/// How hard the inference optimizer compresses a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    None,
    Basic,
    Aggressive,
    Ultra,
}

impl OptimizationLevel {
    pub const ALL: [OptimizationLevel; 4] = [Self::None, Self::Basic, Self::Aggressive, Self::Ultra];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic => "basic",
            Self::Aggressive => "aggressive",
            Self::Ultra => "ultra",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == s)
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
