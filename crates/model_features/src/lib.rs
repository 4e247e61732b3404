//! Feature-extraction boundary.
//!
//! Raw feature computation lives outside this workspace. The core only sees
//! `FeatureExtractor::extract`, which may fail or return a partial vector.
//! Callers align vectors to a known feature list with `FeatureVector::dense`,
//! so absent features read as zero.

pub mod mock;
pub mod store;

pub use mock::{StaticExtractor, SyntheticExtractor};
pub use store::FeatureStore;

use model_types::FeatureVector;

#[async_trait::async_trait]
pub trait FeatureExtractor: Send + Sync {
    /// Short name for logs ("static", "synthetic", ...).
    fn name(&self) -> &str;

    async fn extract(&self, entity_id: &str, entity_type: &str) -> anyhow::Result<FeatureVector>;
}
