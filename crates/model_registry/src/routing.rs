use rand::Rng;

use model_types::{ABTestConfig, LifecycleError, ModelVersion, Result};

use crate::ModelRegistry;

impl ModelRegistry {
    /// Version string that should answer the next request for `model_type`.
    pub fn get_serving_version(&self, model_type: &str, for_ab_test: bool) -> Result<String> {
        Ok(self
            .serving_model_with_rng(model_type, for_ab_test, &mut rand::thread_rng())?
            .version)
    }

    pub fn serving_model(&self, model_type: &str, for_ab_test: bool) -> Result<ModelVersion> {
        self.serving_model_with_rng(model_type, for_ab_test, &mut rand::thread_rng())
    }

    /// Routing decision with an injected random source. With a running A/B
    /// test, `version_b` is picked with probability `traffic_split`; otherwise
    /// the active version answers. Reads only.
    pub fn serving_model_with_rng<R: Rng>(
        &self,
        model_type: &str,
        for_ab_test: bool,
        rng: &mut R,
    ) -> Result<ModelVersion> {
        if for_ab_test {
            if let Some(test) = self.cached_ab_test(model_type)? {
                if test.is_running(self.clock.now_ms()) {
                    let arm = if rng.gen::<f64>() < test.traffic_split {
                        &test.version_b
                    } else {
                        &test.version_a
                    };
                    return self.require_named(model_type, arm);
                }
            }
        }
        self.metadata
            .active_version(model_type)?
            .ok_or_else(|| LifecycleError::not_found(format!("active version for {model_type}")))
    }

    /// The A/B test flagged active for `model_type`, whether or not its
    /// window has opened yet.
    pub fn get_active_ab_test(&self, model_type: &str) -> Result<Option<ABTestConfig>> {
        self.cached_ab_test(model_type)
    }

    fn cached_ab_test(&self, model_type: &str) -> Result<Option<ABTestConfig>> {
        let key = model_type.to_string();
        if let Some(cached) = self.ab_cache.get(&key) {
            return Ok(cached);
        }
        let test = self.metadata.active_ab_test(model_type)?;
        self.ab_cache.insert(key, test.clone());
        Ok(test)
    }
}
