use std::collections::BTreeMap;

use model_types::{Result, TriggerType, DAY_MS};

use crate::TrainingOrchestrator;

impl TrainingOrchestrator {
    /// Every retraining condition that currently holds. The same model type
    /// may appear once per trigger type; picking one job per type is the
    /// caller's job (see [`dedupe_triggers`]).
    pub fn check_retraining_triggers(&self) -> Result<Vec<(String, TriggerType)>> {
        let catalog = self.registry.catalog();
        let mut out = Vec::new();

        for spec in catalog.specs() {
            if let Some(m) = self.metadata.latest_metric(&spec.name, &spec.primary_metric)? {
                if m.value < spec.performance_threshold {
                    tracing::info!(
                        model_type = %spec.name,
                        metric = %spec.primary_metric,
                        value = m.value,
                        threshold = spec.performance_threshold,
                        "performance below threshold"
                    );
                    out.push((spec.name.clone(), TriggerType::PerformanceDrop));
                }
            }
        }

        let counts = self.metadata.unprocessed_counts()?;
        let total: usize = counts.values().sum();
        if total >= self.config.feedback_total_gate {
            for (category, count) in &counts {
                if *count < self.config.feedback_category_min {
                    continue;
                }
                let Some(owner) = catalog.owner_of_category(category) else {
                    tracing::debug!(category = %category, "feedback category has no owner");
                    continue;
                };
                let hit = (owner.name.clone(), TriggerType::FeedbackThreshold);
                if !out.contains(&hit) {
                    out.push(hit);
                }
            }
        }

        let interval = self.config.schedule_interval_days as i64 * DAY_MS;
        let now = self.clock.now_ms();
        for spec in catalog.specs() {
            let due = match self.metadata.latest_completed_job(&spec.name)? {
                None => true,
                Some(job) => now - job.completed_at_ms.unwrap_or(job.created_at_ms) >= interval,
            };
            if due {
                out.push((spec.name.clone(), TriggerType::Scheduled));
            }
        }
        Ok(out)
    }
}

/// One trigger per model type, keeping the most urgent. Output is sorted by
/// model type.
pub fn dedupe_triggers(triggers: &[(String, TriggerType)]) -> Vec<(String, TriggerType)> {
    let mut best: BTreeMap<&str, TriggerType> = BTreeMap::new();
    for (model_type, trigger) in triggers {
        best.entry(model_type.as_str())
            .and_modify(|t| {
                if trigger.urgency() > t.urgency() {
                    *t = *trigger;
                }
            })
            .or_insert(*trigger);
    }
    best.into_iter().map(|(m, t)| (m.to_string(), t)).collect()
}
