//! Per-prediction-type serving counters and latency samples.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::Serialize;

const LATENCY_WINDOW: usize = 1024;

#[derive(Debug, Default)]
struct TypeStats {
    requests: u64,
    fallbacks: u64,
    errors: u64,
    optimized: u64,
    latencies_ms: VecDeque<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    pub requests: u64,
    pub fallbacks: u64,
    pub errors: u64,
    pub mean_latency_ms: f64,
    pub p95_latency_ms: f64,
    /// Share of requests answered by an optimized variant.
    pub optimized_ratio: f64,
    pub cache_hit_ratio: f64,
}

#[derive(Default)]
pub struct ServingMetrics {
    by_type: Mutex<HashMap<String, TypeStats>>,
}

impl ServingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, prediction_type: &str, latency_ms: f64, fallback: bool, optimized: bool) {
        let mut by_type = self.by_type.lock();
        let s = by_type.entry(prediction_type.to_string()).or_default();
        s.requests += 1;
        s.fallbacks += fallback as u64;
        s.optimized += optimized as u64;
        if s.latencies_ms.len() == LATENCY_WINDOW {
            s.latencies_ms.pop_front();
        }
        s.latencies_ms.push_back(latency_ms);
    }

    pub fn record_error(&self, prediction_type: &str) {
        self.by_type
            .lock()
            .entry(prediction_type.to_string())
            .or_default()
            .errors += 1;
    }

    /// Snapshot for one prediction type, or across all of them.
    pub fn snapshot(&self, prediction_type: Option<&str>, cache_hit_ratio: f64) -> PerformanceSnapshot {
        let by_type = self.by_type.lock();
        let mut out = PerformanceSnapshot {
            cache_hit_ratio,
            ..Default::default()
        };
        let mut optimized = 0u64;
        let mut latencies: Vec<f64> = Vec::new();
        for (name, s) in by_type.iter() {
            if prediction_type.map_or(false, |t| t != name) {
                continue;
            }
            out.requests += s.requests;
            out.fallbacks += s.fallbacks;
            out.errors += s.errors;
            optimized += s.optimized;
            latencies.extend(s.latencies_ms.iter().copied());
        }
        if !latencies.is_empty() {
            out.mean_latency_ms = latencies.iter().sum::<f64>() / latencies.len() as f64;
            latencies.sort_by(|a, b| a.total_cmp(b));
            out.p95_latency_ms = percentile(&latencies, 0.95);
        }
        if out.requests > 0 {
            out.optimized_ratio = optimized as f64 / out.requests as f64;
        }
        out
    }
}

/// Nearest-rank percentile of an ascending slice.
pub(crate) fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_rank() {
        let v: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        assert_eq!(percentile(&v, 0.5), 50.0);
        assert_eq!(percentile(&v, 0.95), 95.0);
        assert_eq!(percentile(&v, 0.99), 99.0);
        assert_eq!(percentile(&[7.0], 0.99), 7.0);
    }

    #[test]
    fn snapshot_filters_by_type() {
        let m = ServingMetrics::new();
        m.record("risk_scorer", 2.0, false, true);
        m.record("risk_scorer", 4.0, true, false);
        m.record("impact_classifier", 10.0, false, false);
        m.record_error("risk_scorer");

        let risk = m.snapshot(Some("risk_scorer"), 0.5);
        assert_eq!((risk.requests, risk.fallbacks, risk.errors), (2, 1, 1));
        assert_eq!(risk.mean_latency_ms, 3.0);
        assert_eq!(risk.optimized_ratio, 0.5);
        assert_eq!(risk.cache_hit_ratio, 0.5);

        let all = m.snapshot(None, 0.0);
        assert_eq!(all.requests, 3);
        assert_eq!(all.p95_latency_ms, 10.0);
    }
}
