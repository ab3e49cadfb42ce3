//! Persistence for profiler history
//!
//! The profiler treats its store as an opaque key-value snapshot: it is read once
//! at startup, written on a fixed interval and at disposal. Stores apply the
//! retention policy (30 days, 1000 samples per operation) before writing.

pub mod errors;
pub mod lmdb;
pub mod memory;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::profiler::structs::{ResourceDelta, TrendPoint};

pub use errors::StoreError;
pub use lmdb::LmdbMetricsStore;
pub use memory::MemoryMetricsStore;

pub const RETENTION_DAYS: i64 = 30;
pub const MAX_SAMPLES_PER_OPERATION: usize = 1000;

const RETENTION_MS: i64 = RETENTION_DAYS * 24 * 60 * 60 * 1000;

/// Serialized profiler state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub operation_timings: HashMap<String, Vec<f64>>,
    pub operation_trends: HashMap<String, Vec<TrendPoint>>,
    pub resource_usage: HashMap<String, Vec<ResourceDelta>>,
    pub last_updated: i64,
}

impl MetricsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.operation_timings.is_empty() && self.operation_trends.is_empty() && self.resource_usage.is_empty()
    }

    /// Copy of the snapshot with samples older than the retention window dropped and
    /// every per-operation sequence capped to its newest `MAX_SAMPLES_PER_OPERATION`.
    pub fn retained(&self, now_ms: i64) -> Self {
        let cutoff = now_ms - RETENTION_MS;

        let operation_trends = self
            .operation_trends
            .iter()
            .filter_map(|(id, points)| {
                let fresh: Vec<TrendPoint> = points.iter().copied().filter(|p| p.timestamp_ms >= cutoff).collect();
                (!fresh.is_empty()).then(|| (id.clone(), keep_newest(fresh)))
            })
            .collect();

        Self {
            operation_timings: cap_all(&self.operation_timings),
            operation_trends,
            resource_usage: cap_all(&self.resource_usage),
            last_updated: self.last_updated,
        }
    }
}

fn keep_newest<T>(mut samples: Vec<T>) -> Vec<T> {
    if samples.len() > MAX_SAMPLES_PER_OPERATION {
        samples.drain(..samples.len() - MAX_SAMPLES_PER_OPERATION);
    }
    samples
}

fn cap_all<T: Clone>(map: &HashMap<String, Vec<T>>) -> HashMap<String, Vec<T>> {
    map.iter()
        .filter(|(_, samples)| !samples.is_empty())
        .map(|(id, samples)| (id.clone(), keep_newest(samples.clone())))
        .collect()
}

/// Opaque persisted store for profiler history
pub trait MetricsStore: Send + Sync {
    /// Empty defaults when nothing was stored yet
    fn load(&self) -> Result<MetricsSnapshot, StoreError>;
    fn save(&self, snapshot: &MetricsSnapshot) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_drops_old_trend_points() {
        let now = 100 * 24 * 60 * 60 * 1000;
        let mut snapshot = MetricsSnapshot::default();
        snapshot.operation_trends.insert(
            "file.read".to_string(),
            vec![
                TrendPoint { timestamp_ms: now - RETENTION_MS - 1, duration_ms: 5.0 },
                TrendPoint { timestamp_ms: now - 1000, duration_ms: 7.0 },
            ],
        );
        snapshot.operation_trends.insert(
            "stale".to_string(),
            vec![TrendPoint { timestamp_ms: 0, duration_ms: 1.0 }],
        );

        let retained = snapshot.retained(now);
        assert_eq!(retained.operation_trends["file.read"].len(), 1);
        assert_eq!(retained.operation_trends["file.read"][0].duration_ms, 7.0);
        assert!(!retained.operation_trends.contains_key("stale"));
    }

    #[test]
    fn test_retention_caps_sample_count() {
        let mut snapshot = MetricsSnapshot::default();
        let durations: Vec<f64> = (0..1500).map(|i| i as f64).collect();
        snapshot.operation_timings.insert("parse".to_string(), durations);

        let retained = snapshot.retained(0);
        let kept = &retained.operation_timings["parse"];
        assert_eq!(kept.len(), MAX_SAMPLES_PER_OPERATION);
        assert_eq!(kept[0], 500.0);
        assert_eq!(kept[kept.len() - 1], 1499.0);
    }
}
