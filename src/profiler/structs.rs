use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::resources::{CpuUsage, MemoryUsage, ResourceSnapshot};

/// Number of most recent samples compared against the rest of the history
pub const TREND_RECENT_WINDOW: usize = 10;
/// Absolute change (percent) below which a trend is considered stable
pub const TREND_STABLE_PERCENT: f64 = 5.0;

/// One measured execution of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSample {
    pub operation_id: String,
    pub duration_ms: f64,
    pub started_at_ms: i64,
}

/// Duration sample stamped with its wall-clock start, kept for trend analysis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub timestamp_ms: i64,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPair<T> {
    pub before: T,
    pub after: T,
}

/// Memory/CPU readings taken around one operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDelta {
    pub memory: SnapshotPair<MemoryUsage>,
    pub cpu: SnapshotPair<CpuUsage>,
}

impl ResourceDelta {
    /// Placeholder entry recorded at start: `after` equals `before` until the end fills it in
    pub fn opened(snapshot: ResourceSnapshot) -> Self {
        Self {
            memory: SnapshotPair { before: snapshot.memory, after: snapshot.memory },
            cpu: SnapshotPair { before: snapshot.cpu, after: snapshot.cpu },
        }
    }

    pub fn close(&mut self, snapshot: ResourceSnapshot) {
        self.memory.after = snapshot.memory;
        self.cpu.after = snapshot.cpu;
    }

    pub fn heap_delta(&self) -> i64 {
        self.memory.after.heap_used_bytes as i64 - self.memory.before.heap_used_bytes as i64
    }

    pub fn external_delta(&self) -> i64 {
        self.memory.after.external_bytes as i64 - self.memory.before.external_bytes as i64
    }

    pub fn user_time_delta(&self) -> i64 {
        self.cpu.after.user_micros as i64 - self.cpu.before.user_micros as i64
    }

    pub fn system_time_delta(&self) -> i64 {
        self.cpu.after.system_micros as i64 - self.cpu.before.system_micros as i64
    }
}

/// Aggregate timing statistics for an operation (milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl OperationStats {
    pub fn from_durations(durations: &[f64]) -> Option<Self> {
        if durations.is_empty() {
            return None;
        }

        let sum: f64 = durations.iter().sum();
        let min = durations.iter().copied().fold(f64::INFINITY, f64::min);
        let max = durations.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(Self {
            avg: sum / durations.len() as f64,
            min,
            max,
            count: durations.len(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Stable,
    Degrading,
    Improving,
}

/// Recent vs historical average duration comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperationTrend {
    pub trend: TrendDirection,
    pub change_percent: f64,
    pub recent_avg: f64,
    pub historical_avg: f64,
}

impl OperationTrend {
    /// Requires more than `TREND_RECENT_WINDOW` samples so that at least one historical
    /// sample exists.
    pub fn from_points(points: &[TrendPoint]) -> Option<Self> {
        if points.len() < TREND_RECENT_WINDOW {
            return None;
        }

        let split = points.len() - TREND_RECENT_WINDOW;
        let (historical, recent) = points.split_at(split);
        if historical.is_empty() {
            return None;
        }

        let recent_avg = recent.iter().map(|p| p.duration_ms).sum::<f64>() / recent.len() as f64;
        let historical_avg = historical.iter().map(|p| p.duration_ms).sum::<f64>() / historical.len() as f64;

        let change_percent = if historical_avg > 0.0 {
            (recent_avg - historical_avg) / historical_avg * 100.0
        } else {
            0.0
        };

        let trend = if change_percent.abs() < TREND_STABLE_PERCENT {
            TrendDirection::Stable
        } else if recent_avg > historical_avg {
            TrendDirection::Degrading
        } else {
            TrendDirection::Improving
        };

        Some(Self {
            trend,
            change_percent,
            recent_avg,
            historical_avg,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub avg_heap_used: f64,
    pub max_heap_used: i64,
    pub avg_external_mem: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuStats {
    pub avg_user_time: f64,
    pub avg_system_time: f64,
    pub total_user_time: i64,
    pub total_system_time: i64,
}

/// Resource consumption of an operation, computed over (after - before) deltas
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub memory: MemoryStats,
    pub cpu: CpuStats,
}

impl ResourceStats {
    pub fn from_deltas(deltas: &[ResourceDelta]) -> Option<Self> {
        if deltas.is_empty() {
            return None;
        }
        let n = deltas.len() as f64;

        let heap: Vec<i64> = deltas.iter().map(ResourceDelta::heap_delta).collect();
        let total_user_time: i64 = deltas.iter().map(ResourceDelta::user_time_delta).sum();
        let total_system_time: i64 = deltas.iter().map(ResourceDelta::system_time_delta).sum();

        Some(Self {
            memory: MemoryStats {
                avg_heap_used: heap.iter().sum::<i64>() as f64 / n,
                max_heap_used: heap.iter().copied().max().unwrap_or(0),
                avg_external_mem: deltas.iter().map(ResourceDelta::external_delta).sum::<i64>() as f64 / n,
            },
            cpu: CpuStats {
                avg_user_time: total_user_time as f64 / n,
                avg_system_time: total_system_time as f64 / n,
                total_user_time,
                total_system_time,
            },
        })
    }
}

/// Per-operation detail included in exported reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationReport {
    pub stats: OperationStats,
    pub trend: Option<OperationTrend>,
    pub resources: Option<ResourceStats>,
}

/// Snapshot of everything the profiler currently knows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilerReport {
    pub timestamp: i64,
    pub enabled: bool,
    pub total_operations: usize,
    pub slowest_operations: Vec<(String, OperationStats)>,
    pub operations: HashMap<String, OperationReport>,
}
