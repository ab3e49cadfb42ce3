//! Orchestration of the telemetry components
//!
//! `Telemetry` owns one instance of each component, wired together at construction.
//! `PerfManagerActor` wraps it in a kameo actor that serves the external surface
//! (toggles, cache sizing, report interval, on-demand reports, clearing) and emits a
//! composite report on a fixed interval.

pub mod actor;
pub mod errors;
pub mod telemetry;

pub use actor::{ManagerAsk, ManagerReply, ManagerTell, PerfManagerActor};
pub use errors::ManagerError;
pub use telemetry::Telemetry;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::async_optimizer::OptimizerStats;
use crate::bottleneck::{BottleneckReport, IssueSummary};
use crate::caching::CacheMetrics;
use crate::profiler::ProfilerReport;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub report_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            report_interval: Duration::from_secs(300),
        }
    }
}

/// Composite view across all components at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub timestamp: i64,
    pub profiler: ProfilerReport,
    pub bottlenecks: BottleneckReport,
    pub issue_summary: IssueSummary,
    pub cache: CacheMetrics,
    pub async_optimizer: OptimizerStats,
    pub active_sessions: Vec<String>,
}

impl PerformanceReport {
    pub fn to_json(&self) -> Result<String, ManagerError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub reports_generated: u64,
    pub last_report_at: Option<i64>,
    pub report_interval_secs: u64,
    pub profiling_enabled: bool,
    pub bottleneck_detection_enabled: bool,
    pub cache_max_size: usize,
}
