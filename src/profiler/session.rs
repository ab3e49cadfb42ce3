//! Continuous profiling sessions
//!
//! A session samples process memory, CPU and the detector's operation counter on a
//! fixed cadence. Every sample is checked against the session thresholds and, once
//! two samples exist, against growth limits over the rolling history.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bottleneck::{IssueType, PerformanceIssue};
use crate::resources::{CpuUsage, MemoryUsage, ResourceSnapshot};

pub const SESSION_HISTORY_LIMIT: usize = 100;
pub const MEMORY_GROWTH_LIMIT_PERCENT: f64 = 10.0;
pub const OPERATION_GROWTH_LIMIT_PERCENT: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionThresholds {
    pub max_execution_time_ms: f64,
    pub max_memory_usage_bytes: u64,
    pub max_operations_count: u64,
}

impl Default for SessionThresholds {
    fn default() -> Self {
        Self {
            max_execution_time_ms: 1000.0,
            max_memory_usage_bytes: 100 * 1024 * 1024,
            max_operations_count: 1000,
        }
    }
}

/// One capture of a running session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionSample {
    pub timestamp_ms: i64,
    pub memory: MemoryUsage,
    pub cpu: CpuUsage,
    pub operations_count: u64,
    /// Time elapsed since the previous capture
    pub execution_time_ms: f64,
}

/// Summary published when a session stops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub started_at_ms: i64,
    pub duration_ms: f64,
    pub sample_count: usize,
    pub average_memory_bytes: f64,
    pub peak_memory_bytes: u64,
    pub total_operations: u64,
    pub issues: Vec<PerformanceIssue>,
    pub markers: HashMap<String, i64>,
    pub recommendations: Vec<String>,
}

pub(crate) struct ProfilingSession {
    pub id: String,
    pub started: Instant,
    pub started_at_ms: i64,
    pub thresholds: SessionThresholds,
    pub metrics: Vec<SessionSample>,
    pub history: VecDeque<SessionSample>,
    pub markers: HashMap<String, i64>,
    pub last_capture: Instant,
    pub task: Option<JoinHandle<()>>,
}

impl ProfilingSession {
    pub fn new(id: String, thresholds: SessionThresholds) -> Self {
        let now = Instant::now();
        Self {
            id,
            started: now,
            started_at_ms: chrono::Utc::now().timestamp_millis(),
            thresholds,
            metrics: Vec::new(),
            history: VecDeque::with_capacity(SESSION_HISTORY_LIMIT),
            markers: HashMap::new(),
            last_capture: now,
            task: None,
        }
    }

    /// Appends a capture and returns the issues it raises
    pub fn capture(&mut self, snapshot: ResourceSnapshot, operations_count: u64) -> Vec<PerformanceIssue> {
        let now = Instant::now();
        let sample = SessionSample {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            memory: snapshot.memory,
            cpu: snapshot.cpu,
            operations_count,
            execution_time_ms: now.duration_since(self.last_capture).as_secs_f64() * 1000.0,
        };
        self.last_capture = now;

        self.metrics.push(sample);
        self.history.push_back(sample);
        while self.history.len() > SESSION_HISTORY_LIMIT {
            self.history.pop_front();
        }

        self.evaluate(&sample)
    }

    fn evaluate(&self, sample: &SessionSample) -> Vec<PerformanceIssue> {
        let mut issues = Vec::new();
        let limits = &self.thresholds;

        if sample.execution_time_ms > limits.max_execution_time_ms {
            issues.push(self.issue(IssueType::ExecutionTime, sample.execution_time_ms, limits.max_execution_time_ms));
        }
        if sample.memory.heap_used_bytes > limits.max_memory_usage_bytes {
            issues.push(self.issue(
                IssueType::MemoryUsage,
                sample.memory.heap_used_bytes as f64,
                limits.max_memory_usage_bytes as f64,
            ));
        }
        if sample.operations_count > limits.max_operations_count {
            issues.push(self.issue(
                IssueType::OperationsCount,
                sample.operations_count as f64,
                limits.max_operations_count as f64,
            ));
        }

        if self.history.len() >= 2 {
            if let (Some(first), Some(last)) = (self.history.front(), self.history.back()) {
                let memory_growth =
                    growth_percent(first.memory.heap_used_bytes as f64, last.memory.heap_used_bytes as f64);
                if memory_growth > MEMORY_GROWTH_LIMIT_PERCENT {
                    issues.push(self.issue(IssueType::MemoryLeakSuspected, memory_growth, MEMORY_GROWTH_LIMIT_PERCENT));
                }

                let operation_growth = growth_percent(first.operations_count as f64, last.operations_count as f64);
                if operation_growth > OPERATION_GROWTH_LIMIT_PERCENT {
                    issues.push(self.issue(
                        IssueType::OperationCountGrowth,
                        operation_growth,
                        OPERATION_GROWTH_LIMIT_PERCENT,
                    ));
                }
            }
        }

        issues
    }

    fn issue(&self, issue_type: IssueType, metric: f64, threshold: f64) -> PerformanceIssue {
        PerformanceIssue::new(issue_type, metric, threshold, self.id.clone())
    }

    /// Builds the stop report; `caching_candidates` are operations the caching heuristic flagged
    pub fn into_report(self, issues: Vec<PerformanceIssue>, caching_candidates: &[String]) -> (SessionReport, Vec<SessionSample>) {
        let duration_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let heap: Vec<u64> = self.metrics.iter().map(|m| m.memory.heap_used_bytes).collect();
        let average_memory_bytes = if heap.is_empty() {
            0.0
        } else {
            heap.iter().sum::<u64>() as f64 / heap.len() as f64
        };

        let (memory_growth, operation_growth, total_operations) = match (self.metrics.first(), self.metrics.last()) {
            (Some(first), Some(last)) => (
                growth_percent(first.memory.heap_used_bytes as f64, last.memory.heap_used_bytes as f64),
                growth_percent(first.operations_count as f64, last.operations_count as f64),
                last.operations_count.saturating_sub(first.operations_count),
            ),
            _ => (0.0, 0.0, 0),
        };

        let mut recommendations = Vec::new();
        if memory_growth > MEMORY_GROWTH_LIMIT_PERCENT {
            recommendations.push(format!(
                "Memory grew {:.1}% during the session; look for caches or listeners that are never released",
                memory_growth
            ));
        }
        if operation_growth > OPERATION_GROWTH_LIMIT_PERCENT {
            recommendations.push(format!(
                "Operation count grew {:.1}% during the session; consider batching or debouncing frequent calls",
                operation_growth
            ));
        }
        for operation_id in caching_candidates {
            recommendations.push(format!("Operation '{}' would benefit from caching", operation_id));
        }

        let report = SessionReport {
            session_id: self.id,
            started_at_ms: self.started_at_ms,
            duration_ms,
            sample_count: self.metrics.len(),
            average_memory_bytes,
            peak_memory_bytes: heap.iter().copied().max().unwrap_or(0),
            total_operations,
            issues,
            markers: self.markers,
            recommendations,
        };
        (report, self.metrics)
    }
}

/// Relative change in percent; zero when the starting value is zero
pub fn growth_percent(first: f64, last: f64) -> f64 {
    if first == 0.0 {
        0.0
    } else {
        (last - first) / first * 100.0
    }
}
