//! Threshold-based bottleneck classification and issue pattern detection
//!
//! The detector pulls aggregate timings from the profiler (through `OperationStatsSource`)
//! and classifies each operation as critical or warning against per-id or per-prefix
//! thresholds. Profiling sessions push `PerformanceIssue`s back into it; those feed the
//! rolling metric history from which patterns and recommendations are derived.

pub mod patterns;
pub mod structs;

pub use patterns::{detect_dependencies, IssueTracker};
pub use structs::*;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::profiler::structs::OperationStats;

const ISSUE_CHANNEL_CAPACITY: usize = 256;
const CRITICAL_SUGGESTION_COUNT: usize = 3;

const GENERAL_SUGGESTIONS: [&str; 4] = [
    "Cache results of repeated computations with stable inputs",
    "Move blocking work off the async runtime with spawn_blocking",
    "Batch small operations to reduce per-call overhead",
    "Profile allocations in the hot path and reuse buffers",
];

const FILE_SUGGESTIONS: [&str; 2] = [
    "Cache file contents and invalidate on modification time",
    "Use buffered or streaming reads for large files",
];

const REQUEST_SUGGESTIONS: [&str; 2] = [
    "Batch API requests that target the same endpoint",
    "Cache responses with a TTL matched to data freshness",
];

/// Read access to the profiler's aggregate statistics
pub trait OperationStatsSource: Send + Sync {
    fn operation_stats(&self, operation_id: &str) -> Option<OperationStats>;
    fn all_stats(&self) -> HashMap<String, OperationStats>;
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub enabled: bool,
    /// Registered in order; earlier prefixes win when several match
    pub thresholds: Vec<(String, Threshold)>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thresholds: Vec::new(),
        }
    }
}

pub struct BottleneckDetector {
    enabled: AtomicBool,
    stats_source: Weak<dyn OperationStatsSource>,
    thresholds: Mutex<Vec<(String, Threshold)>>,
    severity_counts: Mutex<HashMap<String, SeverityCounts>>,
    tracker: Mutex<IssueTracker>,
    operations_count: AtomicU64,
    issue_events: broadcast::Sender<PerformanceIssue>,
}

impl BottleneckDetector {
    pub fn new(config: DetectorConfig, stats_source: Weak<dyn OperationStatsSource>) -> Self {
        let (issue_events, _) = broadcast::channel(ISSUE_CHANNEL_CAPACITY);
        let detector = Self {
            enabled: AtomicBool::new(config.enabled),
            stats_source,
            thresholds: Mutex::new(Vec::new()),
            severity_counts: Mutex::new(HashMap::new()),
            tracker: Mutex::new(IssueTracker::new()),
            operations_count: AtomicU64::new(0),
            issue_events,
        };
        for (operation_id, threshold) in config.thresholds {
            detector.set_threshold(operation_id, threshold);
        }
        detector
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Disabling drops the classification counters; thresholds are kept
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.severity_counts.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
        info!("🔎 Bottleneck detection {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn set_threshold(&self, operation_id: impl Into<String>, threshold: Threshold) {
        let operation_id = operation_id.into();
        let mut thresholds = self.thresholds.lock().unwrap_or_else(PoisonError::into_inner);
        match thresholds.iter_mut().find(|(id, _)| *id == operation_id) {
            Some((_, existing)) => *existing = threshold,
            None => thresholds.push((operation_id, threshold)),
        }
    }

    /// Exact id, then the first registered prefix of the id, then the default
    pub fn threshold_for(&self, operation_id: &str) -> Threshold {
        let thresholds = self.thresholds.lock().unwrap_or_else(PoisonError::into_inner);
        thresholds
            .iter()
            .find(|(id, _)| id == operation_id)
            .or_else(|| thresholds.iter().find(|(prefix, _)| operation_id.starts_with(prefix.as_str())))
            .map(|(_, threshold)| *threshold)
            .unwrap_or(DEFAULT_THRESHOLD)
    }

    /// Classifies one operation; `None` when disabled, unknown, under-sampled or within limits
    pub fn analyze_operation(&self, operation_id: &str) -> Option<Severity> {
        if !self.is_enabled() {
            return None;
        }
        let source = self.stats_source.upgrade()?;
        let stats = source.operation_stats(operation_id)?;
        self.classify(operation_id, &stats)
    }

    pub fn analyze_all(&self) -> BottleneckReport {
        let mut report = BottleneckReport::default();
        if !self.is_enabled() {
            return report;
        }
        let Some(source) = self.stats_source.upgrade() else {
            return report;
        };

        let mut all: Vec<(String, OperationStats)> = source.all_stats().into_iter().collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));

        for (operation_id, stats) in all {
            match self.classify(&operation_id, &stats) {
                Some(Severity::Critical) => report.critical.push(operation_id),
                Some(Severity::Warning) => report.warnings.push(operation_id),
                None => {}
            }
        }

        debug!(
            critical = report.critical.len(),
            warnings = report.warnings.len(),
            "🔎 Bottleneck sweep complete"
        );
        report
    }

    fn classify(&self, operation_id: &str, stats: &OperationStats) -> Option<Severity> {
        let threshold = self.threshold_for(operation_id);
        if stats.count < threshold.samples_required {
            return None;
        }

        let severity = if stats.avg > threshold.critical_ms {
            Severity::Critical
        } else if stats.avg > threshold.warning_ms {
            Severity::Warning
        } else {
            return None;
        };

        {
            let mut counts = self.severity_counts.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = counts.entry(operation_id.to_string()).or_default();
            match severity {
                Severity::Critical => entry.critical += 1,
                Severity::Warning => entry.warning += 1,
            }
        }

        match severity {
            Severity::Critical => {
                let suggestions: Vec<String> = self
                    .get_optimization_suggestions(operation_id)
                    .into_iter()
                    .take(CRITICAL_SUGGESTION_COUNT)
                    .collect();
                error!(
                    operation = %operation_id,
                    avg_ms = stats.avg,
                    critical_ms = threshold.critical_ms,
                    samples = stats.count,
                    suggestions = ?suggestions,
                    "🚨 Critical bottleneck detected"
                );
            }
            Severity::Warning => {
                warn!(
                    operation = %operation_id,
                    avg_ms = stats.avg,
                    warning_ms = threshold.warning_ms,
                    samples = stats.count,
                    "⚠️ Slow operation detected"
                );
            }
        }

        Some(severity)
    }

    pub fn severity_counts(&self, operation_id: &str) -> SeverityCounts {
        self.severity_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn get_optimization_suggestions(&self, operation_id: &str) -> Vec<String> {
        let id = operation_id.to_lowercase();
        let mut suggestions: Vec<String> = Vec::new();

        if id.contains("file") {
            suggestions.extend(FILE_SUGGESTIONS.iter().map(|s| s.to_string()));
        }
        if id.contains("api") || id.contains("request") {
            suggestions.extend(REQUEST_SUGGESTIONS.iter().map(|s| s.to_string()));
        }
        suggestions.extend(GENERAL_SUGGESTIONS.iter().map(|s| s.to_string()));
        suggestions
    }

    /// Stamps, records and broadcasts an issue
    pub fn report_performance_issue(&self, mut issue: PerformanceIssue) {
        issue.timestamp_ms = chrono::Utc::now().timestamp_millis();

        let pattern = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(issue.clone());

        warn!(
            session = %issue.session_id,
            issue_type = %issue.issue_type,
            metric = issue.metric,
            threshold = issue.threshold,
            "📉 Performance issue reported"
        );
        if let Some(pattern) = pattern {
            debug!(
                pattern = %pattern.operation_id,
                frequency = pattern.frequency,
                memory_impact = pattern.memory_impact,
                dependencies = pattern.dependencies.len(),
                "🧩 Pattern updated"
            );
        }

        // No receivers is not an error
        let _ = self.issue_events.send(issue);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PerformanceIssue> {
        self.issue_events.subscribe()
    }

    pub fn get_issues(&self, session_id: &str) -> Vec<PerformanceIssue> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner).issues(session_id)
    }

    pub fn get_operations_count(&self) -> u64 {
        self.operations_count.load(Ordering::Relaxed)
    }

    pub fn increment_operations_count(&self) {
        self.operations_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset_operations_count(&self) {
        self.operations_count.store(0, Ordering::Relaxed);
    }

    pub fn get_pattern_analysis(&self, session_id: &str) -> PatternAnalysis {
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pattern_analysis(session_id)
    }

    pub fn get_summary(&self) -> IssueSummary {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner).summary()
    }

    /// Drops issues, patterns and metric history; thresholds and the counter are untouched
    pub fn clear(&self) {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner).clear();
        info!("🧹 Bottleneck detector issue history cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct FixedStats {
        stats: Mutex<HashMap<String, OperationStats>>,
    }

    impl FixedStats {
        fn with(entries: &[(&str, &[f64])]) -> Arc<Self> {
            let source = Self::default();
            {
                let mut stats = source.stats.lock().unwrap();
                for (id, durations) in entries {
                    stats.insert(id.to_string(), OperationStats::from_durations(durations).unwrap());
                }
            }
            Arc::new(source)
        }
    }

    impl OperationStatsSource for FixedStats {
        fn operation_stats(&self, operation_id: &str) -> Option<OperationStats> {
            self.stats.lock().unwrap().get(operation_id).copied()
        }

        fn all_stats(&self) -> HashMap<String, OperationStats> {
            self.stats.lock().unwrap().clone()
        }
    }

    fn detector_for(source: &Arc<FixedStats>) -> BottleneckDetector {
        let weak: Weak<dyn OperationStatsSource> = Arc::downgrade(source) as Weak<dyn OperationStatsSource>;
        BottleneckDetector::new(DetectorConfig::default(), weak)
    }

    fn threshold(warning_ms: f64, critical_ms: f64, samples_required: usize) -> Threshold {
        Threshold {
            warning_ms,
            critical_ms,
            samples_required,
        }
    }

    #[test]
    fn test_critical_dominates_warning() {
        let source = FixedStats::with(&[("render", &[2500.0; 5]), ("parse", &[800.0; 5]), ("fast", &[10.0; 5])]);
        let detector = detector_for(&source);
        detector.set_threshold("render", threshold(500.0, 2000.0, 1));

        let report = detector.analyze_all();
        assert_eq!(report.critical, vec!["render".to_string()]);
        assert_eq!(report.warnings, vec!["parse".to_string()]);
        assert_eq!(detector.severity_counts("render"), SeverityCounts { critical: 1, warning: 0 });
    }

    #[test]
    fn test_exact_threshold_beats_prefix() {
        let source = FixedStats::with(&[("file.read", &[1500.0; 5])]);
        let detector = detector_for(&source);
        detector.set_threshold("file.", threshold(100.0, 1000.0, 1));
        detector.set_threshold("file.read", threshold(1000.0, 2000.0, 1));

        assert_eq!(detector.threshold_for("file.read").warning_ms, 1000.0);
        assert_eq!(detector.analyze_operation("file.read"), Some(Severity::Warning));
    }

    #[test]
    fn test_prefix_and_default_lookup() {
        let source = FixedStats::with(&[]);
        let detector = detector_for(&source);
        detector.set_threshold("net.", threshold(10.0, 20.0, 1));
        detector.set_threshold("net.http", threshold(30.0, 40.0, 1));

        // First registered prefix wins
        assert_eq!(detector.threshold_for("net.http.get").warning_ms, 10.0);
        assert_eq!(detector.threshold_for("db.query"), DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_samples_required_gates_classification() {
        let source = FixedStats::with(&[("op", &[5000.0; 4])]);
        let detector = detector_for(&source);
        assert_eq!(detector.analyze_operation("op"), None);

        detector.set_threshold("op", threshold(500.0, 2000.0, 4));
        assert_eq!(detector.analyze_operation("op"), Some(Severity::Critical));
    }

    #[test]
    fn test_disable_resets_counters_but_keeps_thresholds() {
        let source = FixedStats::with(&[("op", &[900.0; 5])]);
        let detector = detector_for(&source);
        detector.set_threshold("op", threshold(100.0, 2000.0, 1));
        detector.analyze_operation("op");
        assert_eq!(detector.severity_counts("op").warning, 1);

        detector.set_enabled(false);
        assert_eq!(detector.analyze_operation("op"), None);
        assert!(detector.analyze_all().warnings.is_empty());
        assert_eq!(detector.severity_counts("op"), SeverityCounts::default());
        assert_eq!(detector.threshold_for("op").warning_ms, 100.0);
    }

    #[test]
    fn test_suggestions_by_operation_name() {
        let source = FixedStats::with(&[]);
        let detector = detector_for(&source);

        let general = detector.get_optimization_suggestions("compute");
        assert_eq!(general.len(), GENERAL_SUGGESTIONS.len());

        let file = detector.get_optimization_suggestions("file.read");
        assert_eq!(file[0], FILE_SUGGESTIONS[0]);

        let api = detector.get_optimization_suggestions("api.request.users");
        assert_eq!(api[0], REQUEST_SUGGESTIONS[0]);
        assert_eq!(api.len(), GENERAL_SUGGESTIONS.len() + REQUEST_SUGGESTIONS.len());
    }

    #[tokio::test]
    async fn test_report_issue_stamps_and_broadcasts() {
        let source = FixedStats::with(&[]);
        let detector = detector_for(&source);
        let mut events = detector.subscribe();

        detector.report_performance_issue(PerformanceIssue::new(IssueType::MemoryUsage, 120.0, 100.0, "s1"));

        let received = events.recv().await.unwrap();
        assert_eq!(received.issue_type, IssueType::MemoryUsage);
        assert!(received.timestamp_ms > 0);

        let issues = detector.get_issues("s1");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0], received);
        assert!(detector.get_issues("other").is_empty());
    }

    #[test]
    fn test_operations_counter() {
        let source = FixedStats::with(&[]);
        let detector = detector_for(&source);
        detector.increment_operations_count();
        detector.increment_operations_count();
        assert_eq!(detector.get_operations_count(), 2);

        detector.clear();
        assert_eq!(detector.get_operations_count(), 2);
        detector.reset_operations_count();
        assert_eq!(detector.get_operations_count(), 0);
    }

    #[test]
    fn test_dropped_source_yields_nothing() {
        let source = FixedStats::with(&[("op", &[5000.0; 10])]);
        let detector = detector_for(&source);
        drop(source);
        assert_eq!(detector.analyze_operation("op"), None);
        assert_eq!(detector.analyze_all(), BottleneckReport::default());
    }
}
