//! Operation profiler
//!
//! Callers bracket work with `start_operation`/`end_operation` (or `time`/`guard`).
//! Starts are queued per id and closed FIFO. Each start records a resource snapshot
//! whose `after` half is filled in by the matching end. History is persisted to a
//! `MetricsStore` on a fixed interval and restored on construction.
//!
//! The profiler also runs continuous profiling sessions which push issues into the
//! `BottleneckDetector`; the detector reads aggregate stats back through
//! `OperationStatsSource`.

pub mod errors;
pub mod report;
pub mod session;
pub mod structs;

pub use errors::ProfilerError;
pub use report::{CollectingReportSink, JsonFileReportSink, LogReportSink, ReportSink};
pub use session::{SessionReport, SessionSample, SessionThresholds};
pub use structs::*;

use rustc_hash::FxHashMap;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::bottleneck::{BottleneckDetector, DetectorConfig, OperationStatsSource};
use crate::caching::should_cache;
use crate::metrics_store::{MemoryMetricsStore, MetricsSnapshot, MetricsStore};
use crate::resources::{ProcessResourceProbe, ResourceProbe};
use session::ProfilingSession;

#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    pub enabled: bool,
    pub persist_interval: Duration,
    pub session_sampling_interval: Duration,
    pub default_session_thresholds: SessionThresholds,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            persist_interval: Duration::from_secs(300),
            session_sampling_interval: Duration::from_millis(100),
            default_session_thresholds: SessionThresholds::default(),
        }
    }
}

/// Collaborators the profiler reads from and writes to
#[derive(Clone)]
pub struct ProfilerDeps {
    pub probe: Arc<dyn ResourceProbe>,
    pub store: Arc<dyn MetricsStore>,
    pub report_sink: Arc<dyn ReportSink>,
}

impl Default for ProfilerDeps {
    fn default() -> Self {
        Self {
            probe: Arc::new(ProcessResourceProbe::new()),
            store: Arc::new(MemoryMetricsStore::new()),
            report_sink: Arc::new(LogReportSink),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingStart {
    instant: Instant,
    wall_ms: i64,
}

#[derive(Debug, Default)]
struct TimingState {
    durations: FxHashMap<String, Vec<f64>>,
    trends: FxHashMap<String, Vec<TrendPoint>>,
    resources: FxHashMap<String, Vec<ResourceDelta>>,
    pending: FxHashMap<String, VecDeque<PendingStart>>,
}

impl TimingState {
    fn clear(&mut self) {
        self.durations.clear();
        self.trends.clear();
        self.resources.clear();
        self.pending.clear();
    }

    fn restore(&mut self, snapshot: MetricsSnapshot) {
        for (id, durations) in snapshot.operation_timings {
            self.durations.entry(id).or_default().extend(durations);
        }
        for (id, points) in snapshot.operation_trends {
            self.trends.entry(id).or_default().extend(points);
        }
        for (id, deltas) in snapshot.resource_usage {
            self.resources.entry(id).or_default().extend(deltas);
        }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operation_timings: self.durations.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            operation_trends: self.trends.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            resource_usage: self.resources.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            last_updated: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn stats(&self, operation_id: &str) -> Option<OperationStats> {
        self.durations
            .get(operation_id)
            .and_then(|durations| OperationStats::from_durations(durations))
    }
}

pub struct Profiler {
    enabled: AtomicBool,
    config: ProfilerConfig,
    state: Mutex<TimingState>,
    sessions: Mutex<HashMap<String, ProfilingSession>>,
    detector: Arc<BottleneckDetector>,
    probe: Arc<dyn ResourceProbe>,
    store: Arc<dyn MetricsStore>,
    report_sink: Arc<dyn ReportSink>,
    persistence_task: Mutex<Option<JoinHandle<()>>>,
}

impl Profiler {
    /// Creates a profiler and its detector wired to each other
    pub fn build(
        config: ProfilerConfig,
        detector_config: DetectorConfig,
        deps: ProfilerDeps,
    ) -> (Arc<Profiler>, Arc<BottleneckDetector>) {
        let profiler = Arc::new_cyclic(|weak: &Weak<Profiler>| {
            let source: Weak<dyn OperationStatsSource> = weak.clone();
            let detector = Arc::new(BottleneckDetector::new(detector_config, source));
            Profiler::new(config, detector, deps)
        });
        let detector = Arc::clone(&profiler.detector);
        (profiler, detector)
    }

    fn new(config: ProfilerConfig, detector: Arc<BottleneckDetector>, deps: ProfilerDeps) -> Self {
        let mut state = TimingState::default();
        match deps.store.load() {
            Ok(snapshot) if !snapshot.is_empty() => {
                info!(
                    operations = snapshot.operation_timings.len(),
                    last_updated = snapshot.last_updated,
                    "📂 Restored stored profiler metrics"
                );
                state.restore(snapshot);
            }
            Ok(_) => debug!("📂 No stored profiler metrics"),
            Err(e) => error!("❌ Failed to load stored profiler metrics: {}", e),
        }

        Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            state: Mutex::new(state),
            sessions: Mutex::new(HashMap::new()),
            detector,
            probe: deps.probe,
            store: deps.store,
            report_sink: deps.report_sink,
            persistence_task: Mutex::new(None),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TimingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn detector(&self) -> &Arc<BottleneckDetector> {
        &self.detector
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Disabling drops in-memory samples; the store is untouched
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.state().clear();
        }
        info!("⏱️ Profiling {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn start_operation(&self, operation_id: &str) {
        if !self.is_enabled() {
            return;
        }
        let snapshot = self.probe.sample();
        let start = PendingStart {
            instant: Instant::now(),
            wall_ms: chrono::Utc::now().timestamp_millis(),
        };

        let mut state = self.state();
        state.pending.entry(operation_id.to_string()).or_default().push_back(start);
        state
            .resources
            .entry(operation_id.to_string())
            .or_default()
            .push(ResourceDelta::opened(snapshot));
    }

    /// Closes the oldest open start for the id. `note` is only attached to the log event.
    pub fn end_operation(&self, operation_id: &str, note: Option<&str>) -> Option<OperationSample> {
        if !self.is_enabled() {
            return None;
        }
        let snapshot = self.probe.sample();
        let now = Instant::now();

        let mut state = self.state();
        let Some(start) = state.pending.get_mut(operation_id).and_then(VecDeque::pop_front) else {
            warn!(operation = %operation_id, note = ?note, "⚠️ end_operation without a matching start");
            return None;
        };

        let duration_ms = now.duration_since(start.instant).as_secs_f64() * 1000.0;
        state.durations.entry(operation_id.to_string()).or_default().push(duration_ms);
        state.trends.entry(operation_id.to_string()).or_default().push(TrendPoint {
            timestamp_ms: start.wall_ms,
            duration_ms,
        });
        if let Some(delta) = state.resources.get_mut(operation_id).and_then(|d| d.last_mut()) {
            delta.close(snapshot);
        }
        debug!(operation = %operation_id, duration_ms, note = ?note, "⏱️ Operation ended");

        Some(OperationSample {
            operation_id: operation_id.to_string(),
            duration_ms,
            started_at_ms: start.wall_ms,
        })
    }

    /// Times a future as one operation
    pub async fn time<F, T>(&self, operation_id: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        self.start_operation(operation_id);
        let output = fut.await;
        self.end_operation(operation_id, None);
        output
    }

    /// Starts an operation that ends when the guard is dropped
    pub fn guard<'a>(&'a self, operation_id: &str) -> OperationGuard<'a> {
        self.start_operation(operation_id);
        OperationGuard {
            profiler: self,
            operation_id: operation_id.to_string(),
        }
    }

    pub fn get_operation_stats(&self, operation_id: &str) -> Option<OperationStats> {
        self.state().stats(operation_id)
    }

    pub fn get_all_stats(&self) -> HashMap<String, OperationStats> {
        let state = self.state();
        state
            .durations
            .iter()
            .filter_map(|(id, durations)| OperationStats::from_durations(durations).map(|s| (id.clone(), s)))
            .collect()
    }

    pub fn get_operation_trend(&self, operation_id: &str) -> Option<OperationTrend> {
        self.state()
            .trends
            .get(operation_id)
            .and_then(|points| OperationTrend::from_points(points))
    }

    pub fn get_operation_resource_stats(&self, operation_id: &str) -> Option<ResourceStats> {
        self.state()
            .resources
            .get(operation_id)
            .and_then(|deltas| ResourceStats::from_deltas(deltas))
    }

    /// Operations ordered by average duration, slowest first
    pub fn get_slowest_operations(&self, limit: usize) -> Vec<(String, OperationStats)> {
        let mut all: Vec<(String, OperationStats)> = self.get_all_stats().into_iter().collect();
        all.sort_by(|a, b| b.1.avg.total_cmp(&a.1.avg).then_with(|| a.0.cmp(&b.0)));
        all.truncate(limit);
        all
    }

    pub fn generate_report(&self) -> ProfilerReport {
        let stats = self.get_all_stats();
        let operations = stats
            .iter()
            .map(|(id, stats)| {
                (
                    id.clone(),
                    OperationReport {
                        stats: *stats,
                        trend: self.get_operation_trend(id),
                        resources: self.get_operation_resource_stats(id),
                    },
                )
            })
            .collect();

        ProfilerReport {
            timestamp: chrono::Utc::now().timestamp_millis(),
            enabled: self.is_enabled(),
            total_operations: stats.values().map(|s| s.count).sum(),
            slowest_operations: self.get_slowest_operations(10),
            operations,
        }
    }

    pub fn export_to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.generate_report())
    }

    pub fn reset_stats(&self) {
        self.state().clear();
        debug!("🧹 Profiler statistics reset");
    }

    /// Clears the store and in-memory state; store failures are logged
    pub fn clear_stored_metrics(&self) {
        if let Err(e) = self.store.clear() {
            error!("❌ Failed to clear stored profiler metrics: {}", e);
        }
        self.state().clear();
        info!("🧹 Stored profiler metrics cleared");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state().snapshot()
    }

    pub fn persist(&self) -> Result<(), ProfilerError> {
        let snapshot = self.snapshot();
        self.store.save(&snapshot)?;
        debug!(operations = snapshot.operation_timings.len(), "💾 Profiler metrics persisted");
        Ok(())
    }

    fn persist_logged(&self) {
        if !self.is_enabled() {
            return;
        }
        if let Err(e) = self.persist() {
            error!("❌ Failed to persist profiler metrics: {}", e);
        }
    }

    /// Spawns the periodic persistence task; replaces any previous one
    pub fn start_persistence(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.config.persist_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(profiler) = weak.upgrade() else {
                    break;
                };
                profiler.persist_logged();
            }
        });

        let mut slot = self.persistence_task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    pub fn start_profiling(
        self: &Arc<Self>,
        session_id: &str,
        thresholds: Option<SessionThresholds>,
    ) -> Result<(), ProfilerError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(session_id) {
            return Err(ProfilerError::SessionAlreadyActive(session_id.to_string()));
        }

        let thresholds = thresholds.unwrap_or(self.config.default_session_thresholds);
        let mut session = ProfilingSession::new(session_id.to_string(), thresholds);
        session.task = Some(self.spawn_capture(session_id.to_string()));
        sessions.insert(session_id.to_string(), session);

        info!(session = %session_id, ?thresholds, "▶️ Profiling session started");
        Ok(())
    }

    fn spawn_capture(self: &Arc<Self>, session_id: String) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.config.session_sampling_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(profiler) = weak.upgrade() else {
                    break;
                };
                if !profiler.capture_session_sample(&session_id) {
                    break;
                }
            }
        })
    }

    /// Returns false once the session is gone
    fn capture_session_sample(&self, session_id: &str) -> bool {
        if !self.is_enabled() {
            return self
                .sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(session_id);
        }

        let snapshot = self.probe.sample();
        let operations_count = self.detector.get_operations_count();

        let issues = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(session) = sessions.get_mut(session_id) else {
                return false;
            };
            session.capture(snapshot, operations_count)
        };

        for issue in issues {
            self.detector.report_performance_issue(issue);
        }
        true
    }

    pub fn add_marker(&self, session_id: &str, name: &str) -> Result<(), ProfilerError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ProfilerError::SessionNotFound(session_id.to_string()))?;
        session
            .markers
            .insert(name.to_string(), chrono::Utc::now().timestamp_millis());
        debug!(session = %session_id, marker = %name, "📍 Marker added");
        Ok(())
    }

    pub fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Stops the session, publishes its report and returns the captured samples
    pub fn stop_profiling(&self, session_id: &str) -> Result<Vec<SessionSample>, ProfilerError> {
        let mut session = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .ok_or_else(|| ProfilerError::SessionNotFound(session_id.to_string()))?;
        if let Some(task) = session.task.take() {
            task.abort();
        }

        let mut caching_candidates: Vec<String> = self
            .get_all_stats()
            .into_iter()
            .filter(|(_, stats)| should_cache(stats.avg, stats.count))
            .map(|(id, _)| id)
            .collect();
        caching_candidates.sort();

        let issues = self.detector.get_issues(session_id);
        let (report, metrics) = session.into_report(issues, &caching_candidates);

        info!(
            session = %session_id,
            samples = report.sample_count,
            issues = report.issues.len(),
            "⏹️ Profiling session stopped"
        );
        if let Err(e) = self.report_sink.publish(&report) {
            error!(session = %session_id, "❌ Failed to publish session report: {}", e);
        }
        Ok(metrics)
    }

    /// Stops all timers and writes a final snapshot
    pub fn dispose(&self) {
        if let Some(task) = self
            .persistence_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        for (_, mut session) in self.sessions.lock().unwrap_or_else(PoisonError::into_inner).drain() {
            if let Some(task) = session.task.take() {
                task.abort();
            }
        }
        self.persist_logged();
        info!("🛑 Profiler disposed");
    }
}

impl OperationStatsSource for Profiler {
    fn operation_stats(&self, operation_id: &str) -> Option<OperationStats> {
        self.get_operation_stats(operation_id)
    }

    fn all_stats(&self) -> HashMap<String, OperationStats> {
        self.get_all_stats()
    }
}

/// Ends its operation on drop
pub struct OperationGuard<'a> {
    profiler: &'a Profiler,
    operation_id: String,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.profiler.end_operation(&self.operation_id, None);
    }
}
