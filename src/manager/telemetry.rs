use std::sync::Arc;
use tracing::info;

use super::{ManagerError, PerformanceReport};
use crate::async_optimizer::{AsyncOptimizer, OptimizerConfig};
use crate::bottleneck::{BottleneckDetector, DetectorConfig};
use crate::caching::{CacheConfig, CachingService};
use crate::config::PerfLensConfig;
use crate::metrics_store::{LmdbMetricsStore, MemoryMetricsStore, MetricsStore};
use crate::profiler::{JsonFileReportSink, LogReportSink, Profiler, ProfilerConfig, ProfilerDeps, ReportSink};
use crate::resources::ProcessResourceProbe;

/// The four telemetry components, constructed once and shared by reference
pub struct Telemetry {
    profiler: Arc<Profiler>,
    detector: Arc<BottleneckDetector>,
    cache: Arc<CachingService<serde_json::Value>>,
    optimizer: AsyncOptimizer,
}

impl Telemetry {
    pub fn new(
        profiler_config: ProfilerConfig,
        detector_config: DetectorConfig,
        cache_config: CacheConfig,
        optimizer_config: OptimizerConfig,
        deps: ProfilerDeps,
    ) -> Self {
        let (profiler, detector) = Profiler::build(profiler_config, detector_config, deps);
        Self {
            profiler,
            detector,
            cache: Arc::new(CachingService::new(cache_config)),
            optimizer: AsyncOptimizer::new(optimizer_config),
        }
    }

    /// Builds the components from file configuration; history goes to LMDB when
    /// `profiler.storage_path` is set
    pub fn from_config(config: &PerfLensConfig) -> Result<Self, ManagerError> {
        let store: Arc<dyn MetricsStore> = match &config.profiler.storage_path {
            Some(path) => Arc::new(LmdbMetricsStore::open(path)?),
            None => Arc::new(MemoryMetricsStore::new()),
        };
        let report_sink: Arc<dyn ReportSink> = match &config.profiler.report_dir {
            Some(dir) => Arc::new(JsonFileReportSink::new(dir.clone())),
            None => Arc::new(LogReportSink),
        };
        let deps = ProfilerDeps {
            probe: Arc::new(ProcessResourceProbe::new()),
            store,
            report_sink,
        };

        Ok(Self::new(
            config.profiler.to_profiler_config(),
            config.bottleneck.to_detector_config(),
            config.cache.to_cache_config(),
            config.async_optimizer.to_optimizer_config(),
            deps,
        ))
    }

    /// Starts the persistence and cache sweep timers
    pub fn start(&self) {
        self.profiler.start_persistence();
        self.cache.start_sweeper();
        info!("🚀 Telemetry timers started");
    }

    pub fn profiler(&self) -> &Arc<Profiler> {
        &self.profiler
    }

    pub fn detector(&self) -> &Arc<BottleneckDetector> {
        &self.detector
    }

    pub fn cache(&self) -> &Arc<CachingService<serde_json::Value>> {
        &self.cache
    }

    pub fn optimizer(&self) -> &AsyncOptimizer {
        &self.optimizer
    }

    /// Classifies every profiled operation and collects all component views
    pub fn generate_report(&self) -> PerformanceReport {
        PerformanceReport {
            timestamp: chrono::Utc::now().timestamp_millis(),
            profiler: self.profiler.generate_report(),
            bottlenecks: self.detector.analyze_all(),
            issue_summary: self.detector.get_summary(),
            cache: self.cache.get_metrics(),
            async_optimizer: self.optimizer.get_stats(),
            active_sessions: self.profiler.active_sessions(),
        }
    }

    /// Drops profiler history (memory and store), issues, counters and cache contents
    pub fn clear_all_data(&self) {
        self.profiler.clear_stored_metrics();
        self.detector.clear();
        self.detector.reset_operations_count();
        self.cache.clear_all();
        self.cache.reset_stats();
        info!("🧹 All telemetry data cleared");
    }

    pub fn dispose(&self) {
        self.profiler.dispose();
        self.cache.dispose();
        self.optimizer.dispose();
        info!("🛑 Telemetry disposed");
    }
}
