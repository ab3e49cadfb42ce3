#![allow(dead_code)]

use perf_lens::async_optimizer::OptimizerConfig;
use perf_lens::bottleneck::{DetectorConfig, Threshold};
use perf_lens::caching::CacheConfig;
use perf_lens::manager::Telemetry;
use perf_lens::metrics_store::MemoryMetricsStore;
use perf_lens::profiler::{CollectingReportSink, ProfilerConfig, ProfilerDeps};
use perf_lens::resources::ManualResourceProbe;
use std::sync::Arc;
use std::time::Duration;

/// Telemetry over deterministic collaborators, with handles kept for assertions
pub struct TestTelemetry {
    pub telemetry: Arc<Telemetry>,
    pub probe: Arc<ManualResourceProbe>,
    pub store: Arc<MemoryMetricsStore>,
    pub reports: Arc<CollectingReportSink>,
}

pub fn create_test_telemetry(thresholds: Vec<(String, Threshold)>) -> TestTelemetry {
    let probe = Arc::new(ManualResourceProbe::new());
    let store = Arc::new(MemoryMetricsStore::new());
    let reports = Arc::new(CollectingReportSink::new());
    let deps = ProfilerDeps {
        probe: probe.clone(),
        store: store.clone(),
        report_sink: reports.clone(),
    };
    let telemetry = Telemetry::new(
        ProfilerConfig::default(),
        DetectorConfig {
            enabled: true,
            thresholds,
        },
        CacheConfig::default(),
        OptimizerConfig::default(),
        deps,
    );

    TestTelemetry {
        telemetry: Arc::new(telemetry),
        probe,
        store,
        reports,
    }
}

pub fn threshold(warning_ms: f64, critical_ms: f64, samples_required: usize) -> Threshold {
    Threshold {
        warning_ms,
        critical_ms,
        samples_required,
    }
}

/// Records one operation of `duration_ms` on the paused clock
pub async fn run_operation(telemetry: &Telemetry, operation_id: &str, duration_ms: u64) {
    telemetry.profiler().start_operation(operation_id);
    tokio::time::advance(Duration::from_millis(duration_ms)).await;
    telemetry.profiler().end_operation(operation_id, None);
}
