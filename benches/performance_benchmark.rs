use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use perf_lens::bottleneck::{detect_dependencies, DetectorConfig, IssueType, PerformanceIssue};
use perf_lens::caching::{estimate_size, CacheConfig, CachingService};
use perf_lens::profiler::{CollectingReportSink, Profiler, ProfilerConfig, ProfilerDeps};
use perf_lens::metrics_store::MemoryMetricsStore;
use perf_lens::resources::ManualResourceProbe;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn test_profiler() -> Arc<Profiler> {
    let deps = ProfilerDeps {
        probe: Arc::new(ManualResourceProbe::new()),
        store: Arc::new(MemoryMetricsStore::new()),
        report_sink: Arc::new(CollectingReportSink::new()),
    };
    let (profiler, _detector) = Profiler::build(ProfilerConfig::default(), DetectorConfig::default(), deps);
    profiler
}

fn bench_profiler(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let _enter = rt.enter();
    let mut group = c.benchmark_group("profiler");

    let profiler = test_profiler();
    group.bench_function("start_end_operation", |b| {
        b.iter(|| {
            profiler.start_operation(black_box("bench.op"));
            profiler.end_operation(black_box("bench.op"), None);
        })
    });

    for operations in [10usize, 100] {
        let profiler = test_profiler();
        for i in 0..operations {
            let id = format!("bench.op.{}", i);
            for _ in 0..20 {
                profiler.start_operation(&id);
                profiler.end_operation(&id, None);
            }
        }
        group.throughput(Throughput::Elements(operations as u64));
        group.bench_with_input(BenchmarkId::new("generate_report", operations), &profiler, |b, profiler| {
            b.iter(|| black_box(profiler.generate_report()))
        });
        group.bench_with_input(BenchmarkId::new("analyze_all", operations), &profiler, |b, profiler| {
            b.iter(|| black_box(profiler.detector().analyze_all()))
        });
    }

    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let _enter = rt.enter();
    let mut group = c.benchmark_group("cache");

    let cache: CachingService<serde_json::Value> = CachingService::new(CacheConfig::default());
    let value = serde_json::json!({ "symbol": "BTCUSDT", "levels": [1, 2, 3, 4, 5], "active": true });
    for i in 0..500 {
        cache.set(format!("key:{}", i), value.clone(), None);
    }

    group.bench_function("get_hit", |b| b.iter(|| black_box(cache.get(black_box("key:250")))));
    group.bench_function("get_miss", |b| b.iter(|| black_box(cache.get(black_box("absent")))));
    group.bench_function("estimate_size", |b| b.iter(|| black_box(estimate_size(black_box(&value)))));

    // Each insert past capacity triggers an eviction
    let full: CachingService<u64> = CachingService::new(CacheConfig {
        max_size: 100,
        ..CacheConfig::default()
    });
    let mut n = 0u64;
    group.bench_function("set_with_eviction", |b| {
        b.iter(|| {
            n += 1;
            full.set(format!("k{}", n), n, None);
        })
    });

    group.finish();
}

fn bench_dependencies(c: &mut Criterion) {
    let mut group = c.benchmark_group("dependencies");
    let types = [
        IssueType::ExecutionTime,
        IssueType::MemoryUsage,
        IssueType::OperationsCount,
        IssueType::MemoryLeakSuspected,
    ];

    for count in [50usize, 500] {
        let issues: Vec<PerformanceIssue> = (0..count)
            .map(|i| {
                let mut issue = PerformanceIssue::new(types[i % types.len()], i as f64, 1.0, "bench");
                issue.timestamp_ms = (i as i64) * 150;
                issue
            })
            .collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &issues, |b, issues| {
            b.iter(|| black_box(detect_dependencies(issues, 1000)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_profiler, bench_cache, bench_dependencies);
criterion_main!(benches);
