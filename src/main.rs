use std::sync::Arc;
use std::time::Duration;

use kameo::request::MessageSend;
use perf_lens::async_optimizer::BatchOptions;
use perf_lens::config::{load_config, PerfLensConfig};
use perf_lens::logging::{cleanup_old_logs, init_dual_logging, init_simple_logging, log_system_info};
use perf_lens::manager::{ManagerAsk, ManagerReply, ManagerTell, PerfManagerActor, Telemetry};
use tracing::{error, info, warn};

const CONFIG_PATH: &str = "config.toml";

/// Exercises every component for a couple of seconds so the report has content
async fn run_synthetic_workload(telemetry: &Telemetry) {
    let profiler = telemetry.profiler();
    let cache = telemetry.cache();
    let optimizer = telemetry.optimizer();

    if let Err(e) = profiler.start_profiling("startup", None) {
        warn!("⚠️ Could not start profiling session: {}", e);
    }

    for round in 0..12u64 {
        profiler
            .time("workload.parse", tokio::time::sleep(Duration::from_millis(5 + round % 3)))
            .await;

        {
            let _guard = profiler.guard("workload.lookup");
            let key = format!("user:{}", round % 4);
            let lookup = cache
                .get_or_compute(
                    &key,
                    || async move {
                        tokio::time::sleep(Duration::from_millis(60)).await;
                        Ok::<_, String>(serde_json::json!({ "id": round % 4, "name": format!("user-{}", round % 4) }))
                    },
                    Some(Duration::from_secs(30)),
                )
                .await;
            if let Err(e) = lookup {
                warn!("⚠️ Lookup failed: {}", e);
            }
        }
        profiler.detector().increment_operations_count();
    }

    let options = BatchOptions {
        delay: Duration::from_millis(20),
        max_batch_size: 8,
    };
    let pending: Vec<_> = (0..5u64)
        .map(|n| {
            optimizer.add_to_batch(
                "workload.square",
                n,
                |items: Vec<u64>| async move { Ok::<_, String>(items.iter().map(|n| n * n).collect::<Vec<u64>>()) },
                options,
            )
        })
        .collect();
    let squares: Vec<Vec<u64>> = futures::future::join_all(pending).await;
    info!(?squares, "📦 Batched results");

    let slow = optimizer
        .optimize_operation(async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok::<_, String>("done")
        })
        .await;
    info!(?slow, "⏱️ Optimized operation finished");

    tokio::time::sleep(Duration::from_millis(350)).await;
    if let Err(e) = profiler.add_marker("startup", "workload-complete") {
        warn!("⚠️ Could not add marker: {}", e);
    }
    if let Err(e) = profiler.stop_profiling("startup") {
        warn!("⚠️ Could not stop profiling session: {}", e);
    }
}

#[tokio::main]
async fn main() {
    let config = match load_config(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("⚠️ Failed to load {}: {}. Using default configuration", CONFIG_PATH, e);
            PerfLensConfig::default()
        }
    };

    let _logging_guard = match init_dual_logging(&config.logging.to_logging_config()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("❌ Failed to initialize logging: {}", e);
            if let Err(e) = init_simple_logging() {
                eprintln!("❌ Fallback logging unavailable: {}", e);
            }
            None
        }
    };

    if let Err(e) = cleanup_old_logs(&config.logging.log_dir, config.logging.cleanup_days) {
        warn!("⚠️ Failed to clean up old log files: {}", e);
    }
    log_system_info();

    let telemetry = match Telemetry::from_config(&config) {
        Ok(telemetry) => Arc::new(telemetry),
        Err(e) => {
            error!("❌ Failed to initialize telemetry: {}", e);
            return;
        }
    };

    let manager = kameo::spawn(PerfManagerActor::new(
        Arc::clone(&telemetry),
        config.manager.to_manager_config(),
    ));
    info!("🚀 perf_lens manager started");

    run_synthetic_workload(&telemetry).await;

    if let Err(e) = manager.tell(ManagerTell::PeriodicReport).send().await {
        warn!("⚠️ Failed to request periodic report: {}", e);
    }

    match manager.ask(ManagerAsk::GenerateReport).await {
        Ok(ManagerReply::Report(report)) => match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => error!("❌ Failed to serialize report: {}", e),
        },
        Ok(other) => warn!("⚠️ Unexpected manager reply: {:?}", other),
        Err(e) => error!("❌ Report request failed: {}", e),
    }

    if manager.stop_gracefully().await.is_err() {
        warn!("⚠️ Manager was already stopped");
    }
    manager.wait_for_stop().await;
    info!("👋 perf_lens finished");
}
