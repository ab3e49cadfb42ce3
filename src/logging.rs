//! Console + rolling file logging
//!
//! The console gets human-readable output; the file gets JSON (or plain text) lines
//! rotated by `tracing-appender`. Both layers share the same `EnvFilter` directive,
//! which `RUST_LOG` overrides.

use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Prefix of every log file written by this crate
pub const LOG_FILE_PREFIX: &str = "perf_lens";

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to prepare log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: String,
    /// `EnvFilter` directive, e.g. "info,perf_lens=debug"
    pub level_filter: String,
    pub rotation: LogRotation,
    pub console_timestamps: bool,
    pub file_json_format: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRotation {
    Daily,
    Hourly,
    /// Accepted for configuration compatibility; rotates daily
    SizeBased(u64),
}

impl LogRotation {
    /// Parses "daily", "hourly" or "size:<MB>"; anything else is daily
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "hourly" => LogRotation::Hourly,
            s if s.starts_with("size:") => {
                let mb = s.trim_start_matches("size:").parse().unwrap_or(100);
                LogRotation::SizeBased(mb)
            }
            _ => LogRotation::Daily,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            level_filter: "info,perf_lens=info".to_string(),
            rotation: LogRotation::Daily,
            console_timestamps: true,
            file_json_format: true,
        }
    }
}

fn env_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
}

/// Installs the global subscriber. Keep the returned guard alive for as long as
/// file output is wanted; dropping it flushes and stops the writer thread.
pub fn init_dual_logging(config: &LoggingConfig) -> Result<WorkerGuard, LoggingError> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_name = format!("{}.log", LOG_FILE_PREFIX);
    let appender = match config.rotation {
        LogRotation::Hourly => tracing_appender::rolling::hourly(&config.log_dir, &file_name),
        LogRotation::Daily | LogRotation::SizeBased(_) => tracing_appender::rolling::daily(&config.log_dir, &file_name),
    };
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let console_timer = if config.console_timestamps {
        ChronoUtc::new("%Y-%m-%d %H:%M:%S%.3f UTC".to_string())
    } else {
        ChronoUtc::new(String::new())
    };
    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_timer(console_timer)
        .with_filter(env_filter(&config.level_filter));

    let file_layer = if config.file_json_format {
        fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_thread_names(true)
            .with_timer(ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.3fZ".to_string()))
            .with_filter(env_filter(&config.level_filter))
            .boxed()
    } else {
        fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_thread_names(true)
            .with_timer(ChronoUtc::new("%Y-%m-%d %H:%M:%S%.3f UTC".to_string()))
            .with_filter(env_filter(&config.level_filter))
            .boxed()
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    tracing::info!(
        log_dir = %config.log_dir,
        rotation = ?config.rotation,
        json = config.file_json_format,
        "📁 Logging initialized (console + rolling file)"
    );
    Ok(guard)
}

/// Console-only logging for tools and tests
pub fn init_simple_logging() -> Result<(), LoggingError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter("info,perf_lens=info"))
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))
}

fn is_log_file(path: &std::path::Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX) && name.contains(".log"))
}

/// Log files written by this crate in `log_dir`, sorted by name
pub fn get_current_log_files(log_dir: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(log_dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| is_log_file(path))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// Removes log files last modified more than `keep_days` ago
pub fn cleanup_old_logs(log_dir: &str, keep_days: u32) -> Result<usize, std::io::Error> {
    let cutoff = std::time::SystemTime::now() - std::time::Duration::from_secs(u64::from(keep_days) * 24 * 3600);
    let mut removed = 0;

    for path in get_current_log_files(log_dir) {
        let modified = path.metadata()?.modified()?;
        if modified < cutoff {
            std::fs::remove_file(&path)?;
            tracing::debug!(path = %path.display(), "🗑️ Removed old log file");
            removed += 1;
        }
    }

    if removed > 0 {
        tracing::info!(removed, keep_days, "🧹 Old log files cleaned up");
    }
    Ok(removed)
}

pub fn log_system_info() {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        os = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        cpus = num_cpus::get(),
        total_memory_mb = system.total_memory() / (1024 * 1024),
        "🖥️ Host information"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotation_parsing() {
        assert_eq!(LogRotation::parse("hourly"), LogRotation::Hourly);
        assert_eq!(LogRotation::parse("Daily"), LogRotation::Daily);
        assert_eq!(LogRotation::parse("size:25"), LogRotation::SizeBased(25));
        assert_eq!(LogRotation::parse("size:lots"), LogRotation::SizeBased(100));
        assert_eq!(LogRotation::parse("weekly"), LogRotation::Daily);
    }

    #[test]
    fn test_log_file_listing_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path();
        std::fs::write(path.join("perf_lens.log.2026-01-02"), "b").unwrap();
        std::fs::write(path.join("perf_lens.log.2026-01-01"), "a").unwrap();
        std::fs::write(path.join("other.log"), "x").unwrap();

        let log_dir = path.to_str().unwrap();
        let files = get_current_log_files(log_dir);
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("perf_lens.log.2026-01-01"));

        // Freshly written files are younger than any retention window
        assert_eq!(cleanup_old_logs(log_dir, 1).unwrap(), 0);
        assert_eq!(get_current_log_files(log_dir).len(), 2);
    }

    #[test]
    fn test_missing_dir_lists_nothing() {
        assert!(get_current_log_files("/nonexistent/perf_lens/logs").is_empty());
    }
}
