//! TOML configuration
//!
//! Every section and key is optional; missing values fall back to the component
//! defaults. `load_config` returns the defaults when the file does not exist.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::async_optimizer::OptimizerConfig;
use crate::bottleneck::{DetectorConfig, Threshold};
use crate::caching::CacheConfig;
use crate::logging::{LogRotation, LoggingConfig};
use crate::manager::ManagerConfig;
use crate::profiler::{ProfilerConfig, SessionThresholds};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PerfLensConfig {
    pub profiler: ProfilerSection,
    pub bottleneck: BottleneckSection,
    pub cache: CacheSection,
    pub async_optimizer: OptimizerSection,
    pub manager: ManagerSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfilerSection {
    pub enabled: bool,
    pub persist_interval_secs: u64,
    pub session_sampling_interval_ms: u64,
    /// LMDB directory; history is kept in memory only when unset
    pub storage_path: Option<PathBuf>,
    /// Directory for session report JSON files; reports are logged when unset
    pub report_dir: Option<PathBuf>,
    pub max_execution_time_ms: f64,
    pub max_memory_usage_mb: u64,
    pub max_operations_count: u64,
}

impl Default for ProfilerSection {
    fn default() -> Self {
        let thresholds = SessionThresholds::default();
        Self {
            enabled: true,
            persist_interval_secs: 300,
            session_sampling_interval_ms: 100,
            storage_path: None,
            report_dir: None,
            max_execution_time_ms: thresholds.max_execution_time_ms,
            max_memory_usage_mb: thresholds.max_memory_usage_bytes / (1024 * 1024),
            max_operations_count: thresholds.max_operations_count,
        }
    }
}

impl ProfilerSection {
    pub fn to_profiler_config(&self) -> ProfilerConfig {
        ProfilerConfig {
            enabled: self.enabled,
            persist_interval: Duration::from_secs(self.persist_interval_secs),
            session_sampling_interval: Duration::from_millis(self.session_sampling_interval_ms),
            default_session_thresholds: SessionThresholds {
                max_execution_time_ms: self.max_execution_time_ms,
                max_memory_usage_bytes: self.max_memory_usage_mb * 1024 * 1024,
                max_operations_count: self.max_operations_count,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdEntry {
    /// Exact operation id or id prefix
    pub id: String,
    pub warning_ms: f64,
    pub critical_ms: f64,
    #[serde(default = "default_samples_required")]
    pub samples_required: usize,
}

fn default_samples_required() -> usize {
    Threshold::default().samples_required
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BottleneckSection {
    pub enabled: bool,
    pub thresholds: Vec<ThresholdEntry>,
}

impl Default for BottleneckSection {
    fn default() -> Self {
        Self {
            enabled: true,
            thresholds: Vec::new(),
        }
    }
}

impl BottleneckSection {
    pub fn to_detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            enabled: self.enabled,
            thresholds: self
                .thresholds
                .iter()
                .map(|t| {
                    (
                        t.id.clone(),
                        Threshold {
                            warning_ms: t.warning_ms,
                            critical_ms: t.critical_ms,
                            samples_required: t.samples_required,
                        },
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_size: usize,
    pub sweep_interval_secs: u64,
    pub default_ttl_ms: Option<u64>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_size: 1000,
            sweep_interval_secs: 300,
            default_ttl_ms: None,
        }
    }
}

impl CacheSection {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_size: self.max_size,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            default_ttl: self.default_ttl_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptimizerSection {
    pub timeout_ms: u64,
    pub batch_size: usize,
}

impl Default for OptimizerSection {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            batch_size: 10,
        }
    }
}

impl OptimizerSection {
    pub fn to_optimizer_config(&self) -> OptimizerConfig {
        OptimizerConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            batch_size: self.batch_size,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerSection {
    pub report_interval_secs: u64,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            report_interval_secs: 300,
        }
    }
}

impl ManagerSection {
    pub fn to_manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            report_interval: Duration::from_secs(self.report_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub log_dir: String,
    pub level_filter: String,
    /// "daily", "hourly" or "size:<MB>"
    pub rotation: String,
    pub console_timestamps: bool,
    pub file_json_format: bool,
    pub cleanup_days: u32,
}

impl Default for LoggingSection {
    fn default() -> Self {
        let defaults = LoggingConfig::default();
        Self {
            log_dir: defaults.log_dir,
            level_filter: defaults.level_filter,
            rotation: "daily".to_string(),
            console_timestamps: defaults.console_timestamps,
            file_json_format: defaults.file_json_format,
            cleanup_days: 30,
        }
    }
}

impl LoggingSection {
    pub fn to_logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            log_dir: self.log_dir.clone(),
            level_filter: self.level_filter.clone(),
            rotation: LogRotation::parse(&self.rotation),
            console_timestamps: self.console_timestamps,
            file_json_format: self.file_json_format,
        }
    }
}

impl PerfLensConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.async_optimizer.batch_size == 0 {
            return Err(ConfigError::Invalid("async_optimizer.batch_size must be at least 1".to_string()));
        }
        if self.async_optimizer.timeout_ms == 0 {
            return Err(ConfigError::Invalid("async_optimizer.timeout_ms must be positive".to_string()));
        }
        if self.profiler.session_sampling_interval_ms == 0 || self.profiler.persist_interval_secs == 0 {
            return Err(ConfigError::Invalid("profiler intervals must be positive".to_string()));
        }
        if self.cache.sweep_interval_secs == 0 || self.manager.report_interval_secs == 0 {
            return Err(ConfigError::Invalid("cache and manager intervals must be positive".to_string()));
        }
        for threshold in &self.bottleneck.thresholds {
            if threshold.warning_ms > threshold.critical_ms {
                return Err(ConfigError::Invalid(format!(
                    "threshold '{}': warning_ms ({}) exceeds critical_ms ({})",
                    threshold.id, threshold.warning_ms, threshold.critical_ms
                )));
            }
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PerfLensConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        info!(path = %path.display(), "⚙️ Config file not found, using defaults");
        return Ok(PerfLensConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = PerfLensConfig::from_toml_str(&content)?;
    info!(path = %path.display(), "⚙️ Configuration loaded");
    Ok(config)
}
