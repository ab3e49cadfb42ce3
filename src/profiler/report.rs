//! Destinations for session reports

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::info;

use super::errors::ProfilerError;
use super::session::SessionReport;

pub trait ReportSink: Send + Sync {
    fn publish(&self, report: &SessionReport) -> Result<(), ProfilerError>;
}

/// Writes a one-line summary to the log
#[derive(Debug, Default)]
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn publish(&self, report: &SessionReport) -> Result<(), ProfilerError> {
        info!(
            session = %report.session_id,
            duration_ms = report.duration_ms,
            samples = report.sample_count,
            avg_memory_bytes = report.average_memory_bytes,
            peak_memory_bytes = report.peak_memory_bytes,
            total_operations = report.total_operations,
            issues = report.issues.len(),
            recommendations = ?report.recommendations,
            "📋 Profiling session report"
        );
        Ok(())
    }
}

/// One pretty-printed JSON file per session under `dir`
#[derive(Debug, Clone)]
pub struct JsonFileReportSink {
    dir: PathBuf,
}

impl JsonFileReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, report: &SessionReport) -> PathBuf {
        let safe_id: String = report
            .session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir
            .join(format!("session-{}-{}.json", safe_id, report.started_at_ms))
    }
}

impl ReportSink for JsonFileReportSink {
    fn publish(&self, report: &SessionReport) -> Result<(), ProfilerError> {
        fs::create_dir_all(&self.dir).map_err(|e| ProfilerError::ReportSink(e.to_string()))?;
        let path = self.path_for(report);
        let json = serde_json::to_string_pretty(report).map_err(|e| ProfilerError::ReportSink(e.to_string()))?;
        fs::write(&path, json).map_err(|e| ProfilerError::ReportSink(e.to_string()))?;

        info!(session = %report.session_id, path = %path.display(), "📝 Session report written");
        Ok(())
    }
}

/// Keeps published reports in memory
#[derive(Debug, Default)]
pub struct CollectingReportSink {
    reports: Mutex<Vec<SessionReport>>,
}

impl CollectingReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<SessionReport> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ReportSink for CollectingReportSink {
    fn publish(&self, report: &SessionReport) -> Result<(), ProfilerError> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
        Ok(())
    }
}
