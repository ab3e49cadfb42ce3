use thiserror::Error;

use crate::metrics_store::StoreError;

#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Profiling session '{0}' is already active")]
    SessionAlreadyActive(String),

    #[error("Profiling session '{0}' not found")]
    SessionNotFound(String),

    #[error("Metrics store error: {0}")]
    Store(#[from] StoreError),

    #[error("Report sink error: {0}")]
    ReportSink(String),
}
