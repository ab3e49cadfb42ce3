use thiserror::Error;

use crate::metrics_store::StoreError;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Metrics store error: {0}")]
    Store(#[from] StoreError),

    #[error("Report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
