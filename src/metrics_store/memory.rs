use std::sync::{Mutex, PoisonError};

use super::{MetricsSnapshot, MetricsStore, StoreError};

/// In-process store, useful for tests and hosts that do not persist
#[derive(Debug, Default)]
pub struct MemoryMetricsStore {
    snapshot: Mutex<Option<MetricsSnapshot>>,
}

impl MemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last snapshot written, if any
    pub fn stored(&self) -> Option<MetricsSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl MetricsStore for MemoryMetricsStore {
    fn load(&self) -> Result<MetricsSnapshot, StoreError> {
        Ok(self.stored().unwrap_or_default())
    }

    fn save(&self, snapshot: &MetricsSnapshot) -> Result<(), StoreError> {
        let retained = snapshot.retained(chrono::Utc::now().timestamp_millis());
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(retained);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
