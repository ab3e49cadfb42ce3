use std::collections::HashMap;
use std::path::Path;

use heed::types::{SerdeBincode, Str};
use heed::{Database, Env, EnvOpenOptions};
use tracing::{debug, info};

use super::{MetricsSnapshot, MetricsStore, StoreError};
use crate::profiler::structs::{ResourceDelta, TrendPoint};

pub const LMDB_MAP_SIZE: usize = 256 * 1024 * 1024; // 256MB
pub const LMDB_MAX_DBS: u32 = 8;
pub const LMDB_MAX_READERS: u32 = 126;

const TIMINGS_DB_NAME: &str = "operation_timings";
const TRENDS_DB_NAME: &str = "operation_trends";
const RESOURCES_DB_NAME: &str = "resource_usage";
const META_DB_NAME: &str = "meta";
const LAST_UPDATED_KEY: &str = "last_updated";

/// LMDB-backed metrics store, one database per history kind keyed by operation id
pub struct LmdbMetricsStore {
    env: Env,
    timings_db: Database<Str, SerdeBincode<Vec<f64>>>,
    trends_db: Database<Str, SerdeBincode<Vec<TrendPoint>>>,
    resources_db: Database<Str, SerdeBincode<Vec<ResourceDelta>>>,
    meta_db: Database<Str, SerdeBincode<i64>>,
}

impl LmdbMetricsStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path)?;

        // SAFETY: the environment is opened once per store and never from two
        // places with different options
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(LMDB_MAP_SIZE)
                .max_dbs(LMDB_MAX_DBS)
                .max_readers(LMDB_MAX_READERS)
                .open(path)
        }
        .map_err(|e| StoreError::DatabaseInitialization(format!("Failed to open LMDB environment at {}: {}", path.display(), e)))?;

        let mut wtxn = env.write_txn()?;
        let timings_db = env.create_database(&mut wtxn, Some(TIMINGS_DB_NAME))?;
        let trends_db = env.create_database(&mut wtxn, Some(TRENDS_DB_NAME))?;
        let resources_db = env.create_database(&mut wtxn, Some(RESOURCES_DB_NAME))?;
        let meta_db = env.create_database(&mut wtxn, Some(META_DB_NAME))?;
        wtxn.commit()?;

        info!("✅ Opened metrics store at {}", path.display());

        Ok(Self {
            env,
            timings_db,
            trends_db,
            resources_db,
            meta_db,
        })
    }
}

impl MetricsStore for LmdbMetricsStore {
    fn load(&self) -> Result<MetricsSnapshot, StoreError> {
        let rtxn = self.env.read_txn()?;

        let mut operation_timings = HashMap::new();
        for entry in self.timings_db.iter(&rtxn)? {
            let (id, durations) = entry?;
            operation_timings.insert(id.to_string(), durations);
        }

        let mut operation_trends = HashMap::new();
        for entry in self.trends_db.iter(&rtxn)? {
            let (id, points) = entry?;
            operation_trends.insert(id.to_string(), points);
        }

        let mut resource_usage = HashMap::new();
        for entry in self.resources_db.iter(&rtxn)? {
            let (id, deltas) = entry?;
            resource_usage.insert(id.to_string(), deltas);
        }

        let last_updated = self.meta_db.get(&rtxn, LAST_UPDATED_KEY)?.unwrap_or(0);

        debug!(
            operations = operation_timings.len(),
            last_updated,
            "📂 Loaded stored metrics"
        );

        Ok(MetricsSnapshot {
            operation_timings,
            operation_trends,
            resource_usage,
            last_updated,
        })
    }

    fn save(&self, snapshot: &MetricsSnapshot) -> Result<(), StoreError> {
        let retained = snapshot.retained(chrono::Utc::now().timestamp_millis());
        let mut wtxn = self.env.write_txn()?;

        self.timings_db.clear(&mut wtxn)?;
        self.trends_db.clear(&mut wtxn)?;
        self.resources_db.clear(&mut wtxn)?;

        for (id, durations) in &retained.operation_timings {
            self.timings_db.put(&mut wtxn, id, durations)?;
        }
        for (id, points) in &retained.operation_trends {
            self.trends_db.put(&mut wtxn, id, points)?;
        }
        for (id, deltas) in &retained.resource_usage {
            self.resources_db.put(&mut wtxn, id, deltas)?;
        }
        self.meta_db.put(&mut wtxn, LAST_UPDATED_KEY, &retained.last_updated)?;

        wtxn.commit()?;
        debug!(operations = retained.operation_timings.len(), "💾 Saved metrics snapshot");
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn()?;
        self.timings_db.clear(&mut wtxn)?;
        self.trends_db.clear(&mut wtxn)?;
        self.resources_db.clear(&mut wtxn)?;
        self.meta_db.clear(&mut wtxn)?;
        wtxn.commit()?;
        info!("🗑️ Cleared stored metrics");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_snapshot() -> MetricsSnapshot {
        let now = chrono::Utc::now().timestamp_millis();
        let mut snapshot = MetricsSnapshot {
            last_updated: now,
            ..Default::default()
        };
        snapshot.operation_timings.insert("file.read".to_string(), vec![12.0, 15.5]);
        snapshot.operation_trends.insert(
            "file.read".to_string(),
            vec![
                TrendPoint { timestamp_ms: now - 20, duration_ms: 12.0 },
                TrendPoint { timestamp_ms: now - 10, duration_ms: 15.5 },
            ],
        );
        snapshot.resource_usage.insert("file.read".to_string(), vec![ResourceDelta::default(); 2]);
        snapshot
    }

    #[test]
    fn test_empty_store_loads_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let store = LmdbMetricsStore::open(&temp_dir.path().join("metrics")).unwrap();

        let snapshot = store.load().unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.last_updated, 0);
    }

    #[test]
    fn test_save_load_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = LmdbMetricsStore::open(temp_dir.path()).unwrap();
        let snapshot = sample_snapshot();

        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), snapshot);

        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let store = LmdbMetricsStore::open(temp_dir.path()).unwrap();

        store.save(&sample_snapshot()).unwrap();

        let mut replacement = MetricsSnapshot::default();
        replacement.operation_timings.insert("api.request".to_string(), vec![40.0]);
        store.save(&replacement).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.operation_timings.len(), 1);
        assert!(loaded.operation_timings.contains_key("api.request"));
        assert!(loaded.operation_trends.is_empty());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = LmdbMetricsStore::open(temp_dir.path()).unwrap();
            store.save(&sample_snapshot()).unwrap();
        }

        let store = LmdbMetricsStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.load().unwrap().operation_timings["file.read"], vec![12.0, 15.5]);
    }
}
