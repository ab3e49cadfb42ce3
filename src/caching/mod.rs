//! In-memory cache with TTL expiry and recency/frequency eviction
//!
//! Entries are evicted lazily on `get`, eagerly by the background sweep, and by
//! capacity pressure. Capacity eviction ranks entries by
//! `last_accessed + access_count * 1000ms` and removes the lowest scores first.

pub mod size;

pub use size::{estimate_size, should_cache};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Computations slower than this are logged
pub const SLOW_COMPUTE_MS: u128 = 1000;
/// Recency boost granted per recorded access when ranking entries for eviction
pub const ACCESS_WEIGHT_MS: u128 = 1000;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_size: usize,
    pub sweep_interval: Duration,
    /// Applied when a call does not pass its own TTL
    pub default_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            sweep_interval: Duration::from_secs(300),
            default_ttl: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub max_size: usize,
    pub memory_usage_bytes: usize,
    pub hit_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntryInfo {
    pub key: String,
    pub age_ms: u64,
    pub idle_ms: u64,
    pub access_count: u64,
    pub size_bytes: usize,
    pub expires_in_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub memory_usage_bytes: usize,
    pub entries: Vec<CacheEntryInfo>,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created: Instant,
    last_accessed: Instant,
    expires_at: Option<Instant>,
    access_count: u64,
    size_bytes: usize,
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn score(&self, base: Instant) -> u128 {
        self.last_accessed.duration_since(base).as_millis() + self.access_count as u128 * ACCESS_WEIGHT_MS
    }
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    max_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    next_seq: u64,
}

pub struct CachingService<V> {
    inner: Mutex<CacheInner<V>>,
    config: CacheConfig,
    /// Origin of the eviction score timeline
    base: Instant,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V> CachingService<V>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                max_size: config.max_size,
                hits: 0,
                misses: 0,
                evictions: 0,
                next_seq: 0,
            }),
            config,
            base: Instant::now(),
            sweeper: Mutex::new(None),
        }
    }

    fn inner(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.inner();
        let inner = &mut *guard;

        let expired = match inner.entries.get_mut(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.last_accessed = now;
                entry.access_count += 1;
                let value = entry.value.clone();
                inner.hits += 1;
                return Some(value);
            }
        };

        if expired {
            inner.entries.remove(key);
            inner.misses += 1;
            inner.evictions += 1;
            debug!(key = %key, "⌛ Cache entry expired");
        }
        None
    }

    /// True for a live entry; does not touch access bookkeeping or counters
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner().entries.get(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Inserts or overwrites; `ttl` falls back to the configured default
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let now = Instant::now();
        let size_bytes = estimate_size(&value);
        let ttl = ttl.or(self.config.default_ttl);

        let mut inner = self.inner();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                created: now,
                last_accessed: now,
                expires_at: ttl.map(|ttl| now + ttl),
                access_count: 0,
                size_bytes,
                seq,
            },
        );
        self.enforce_max_size(&mut inner);
    }

    /// Returns the cached value or computes, stores and returns it.
    ///
    /// A failing computation is logged and its error returned; nothing is cached.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &str, compute: F, ttl: Option<Duration>) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Display,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let started = Instant::now();
        let result = compute().await;
        let elapsed = started.elapsed();

        if elapsed.as_millis() > SLOW_COMPUTE_MS {
            warn!(key = %key, elapsed_ms = elapsed.as_millis() as u64, "🐢 Slow cache computation");
        }

        match result {
            Ok(value) => {
                self.set(key, value.clone(), ttl);
                Ok(value)
            }
            Err(e) => {
                error!(key = %key, "❌ Cache computation failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.inner().entries.remove(key).is_some()
    }

    pub fn clear_all(&self) {
        self.inner().entries.clear();
        info!("🧹 Cache cleared");
    }

    pub fn set_max_size(&self, max_size: usize) {
        let mut inner = self.inner();
        inner.max_size = max_size;
        self.enforce_max_size(&mut inner);
        info!(max_size, "📦 Cache max size updated");
    }

    fn enforce_max_size(&self, inner: &mut CacheInner<V>) {
        if inner.entries.len() <= inner.max_size {
            return;
        }
        let excess = inner.entries.len() - inner.max_size;

        let mut ranked: Vec<(u128, u64, String)> = inner
            .entries
            .iter()
            .map(|(key, entry)| (entry.score(self.base), entry.seq, key.clone()))
            .collect();
        ranked.sort_unstable();

        for (_, _, key) in ranked.into_iter().take(excess) {
            inner.entries.remove(&key);
            inner.evictions += 1;
            debug!(key = %key, "🗑️ Cache entry evicted");
        }
    }

    /// Removes every expired entry and returns how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();
        inner.evictions += removed as u64;

        if removed > 0 {
            debug!(removed, "🧹 Expired cache entries swept");
        }
        removed
    }

    /// Spawns the periodic expiry sweep; replaces any previous one
    pub fn start_sweeper(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                cache.sweep_expired();
            }
        });

        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    pub fn get_metrics(&self) -> CacheMetrics {
        let inner = self.inner();
        let lookups = inner.hits + inner.misses;
        CacheMetrics {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            size: inner.entries.len(),
            max_size: inner.max_size,
            memory_usage_bytes: inner.entries.values().map(|e| e.size_bytes).sum(),
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        let now = Instant::now();
        let inner = self.inner();
        let mut entries: Vec<CacheEntryInfo> = inner
            .entries
            .iter()
            .map(|(key, entry)| CacheEntryInfo {
                key: key.clone(),
                age_ms: now.duration_since(entry.created).as_millis() as u64,
                idle_ms: now.duration_since(entry.last_accessed).as_millis() as u64,
                access_count: entry.access_count,
                size_bytes: entry.size_bytes,
                expires_in_ms: entry
                    .expires_at
                    .map(|at| at.saturating_duration_since(now).as_millis() as u64),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            size: inner.entries.len(),
            max_size: inner.max_size,
            memory_usage_bytes: entries.iter().map(|e| e.size_bytes).sum(),
            entries,
        }
    }

    pub fn reset_stats(&self) {
        let mut inner = self.inner();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
    }

    /// Stops the sweep and drops every entry
    pub fn dispose(&self) {
        if let Some(task) = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
        self.inner().entries.clear();
        debug!("🛑 Cache disposed");
    }
}
