//! Async call shaping: batching, throttling, debouncing and timeout-bounded execution
//!
//! `AsyncOptimizer` is a cheap handle over shared state; clones share batches,
//! timers and statistics.

pub mod batch;
pub mod errors;
pub mod timing;

pub use batch::{BatchOptions, BatchProcessor};
pub use errors::OptimizerError;
pub use timing::{Debounced, Throttled, DEFAULT_DEBOUNCE_WAIT, DEFAULT_THROTTLE_LIMIT};

use futures::future::try_join_all;
use futures::{FutureExt, TryFutureExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use batch::ErasedBatch;
use timing::{KeyedTimers, ThrottleState};

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub timeout: Duration,
    pub batch_size: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            batch_size: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerStats {
    pub total_operations: u64,
    pub average_response_time_ms: f64,
    /// Percentage of operations that completed successfully
    pub success_rate: f64,
    pub timeouts: u64,
}

impl OptimizerStats {
    /// The success count is reconstructed from the stored percentage, not kept exactly
    fn record(&mut self, elapsed_ms: f64, success: bool) {
        let previous = self.total_operations as f64;
        self.total_operations += 1;
        let total = self.total_operations as f64;

        self.average_response_time_ms = (self.average_response_time_ms * previous + elapsed_ms) / total;
        let previous_successes = self.success_rate / 100.0 * previous;
        let successes = previous_successes + if success { 1.0 } else { 0.0 };
        self.success_rate = successes / total * 100.0;
    }
}

pub(crate) struct OptimizerInner {
    config: OptimizerConfig,
    generation: AtomicU64,
    batches: Mutex<HashMap<String, Box<dyn ErasedBatch>>>,
    throttle: Mutex<ThrottleState>,
    debounce_timers: Mutex<KeyedTimers>,
    stats: Mutex<OptimizerStats>,
}

impl OptimizerInner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct AsyncOptimizer {
    inner: Arc<OptimizerInner>,
}

impl AsyncOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            inner: Arc::new(OptimizerInner {
                config,
                generation: AtomicU64::new(0),
                batches: Mutex::new(HashMap::new()),
                throttle: Mutex::new(ThrottleState::default()),
                debounce_timers: Mutex::new(HashMap::new()),
                stats: Mutex::new(OptimizerStats::default()),
            }),
        }
    }

    /// Adds `item` to the batch `batch_id` and resolves with this item's result.
    ///
    /// The item is registered when this is called. The first caller's `process`
    /// handles the whole batch. Failed or cancelled batches resolve empty.
    pub fn add_to_batch<T, R, F, Fut, E>(
        &self,
        batch_id: &str,
        item: T,
        process: F,
        options: BatchOptions,
    ) -> impl Future<Output = Vec<R>> + Send + 'static
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<R>, E>> + Send + 'static,
        E: Display + 'static,
    {
        let processor: BatchProcessor<T, R> = Arc::new(move |items| process(items).map_err(|e| e.to_string()).boxed());
        let rx = batch::enqueue(&self.inner, batch_id, item, processor, options);
        async move { rx.await.unwrap_or_default() }
    }

    pub fn throttle<A, T, F, Fut>(&self, key: &str, f: F, limit: Duration) -> Throttled<A, T>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Throttled::new(
            Arc::clone(&self.inner),
            key.to_string(),
            limit,
            Arc::new(move |arg| f(arg).boxed()),
        )
    }

    pub fn debounce<A, T, F, Fut>(&self, key: &str, f: F, wait: Duration) -> Debounced<A, T>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Debounced::new(
            Arc::clone(&self.inner),
            key.to_string(),
            wait,
            Arc::new(move |arg| f(arg).boxed()),
        )
    }

    /// Runs `operation` with the configured timeout.
    ///
    /// The operation runs on its own task. On timeout that task is detached, not
    /// aborted: it runs to completion and its result is discarded.
    pub async fn optimize_operation<Fut, T, E>(&self, operation: Fut) -> Result<T, OptimizerError>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let timeout = self.inner.config.timeout;
        let started = Instant::now();
        let handle = tokio::spawn(operation);

        let result = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(OptimizerError::Operation(e.to_string())),
            Ok(Err(join_error)) => Err(OptimizerError::Aborted(join_error.to_string())),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "⏰ Operation timed out; result will be discarded");
                Err(OptimizerError::Timeout(timeout))
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        {
            let mut stats = self.inner.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.record(elapsed_ms, result.is_ok());
            if matches!(result, Err(OptimizerError::Timeout(_))) {
                stats.timeouts += 1;
            }
        }
        result
    }

    /// Runs operations in chunks of `batch_size`, each chunk concurrently, keeping input order.
    /// The first failure in a chunk fails the whole call.
    pub async fn optimize_batch<Op, Fut, T, E>(&self, operations: Vec<Op>) -> Result<Vec<T>, OptimizerError>
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let chunk_size = self.inner.config.batch_size.max(1);
        let mut results = Vec::with_capacity(operations.len());
        let mut remaining = operations.into_iter();

        loop {
            let chunk: Vec<Op> = remaining.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            debug!(size = chunk.len(), "📦 Running operation chunk");
            let outputs = try_join_all(chunk.into_iter().map(|op| self.optimize_operation(op()))).await?;
            results.extend(outputs);
        }
        Ok(results)
    }

    pub fn get_stats(&self) -> OptimizerStats {
        *self.inner.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending_batches(&self) -> usize {
        self.inner.batches.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Cancels pending batches (their callers resolve empty) and every throttle/debounce timer
    pub fn dispose(&self) {
        let batches: Vec<Box<dyn ErasedBatch>> = self
            .inner
            .batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, batch)| batch)
            .collect();
        let cancelled = batches.len();
        for batch in batches {
            batch.cancel();
        }

        self.inner.throttle.lock().unwrap_or_else(PoisonError::into_inner).clear();
        timing::clear_timers(&mut self.inner.debounce_timers.lock().unwrap_or_else(PoisonError::into_inner));
        info!(cancelled_batches = cancelled, "🛑 Async optimizer disposed");
    }
}

impl Default for AsyncOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn optimizer() -> AsyncOptimizer {
        AsyncOptimizer::default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_coalesces_items() {
        let optimizer = optimizer();
        let calls = Arc::new(Mutex::new(Vec::<Vec<u32>>::new()));

        let process = {
            let calls = Arc::clone(&calls);
            move |items: Vec<u32>| {
                calls.lock().unwrap().push(items.clone());
                async move { Ok::<_, String>(items.into_iter().map(|i| i * 10).collect::<Vec<u32>>()) }
            }
        };

        let first = optimizer.add_to_batch("b", 1u32, process.clone(), BatchOptions::default());
        let second = optimizer.add_to_batch("b", 2u32, process, BatchOptions::default());
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first, vec![10]);
        assert_eq!(second, vec![20]);
        assert_eq!(*calls.lock().unwrap(), vec![vec![1, 2]]);
        assert_eq!(optimizer.pending_batches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_flushes_at_max_size() {
        let optimizer = optimizer();
        let options = BatchOptions {
            delay: Duration::from_secs(60),
            max_batch_size: 2,
        };
        let process = |items: Vec<u32>| async move { Ok::<_, String>(items) };

        let started = Instant::now();
        let a = optimizer.add_to_batch("b", 1u32, process, options);
        let b = optimizer.add_to_batch("b", 2u32, process, options);
        let c = optimizer.add_to_batch("b", 3u32, process, options);
        assert_eq!(optimizer.pending_batches(), 1);

        let (a, b) = tokio::join!(a, b);
        assert_eq!((a, b), (vec![1], vec![2]));
        assert!(started.elapsed() < Duration::from_secs(1));

        // The third item opened a new batch that waits for its own timer
        assert_eq!(c.await, vec![3]);
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_failure_resolves_empty() {
        let optimizer = optimizer();
        let process = |_items: Vec<u32>| async { Err::<Vec<u32>, _>("boom") };

        let a = optimizer.add_to_batch("b", 1u32, process, BatchOptions::default());
        let b = optimizer.add_to_batch("b", 2u32, process, BatchOptions::default());
        let (a, b) = tokio::join!(a, b);
        assert!(a.is_empty());
        assert!(b.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_runs_last_call_once() {
        let optimizer = optimizer();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let debounced = {
            let calls = Arc::clone(&calls);
            optimizer.debounce(
                "search",
                move |query: &'static str| {
                    calls.lock().unwrap().push(query);
                    async move { query.len() }
                },
                DEFAULT_DEBOUNCE_WAIT,
            )
        };

        let a = debounced.call("r");
        tokio::time::advance(Duration::from_millis(100)).await;
        let b = debounced.call("ru");
        tokio::time::advance(Duration::from_millis(100)).await;
        let c = debounced.call("rust");

        let (a, b, c) = tokio::join!(a, b, c);
        assert_eq!((a, b, c), (None, None, Some(4)));
        assert_eq!(*calls.lock().unwrap(), vec!["rust"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_runs_first_and_latest_deferred() {
        let optimizer = optimizer();
        let runs = Arc::new(AtomicUsize::new(0));
        let throttled = {
            let runs = Arc::clone(&runs);
            optimizer.throttle(
                "save",
                move |n: u32| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    async move { n }
                },
                DEFAULT_THROTTLE_LIMIT,
            )
        };

        let started = Instant::now();
        assert_eq!(throttled.call(1).await, Some(1));

        let second = throttled.call(2);
        let third = throttled.call(3);
        let (second, third) = tokio::join!(second, third);

        assert_eq!(second, None);
        assert_eq!(third, Some(3));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= DEFAULT_THROTTLE_LIMIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimize_operation_timeout_and_stats() {
        let optimizer = AsyncOptimizer::new(OptimizerConfig {
            timeout: Duration::from_millis(100),
            batch_size: 10,
        });

        let ok = optimizer
            .optimize_operation(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, String>("done")
            })
            .await;
        assert_eq!(ok, Ok("done"));

        let slow = optimizer
            .optimize_operation(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, String>("late")
            })
            .await;
        assert_eq!(slow, Err(OptimizerError::Timeout(Duration::from_millis(100))));

        let failed = optimizer.optimize_operation(async { Err::<(), _>("bad input") }).await;
        assert_eq!(failed, Err(OptimizerError::Operation("bad input".to_string())));

        let stats = optimizer.get_stats();
        assert_eq!(stats.total_operations, 3);
        assert_eq!(stats.timeouts, 1);
        assert!((stats.success_rate - 100.0 / 3.0).abs() < 1e-9);
        assert!(stats.average_response_time_ms > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimize_batch_preserves_order() {
        let optimizer = AsyncOptimizer::new(OptimizerConfig {
            timeout: Duration::from_secs(1),
            batch_size: 2,
        });

        let operations: Vec<_> = [30u64, 10, 20, 5, 1]
            .into_iter()
            .map(|ms| {
                move || async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok::<_, String>(ms)
                }
            })
            .collect();

        let results = optimizer.optimize_batch(operations).await.unwrap();
        assert_eq!(results, vec![30, 10, 20, 5, 1]);
        assert_eq!(optimizer.get_stats().total_operations, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_pending_work() {
        let optimizer = optimizer();
        let process = |items: Vec<u32>| async move { Ok::<_, String>(items) };
        let pending = optimizer.add_to_batch("b", 1u32, process, BatchOptions::default());

        let debounced = optimizer.debounce("k", |n: u32| async move { n }, DEFAULT_DEBOUNCE_WAIT);
        let call = debounced.call(1);

        optimizer.dispose();
        assert_eq!(optimizer.pending_batches(), 0);
        assert!(pending.await.is_empty());
        assert_eq!(call.await, None);
    }
}
