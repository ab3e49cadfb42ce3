//! Keyed request batching
//!
//! Items added under the same batch id are collected until either the delay elapses
//! or the batch reaches its size limit, then processed together. Batches of different
//! item/result types share one registry, so each is stored type-erased and recovered
//! by downcast.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::OptimizerInner;

pub type BatchProcessor<T, R> = Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, Result<Vec<R>, String>> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub delay: Duration,
    pub max_batch_size: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            max_batch_size: 50,
        }
    }
}

pub(crate) trait ErasedBatch: Send {
    fn generation(&self) -> u64;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn abort_timer(&mut self);
    /// Runs the processor and delivers results to every waiter
    fn flush(self: Box<Self>) -> BoxFuture<'static, ()>;
    /// Drops the batch; waiters resolve empty
    fn cancel(self: Box<Self>);
}

struct PendingBatch<T, R> {
    batch_id: String,
    generation: u64,
    items: Vec<T>,
    waiters: Vec<oneshot::Sender<Vec<R>>>,
    processor: BatchProcessor<T, R>,
    timer: Option<JoinHandle<()>>,
}

impl<T, R> ErasedBatch for PendingBatch<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn generation(&self) -> u64 {
        self.generation
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn abort_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn flush(self: Box<Self>) -> BoxFuture<'static, ()> {
        let PendingBatch {
            batch_id,
            items,
            waiters,
            processor,
            ..
        } = *self;

        async move {
            let size = items.len();
            debug!(batch = %batch_id, size, "📦 Processing batch");

            match processor(items).await {
                Ok(results) => {
                    if results.len() != size {
                        warn!(batch = %batch_id, items = size, results = results.len(), "⚠️ Batch result count mismatch");
                    }
                    let mut results = results.into_iter();
                    for waiter in waiters {
                        let _ = waiter.send(results.next().into_iter().collect());
                    }
                }
                Err(e) => {
                    // Dropping the senders resolves every waiter with an empty result
                    error!(batch = %batch_id, size, "❌ Batch processing failed: {}", e);
                }
            }
        }
        .boxed()
    }

    fn cancel(mut self: Box<Self>) {
        self.abort_timer();
        debug!(batch = %self.batch_id, pending = self.items.len(), "🛑 Batch cancelled");
    }
}

/// Registers `item` and returns the receiver for its positional result
pub(crate) fn enqueue<T, R>(
    inner: &Arc<OptimizerInner>,
    batch_id: &str,
    item: T,
    processor: BatchProcessor<T, R>,
    options: BatchOptions,
) -> oneshot::Receiver<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let mut batches = inner.batches.lock().unwrap_or_else(PoisonError::into_inner);

    if !batches.contains_key(batch_id) {
        let generation = inner.next_generation();
        let timer = spawn_flush_timer(Arc::downgrade(inner), batch_id.to_string(), generation, options.delay);
        let batch: PendingBatch<T, R> = PendingBatch {
            batch_id: batch_id.to_string(),
            generation,
            items: Vec::new(),
            waiters: Vec::new(),
            processor,
            timer: Some(timer),
        };
        batches.insert(batch_id.to_string(), Box::new(batch));
    }

    let full = match batches
        .get_mut(batch_id)
        .and_then(|batch| batch.as_any_mut().downcast_mut::<PendingBatch<T, R>>())
    {
        Some(batch) => {
            batch.items.push(item);
            batch.waiters.push(tx);
            batch.items.len() >= options.max_batch_size
        }
        None => {
            warn!(batch = %batch_id, "⚠️ Item type does not match the pending batch; resolving empty");
            return rx;
        }
    };

    if full {
        if let Some(mut batch) = batches.remove(batch_id) {
            drop(batches);
            batch.abort_timer();
            tokio::spawn(batch.flush());
        }
    }
    rx
}

fn spawn_flush_timer(inner: Weak<OptimizerInner>, batch_id: String, generation: u64, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };

        let batch = {
            let mut batches = inner.batches.lock().unwrap_or_else(PoisonError::into_inner);
            // A full batch may already have been flushed and replaced under the same id
            if batches.get(&batch_id).map(|b| b.generation()) == Some(generation) {
                batches.remove(&batch_id)
            } else {
                None
            }
        };
        drop(inner);

        if let Some(batch) = batch {
            batch.flush().await;
        }
    })
}
