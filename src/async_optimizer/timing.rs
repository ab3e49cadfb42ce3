//! Keyed throttle and debounce wrappers
//!
//! Both register a call synchronously when `call` is invoked, so call order is the
//! order in which `call` was made, not the order in which the returned futures are
//! polled. A call that is superseded before it runs resolves to `None`.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::OptimizerInner;

pub const DEFAULT_THROTTLE_LIMIT: Duration = Duration::from_millis(1000);
pub const DEFAULT_DEBOUNCE_WAIT: Duration = Duration::from_millis(300);

pub(crate) type WrappedFn<A, T> = Arc<dyn Fn(A) -> BoxFuture<'static, T> + Send + Sync>;

/// Pending timer per key, tagged with the generation that scheduled it
pub(crate) type KeyedTimers = HashMap<String, (u64, JoinHandle<()>)>;

#[derive(Default)]
pub(crate) struct ThrottleState {
    pub last_run: HashMap<String, Instant>,
    pub timers: KeyedTimers,
}

pub(crate) fn clear_timers(timers: &mut KeyedTimers) {
    for (_, (_, timer)) in timers.drain() {
        timer.abort();
    }
}

impl ThrottleState {
    pub fn clear(&mut self) {
        clear_timers(&mut self.timers);
        self.last_run.clear();
    }
}

/// Removes the timer entry if it still belongs to `generation`
fn claim(timers: &mut KeyedTimers, key: &str, generation: u64) -> bool {
    if timers.get(key).map(|(g, _)| *g) == Some(generation) {
        timers.remove(key);
        true
    } else {
        false
    }
}

/// Runs at most once per `limit`; calls inside the window collapse to the latest one,
/// which fires at the window boundary.
pub struct Throttled<A, T> {
    inner: Arc<OptimizerInner>,
    key: String,
    limit: Duration,
    f: WrappedFn<A, T>,
}

impl<A, T> Clone for Throttled<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            key: self.key.clone(),
            limit: self.limit,
            f: Arc::clone(&self.f),
        }
    }
}

impl<A, T> Throttled<A, T>
where
    A: Send + 'static,
    T: Send + 'static,
{
    pub(crate) fn new(inner: Arc<OptimizerInner>, key: String, limit: Duration, f: WrappedFn<A, T>) -> Self {
        Self { inner, key, limit, f }
    }

    pub fn call(&self, arg: A) -> BoxFuture<'static, Option<T>> {
        let now = Instant::now();
        let mut state = self.inner.throttle.lock().unwrap_or_else(PoisonError::into_inner);

        let elapsed = state.last_run.get(&self.key).map(|last| now.duration_since(*last));
        match elapsed {
            Some(elapsed) if elapsed < self.limit => {
                let generation = self.inner.next_generation();
                let (tx, rx) = oneshot::channel();
                let inner = Arc::clone(&self.inner);
                let key = self.key.clone();
                let f = Arc::clone(&self.f);
                let delay = self.limit - elapsed;

                let timer = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    {
                        let mut state = inner.throttle.lock().unwrap_or_else(PoisonError::into_inner);
                        if !claim(&mut state.timers, &key, generation) {
                            return;
                        }
                        state.last_run.insert(key, Instant::now());
                    }
                    let _ = tx.send(f(arg).await);
                });

                if let Some((_, previous)) = state.timers.insert(self.key.clone(), (generation, timer)) {
                    previous.abort();
                    debug!(key = %self.key, "⏳ Deferred throttled call superseded");
                }
                async move { rx.await.ok() }.boxed()
            }
            _ => {
                state.last_run.insert(self.key.clone(), now);
                drop(state);
                let fut = (self.f)(arg);
                async move { Some(fut.await) }.boxed()
            }
        }
    }
}

/// Trailing debounce: each call restarts the wait; only the last call in a quiet
/// period runs.
pub struct Debounced<A, T> {
    inner: Arc<OptimizerInner>,
    key: String,
    wait: Duration,
    f: WrappedFn<A, T>,
}

impl<A, T> Clone for Debounced<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            key: self.key.clone(),
            wait: self.wait,
            f: Arc::clone(&self.f),
        }
    }
}

impl<A, T> Debounced<A, T>
where
    A: Send + 'static,
    T: Send + 'static,
{
    pub(crate) fn new(inner: Arc<OptimizerInner>, key: String, wait: Duration, f: WrappedFn<A, T>) -> Self {
        Self { inner, key, wait, f }
    }

    pub fn call(&self, arg: A) -> BoxFuture<'static, Option<T>> {
        let generation = self.inner.next_generation();
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let key = self.key.clone();
        let f = Arc::clone(&self.f);
        let wait = self.wait;

        let mut timers = self.inner.debounce_timers.lock().unwrap_or_else(PoisonError::into_inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            {
                let mut timers = inner.debounce_timers.lock().unwrap_or_else(PoisonError::into_inner);
                if !claim(&mut timers, &key, generation) {
                    return;
                }
            }
            let _ = tx.send(f(arg).await);
        });

        if let Some((_, previous)) = timers.insert(self.key.clone(), (generation, timer)) {
            previous.abort();
        }
        async move { rx.await.ok() }.boxed()
    }
}
