//! Bounded fan-out/fan-in execution of independent remote operations.
//!
//! Every aggregator funnels its work through [`FanOut::run`]: one task per
//! work item, gated by permits from a [`WorkerPool`] that is created once per
//! command and shared by every fan-out the command performs.
//!
//! # Guarantees
//!
//! - **Completeness**: `run` returns exactly one [`Completed`] per submitted
//!   item, whatever happens to the individual operations.
//! - **Isolation**: an operation that returns an error or panics becomes a
//!   [`Outcome::Failure`]; siblings keep running.
//! - **Attribution**: each outcome is returned together with the item that
//!   produced it, so callers re-key results instead of relying on order.
//!   Results arrive in completion order.
//! - **Cancellation**: once the [`CancelToken`] fires, items that have not
//!   started resolve to [`Error::Cancelled`]; in-flight operations finish.

use crate::error::{Error, Result};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Default bound on simultaneous in-flight remote operations.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Shared, explicitly sized pool of execution permits.
///
/// Cloning is cheap and every clone draws from the same permits, so one pool
/// bounds all the fan-outs of a command run together.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool allowing `size` concurrent operations (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Maximum number of concurrent operations.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running operation.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

/// Cooperative "stop starting new work" signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tagged result of one work item.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Failure(Error),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => Outcome::Failure(err),
        }
    }
}

/// A work item paired with its outcome.
#[derive(Debug)]
pub struct Completed<I, T> {
    pub item: I,
    pub outcome: Outcome<T>,
}

/// Progress callback, called with `(completed, total)` after each item.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Fan-out engine bound to a worker pool.
#[derive(Clone)]
pub struct FanOut {
    pool: WorkerPool,
    cancel: CancelToken,
    progress: Option<ProgressFn>,
}

impl FanOut {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Same engine, different progress sink (or none).
    pub fn reporting(&self, progress: Option<ProgressFn>) -> Self {
        Self {
            pool: self.pool.clone(),
            cancel: self.cancel.clone(),
            progress,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run `op` once per item and collect every outcome.
    ///
    /// Never fails and never drops an item: the returned vector always has
    /// `items.len()` entries, in completion order.
    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, op: F) -> Vec<Completed<I, T>>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let op = Arc::new(op);
        let mut pending: HashMap<usize, I> = HashMap::with_capacity(total);
        let mut tasks = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            pending.insert(index, item.clone());

            let op = Arc::clone(&op);
            let permits = Arc::clone(&self.pool.permits);
            let cancel = self.cancel.clone();

            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, Outcome::Failure(Error::Cancelled)),
                };

                if cancel.is_cancelled() {
                    return (index, Outcome::Failure(Error::Cancelled));
                }

                let outcome = match AssertUnwindSafe(async move { op(item).await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => Outcome::from(result),
                    Err(payload) => Outcome::Failure(Error::TaskPanicked(panic_message(payload))),
                };

                (index, outcome)
            });
        }

        let mut completed = Vec::with_capacity(total);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let Some(item) = pending.remove(&index) {
                        if let Outcome::Failure(err) = &outcome {
                            debug!(index, error = %err, "work item failed");
                        }
                        completed.push(Completed { item, outcome });
                    }
                }
                // Panics are caught inside the task, so this is an abort
                // during runtime shutdown; the item is settled below.
                Err(err) => warn!(error = %err, "work item task did not complete"),
            }

            if let Some(progress) = &self.progress {
                progress(total - pending.len(), total);
            }
        }

        for (_, item) in pending.drain() {
            completed.push(Completed {
                item,
                outcome: Outcome::Failure(Error::TaskPanicked("task aborted".to_string())),
            });
        }

        completed
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
