//! Bounded concurrent execution of per-item work.
//!
//! Two shapes of bulk execution are offered:
//!
//! - [`ConcurrencyPool::map`] collects results in input order and fails as a
//!   whole on the first failing item.
//! - [`ConcurrencyPool::apply_async`] reports each outcome to a callback in
//!   completion order and never stops because one item failed.
//!
//! # Architecture
//!
//! Every call owns a fresh [`JoinSet`](tokio::task::JoinSet) sized for that
//! batch. Items are dispatched lazily so that no more than the pool size run
//! at once; the set is aborted and drained on every exit path. A pool size of
//! one runs the items in the calling task without spawning anything.

use std::future::Future;
use std::ops::ControlFlow;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, PoolError, Result};
use crate::infrastructure::config::pool::PoolConfig;

mod batch;

use batch::{drive, panic_message};

/// Tasks per unit of hardware parallelism when no pool size is given.
pub const DEFAULT_PARALLELISM_FACTOR: usize = 10;

/// Pool size for `num_tasks` items on this machine.
///
/// `max(1, min(num_tasks, cpus * 10))`: never more workers than items and
/// never pathologically many on large batches.
#[must_use]
pub fn default_pool_size(num_tasks: usize) -> usize {
    size_for(num_tasks, num_cpus::get(), DEFAULT_PARALLELISM_FACTOR)
}

fn size_for(num_tasks: usize, parallelism: usize, factor: usize) -> usize {
    num_tasks.min(parallelism.saturating_mul(factor)).max(1)
}

/// Outcome counts of an [`apply_async`](ConcurrencyPool::apply_async) batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Items whose work succeeded.
    pub completed: usize,
    /// Items whose work failed or panicked.
    pub failed: usize,
    /// Callback invocations that returned an error.
    pub callback_failures: usize,
}

impl BatchSummary {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.completed + self.failed
    }

    fn record<T>(&mut self, outcome: &Result<T>) {
        if outcome.is_ok() {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Handle to a batch started with [`apply_async`](ConcurrencyPool::apply_async).
///
/// Dropping the handle lets the batch run to completion in the background;
/// [`abort`](Self::abort) stops it.
#[derive(Debug)]
pub struct BatchHandle {
    state: HandleState,
}

#[derive(Debug)]
enum HandleState {
    Finished(BatchSummary),
    Running(JoinHandle<BatchSummary>),
}

impl BatchHandle {
    /// Whether every item has been processed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Finished(_) => true,
            HandleState::Running(handle) => handle.is_finished(),
        }
    }

    /// Stop dispatching and abort the items still running.
    pub fn abort(&self) {
        if let HandleState::Running(handle) = &self.state {
            handle.abort();
        }
    }

    /// Wait for the batch and return its summary.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::BatchAborted`] if the batch was aborted or a
    /// callback panicked.
    pub async fn wait(self) -> Result<BatchSummary> {
        match self.state {
            HandleState::Finished(summary) => Ok(summary),
            HandleState::Running(handle) => handle.await.map_err(|err| {
                PoolError::BatchAborted {
                    message: panic_message(err),
                }
                .into()
            }),
        }
    }
}

/// Sizes and runs bulk executions.
///
/// Holds only configuration; every call builds and tears down its own set of
/// tasks.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyPool {
    config: PoolConfig,
}

impl ConcurrencyPool {
    #[must_use]
    pub const fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    /// Configured hardware parallelism, or the number of logical CPUs.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.config.parallelism.unwrap_or_else(num_cpus::get)
    }

    /// [`default_pool_size`] honouring the configured parallelism, factor and
    /// ceiling.
    #[must_use]
    pub fn default_pool_size(&self, num_tasks: usize) -> usize {
        size_for(num_tasks, self.parallelism(), self.config.parallelism_factor)
            .min(self.config.max_pool_size.max(1))
    }

    /// Effective pool size for `num_tasks` items.
    ///
    /// An explicit size is clamped to `[1, num_tasks]` and to the configured
    /// ceiling; `None` selects [`default_pool_size`](Self::default_pool_size).
    #[must_use]
    pub fn pool_size(&self, num_tasks: usize, requested: Option<usize>) -> usize {
        match requested {
            Some(size) => size
                .min(num_tasks)
                .min(self.config.max_pool_size)
                .max(1),
            None => self.default_pool_size(num_tasks),
        }
    }

    /// Apply `f` to every item, returning results in input order.
    ///
    /// On the first failure nothing further is dispatched, outstanding work is
    /// aborted and the failure is returned; no partial results survive.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::TaskFailed`] wrapping the first item error, or
    /// [`PoolError::TaskPanicked`] if an item's task panicked.
    pub async fn map<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        f: F,
        concurrency: Option<usize>,
    ) -> Result<Vec<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let size = self.pool_size(total, concurrency);
        debug!(total, size, "Mapping over batch");

        let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut failure = None;
        let flow = drive(items, f, size, |index, outcome| match outcome {
            Ok(value) => {
                results[index] = Some(value);
                ControlFlow::Continue(())
            }
            Err(err) => {
                failure = Some(err);
                ControlFlow::Break(())
            }
        })
        .await;

        if let (ControlFlow::Break(()), Some(err)) = (flow, failure) {
            warn!(error = %err, "Batch aborted after first failure");
            return Err(err.into());
        }
        Ok(results.into_iter().flatten().collect())
    }

    /// Apply `f` to every item, calling `on_result` as each one finishes.
    ///
    /// Callbacks run in completion order, one at a time. A failing item or a
    /// failing callback does not stop its siblings. With a pool size of one
    /// the whole batch runs here, in the calling task, before this returns.
    pub async fn apply_async<I, T, F, Fut, C>(
        &self,
        items: Vec<I>,
        f: F,
        concurrency: Option<usize>,
        on_result: C,
    ) -> BatchHandle
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        C: FnMut(usize, Result<T>) -> Result<()> + Send + 'static,
    {
        let total = items.len();
        let size = self.pool_size(total, concurrency);
        debug!(total, size, "Starting asynchronous batch");

        let run = run_with_callback(items, f, size, on_result);
        let state = if size == 1 {
            HandleState::Finished(run.await)
        } else {
            HandleState::Running(tokio::spawn(run))
        };
        BatchHandle { state }
    }
}

async fn run_with_callback<I, T, F, Fut, C>(
    items: Vec<I>,
    f: F,
    size: usize,
    mut on_result: C,
) -> BatchSummary
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    C: FnMut(usize, Result<T>) -> Result<()> + Send + 'static,
{
    let mut summary = BatchSummary::default();
    let _ = drive(items, f, size, |index, outcome| {
        let outcome = outcome.map_err(item_error);
        summary.record(&outcome);
        if let Err(err) = on_result(index, outcome) {
            warn!(index, error = %err, "Batch callback failed");
            summary.callback_failures += 1;
        }
        ControlFlow::Continue(())
    })
    .await;
    summary
}

/// The item's own error, unwrapped from its batch bookkeeping.
fn item_error(err: PoolError) -> Error {
    match err {
        PoolError::TaskFailed { source, .. } => *source,
        other => other.into(),
    }
}
