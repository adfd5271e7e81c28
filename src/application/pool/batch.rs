//! A scoped set of spawned tasks belonging to one bulk execution.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::debug;

use crate::error::{PoolError, Result};

type Outcome<T> = (usize, std::result::Result<T, PoolError>);

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Tasks of one batch, tagged with their position in the submitted items.
///
/// Each item runs in its own task under a supervisor that reports the
/// item's index even if the item panics. Dropping the batch aborts every
/// task still running; [`shutdown`](Self::shutdown) additionally waits until
/// they have all stopped.
pub(super) struct Batch<T> {
    set: JoinSet<Outcome<T>>,
    total: usize,
}

impl<T: Send + 'static> Batch<T> {
    pub(super) fn new(total: usize) -> Self {
        Self {
            set: JoinSet::new(),
            total,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.set.len()
    }

    pub(super) fn spawn<Fut>(&mut self, index: usize, fut: Fut)
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let total = self.total;
        self.set.spawn(async move {
            let mut task = AbortOnDrop(tokio::spawn(fut));
            let outcome = match (&mut task.0).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(source)) => Err(PoolError::TaskFailed {
                    index,
                    total,
                    source: Box::new(source),
                }),
                Err(join_err) => Err(PoolError::TaskPanicked {
                    index,
                    total,
                    message: panic_message(join_err),
                }),
            };
            (index, outcome)
        });
    }

    /// Wait for the next task to finish, in completion order.
    pub(super) async fn join_next(&mut self) -> Option<Outcome<T>> {
        let joined = self.set.join_next().await?;
        Some(joined.unwrap_or_else(|join_err| {
            let err = PoolError::BatchAborted {
                message: panic_message(join_err),
            };
            (self.total, Err(err))
        }))
    }

    /// Abort every outstanding task and wait for all of them to stop.
    pub(super) async fn shutdown(mut self) {
        let outstanding = self.set.len();
        if outstanding > 0 {
            debug!(outstanding, "Aborting outstanding tasks");
        }
        self.set.abort_all();
        while self.set.join_next().await.is_some() {}
    }
}

/// Run `f` over `items`, at most `size` at a time, feeding each outcome to
/// `handle` as it arrives.
///
/// With `size == 1` items run one after another in the calling task and no
/// task is spawned. Returning [`ControlFlow::Break`] from `handle` stops
/// dispatching; spawned tasks still running are aborted and joined before
/// this returns.
pub(super) async fn drive<I, T, F, Fut, H>(
    items: Vec<I>,
    f: F,
    size: usize,
    mut handle: H,
) -> ControlFlow<()>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    H: FnMut(usize, std::result::Result<T, PoolError>) -> ControlFlow<()>,
{
    let total = items.len();
    if size <= 1 {
        for (index, item) in items.into_iter().enumerate() {
            let outcome = f(item).await.map_err(|source| PoolError::TaskFailed {
                index,
                total,
                source: Box::new(source),
            });
            if handle(index, outcome).is_break() {
                return ControlFlow::Break(());
            }
        }
        return ControlFlow::Continue(());
    }

    let f = Arc::new(f);
    let mut batch = Batch::new(total);
    let mut pending = items.into_iter().enumerate();
    loop {
        while batch.len() < size {
            let Some((index, item)) = pending.next() else {
                break;
            };
            let f = Arc::clone(&f);
            batch.spawn(index, async move { (*f)(item).await });
        }

        let Some((index, outcome)) = batch.join_next().await else {
            return ControlFlow::Continue(());
        };
        if handle(index, outcome).is_break() {
            batch.shutdown().await;
            return ControlFlow::Break(());
        }
    }
}

pub(super) fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
