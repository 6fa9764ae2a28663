//! Bounded worker pool used for every fan-out in the pipelines.
//!
//! A fixed number of workers pull items from a shared queue; each successful result is
//! pushed to a shared accumulator. [`run_pool`] returns once the queue is drained and
//! every worker has been joined.

use anyhow::Result;
use log::error;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;

/// How many items of a batch may be in flight at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Bounded(usize),
    /// One worker per item.
    Unbounded,
}

impl Concurrency {
    pub fn workers_for(self, items: usize) -> usize {
        match self {
            Concurrency::Bounded(limit) => limit.max(1).min(items),
            Concurrency::Unbounded => items,
        }
    }
}

/// Outcome of a drained pool.
#[derive(Debug)]
pub struct Drained<T> {
    pub succeeded: Vec<T>,
    pub failed: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs `work` over `items` with at most `concurrency` items in flight.
///
/// Item failures are logged and counted; they never stop the remaining items.
pub async fn run_pool<I, T, F, Fut>(items: Vec<I>, concurrency: Concurrency, work: F) -> Drained<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let workers = concurrency.workers_for(items.len());
    let queue = Arc::new(Mutex::new(VecDeque::from(items)));
    let accumulator = Arc::new(Mutex::new(Vec::new()));
    let failed = Arc::new(Mutex::new(0usize));
    let work = Arc::new(work);

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let queue = queue.clone();
        let accumulator = accumulator.clone();
        let failed = failed.clone();
        let work = work.clone();
        set.spawn(async move {
            loop {
                let next = lock(&queue).pop_front();
                let Some(item) = next else { break };
                match work(item).await {
                    Ok(value) => {
                        lock(&accumulator).push(value);
                    }
                    Err(err) => {
                        error!("{:#}", err);
                        *lock(&failed) += 1;
                    }
                }
            }
        });
    }

    while let Some(joined) = set.join_next().await {
        if let Err(err) = joined {
            error!("Pool worker aborted: {}", err);
            *lock(&failed) += 1;
        }
    }

    let succeeded = std::mem::take(&mut *lock(&accumulator));
    let failed = *lock(&failed);
    Drained { succeeded, failed }
}
