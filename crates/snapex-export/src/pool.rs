//! Bounded worker pool
//!
//! Jobs are spawned lazily as tokio tasks through `buffer_unordered`, so no
//! more than `size` run at once and a job's future is only built when a slot
//! frees up. Each job's result is collected independently: an error or a
//! panic in one job never cancels its siblings. Cancelling the pool's token
//! stops dispatch of jobs that have not started yet.

use futures::stream::{self, StreamExt};
use snapex_common::{Result, SnapexError};
use std::any::Any;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Outcome of one job
#[derive(Debug)]
pub enum JobResult<T> {
    Completed(T),
    Failed(SnapexError),
    Panicked(String),
    /// Never started because the pool was cancelled
    Cancelled,
}

impl<T> JobResult<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobResult::Completed(_))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    size: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self::with_cancellation(size, CancellationToken::new())
    }

    pub fn with_cancellation(size: usize, cancel: CancellationToken) -> Self {
        Self {
            size: size.max(1),
            cancel,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `make(key)` for every key and return the results in key order.
    pub async fn run<K, T, F, Fut>(&self, keys: Vec<K>, make: F) -> Vec<(K, JobResult<T>)>
    where
        K: Clone + std::fmt::Display + Send,
        T: Send + 'static,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let total = keys.len();
        debug!(jobs = total, workers = self.size, "Dispatching jobs");

        let mut results: Vec<(usize, K, JobResult<T>)> = stream::iter(keys.into_iter().enumerate())
            .map(|(index, key)| {
                let cancel = self.cancel.clone();
                let job = if cancel.is_cancelled() {
                    None
                } else {
                    Some(make(key.clone()))
                };

                async move {
                    let Some(job) = job.filter(|_| !cancel.is_cancelled()) else {
                        debug!(job = %key, "Job cancelled before start");
                        return (index, key, JobResult::Cancelled);
                    };

                    let result = match tokio::spawn(job).await {
                        Ok(Ok(value)) => JobResult::Completed(value),
                        Ok(Err(e)) => {
                            warn!(job = %key, error = %e, "Job failed ({} / {})", index + 1, total);
                            JobResult::Failed(e)
                        },
                        Err(join_error) if join_error.is_panic() => {
                            let message = panic_message(join_error.into_panic());
                            error!(job = %key, panic = %message, "Job panicked ({} / {})", index + 1, total);
                            JobResult::Panicked(message)
                        },
                        Err(join_error) => JobResult::Failed(SnapexError::Task(join_error.to_string())),
                    };
                    (index, key, result)
                }
            })
            .buffer_unordered(self.size)
            .collect()
            .await;

        results.sort_by_key(|(index, _, _)| *index);
        results.into_iter().map(|(_, key, result)| (key, result)).collect()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
