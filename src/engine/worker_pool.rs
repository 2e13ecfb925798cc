// =============================================================================
// WorkerPool — bounded fan-out over the symbol universe
// =============================================================================
//
// N long-lived workers drain a bounded input channel; results come back
// unordered, each tagged with its symbol. A task that errors or panics
// yields an errored TaskResult and never kills the pool. Cancellation is
// checked between tasks; an in-flight task runs to its own deadline.
// =============================================================================

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TaskError;

/// Outcome of one symbol's task. Result order across symbols is unspecified.
#[derive(Debug)]
pub struct TaskResult<T> {
    pub symbol: String,
    pub outcome: Result<T, TaskError>,
}

pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// Create a pool with `workers` parallel workers (at least one).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fan `symbols` across the workers, applying `work` to each.
    ///
    /// The input channel is bounded at `workers * 2`, so feeding blocks once
    /// the workers are saturated. Cancellation stops feeding and lets workers
    /// exit after their current task; symbols never started produce no
    /// result.
    pub async fn process<T, F>(
        &self,
        symbols: Vec<String>,
        cancel: &CancellationToken,
        work: F,
    ) -> Vec<TaskResult<T>>
    where
        T: Send + 'static,
        F: Fn(String) -> BoxFuture<'static, Result<T, TaskError>> + Send + Sync + 'static,
    {
        let total = symbols.len();
        let (task_tx, task_rx) = mpsc::channel::<String>(self.workers * 2);
        let (result_tx, mut result_rx) = mpsc::channel::<TaskResult<T>>(total.max(1));

        let task_rx = Arc::new(Mutex::new(task_rx));
        let work = Arc::new(work);

        let mut worker_handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let task_rx = Arc::clone(&task_rx);
            let work = Arc::clone(&work);
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();

            worker_handles.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        debug!(worker_id, "worker exiting on cancellation");
                        break;
                    }

                    let symbol = {
                        let mut rx = task_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(symbol) = symbol else {
                        break; // channel drained and closed
                    };

                    let outcome = match std::panic::AssertUnwindSafe(work(symbol.clone()))
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result,
                        Err(panic) => {
                            let msg = panic
                                .downcast_ref::<String>()
                                .cloned()
                                .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                                .unwrap_or_else(|| "unknown panic".to_string());
                            Err(TaskError::Panicked(msg))
                        }
                    };

                    if result_tx.send(TaskResult { symbol, outcome }).await.is_err() {
                        break; // collector gone
                    }
                }
            }));
        }
        drop(result_tx);

        // Feed the full universe; stop early on cancellation.
        let feed_cancel = cancel.clone();
        let feeder = tokio::spawn(async move {
            for symbol in symbols {
                tokio::select! {
                    _ = feed_cancel.cancelled() => break,
                    sent = task_tx.send(symbol) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            // Dropping task_tx closes the channel and lets workers drain out.
        });

        let mut results = Vec::with_capacity(total);
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }

        let _ = feeder.await;
        for handle in worker_handles {
            let _ = handle.await;
        }

        results
    }
}
