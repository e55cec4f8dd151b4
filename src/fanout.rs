//! Fan-out executor
//!
//! Runs a batch of independent requests with bounded concurrency. Every
//! task gets its own spawned future; a semaphore caps how many are past
//! the gate at once and results are funnelled back over a channel, so a
//! slow or failing task never blocks the others from reporting.
//!
//! With a deadline, tasks that have not been issued when it expires are
//! cancelled and reported as [`Error::DeadlineExceeded`]. Tasks already
//! in flight are allowed to finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::FanoutConfig;
use crate::error::{Error, Result};

/// Default number of requests in flight
pub const DEFAULT_CONCURRENCY: usize = 8;

/// One keyed unit of work
pub struct FanoutTask<K, T> {
    pub key: K,
    future: BoxFuture<'static, Result<T>>,
}

impl<K, T> FanoutTask<K, T> {
    pub fn new<F>(key: K, future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            key,
            future: Box::pin(future),
        }
    }
}

/// Every task's outcome, in completion order
#[derive(Debug)]
pub struct FanoutReport<K, T> {
    pub succeeded: Vec<(K, T)>,
    pub failed: Vec<(K, Error)>,
}

impl<K, T> FanoutReport<K, T> {
    fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FanoutExecutor {
    concurrency: usize,
    deadline: Option<Duration>,
}

impl Default for FanoutExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl FanoutExecutor {
    /// Executor with at most `concurrency` tasks in flight (at least one)
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            deadline: None,
        }
    }

    /// Bound the whole batch by a deadline measured from the start of `run_all`
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn from_config(config: &FanoutConfig) -> Self {
        let deadline = match config.deadline_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self::new(config.concurrency).with_deadline(deadline)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Run every task and collect one outcome per task
    ///
    /// A task that panics is reported as an internal error under its key.
    pub async fn run_all<K, T>(&self, tasks: Vec<FanoutTask<K, T>>) -> FanoutReport<K, T>
    where
        K: Clone + Send + 'static,
        T: Send + 'static,
    {
        let mut report = FanoutReport::new();
        if tasks.is_empty() {
            return report;
        }

        debug!(
            tasks = tasks.len(),
            concurrency = self.concurrency,
            deadline = ?self.deadline,
            "Starting fan-out"
        );

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let deadline = self.deadline.map(|d| Instant::now() + d);
        let (tx, mut rx) = mpsc::channel::<(K, Result<T>)>(tasks.len());

        let mut handles = Vec::with_capacity(tasks.len());
        for FanoutTask { key, future } in tasks {
            let permits = Arc::clone(&permits);
            let tx = tx.clone();
            let task_key = key.clone();

            let handle = tokio::spawn(async move {
                let permit = match deadline {
                    Some(deadline) => tokio::select! {
                        biased;
                        _ = tokio::time::sleep_until(deadline) => {
                            let _ = tx.send((task_key, Err(Error::DeadlineExceeded))).await;
                            return;
                        }
                        permit = permits.acquire_owned() => permit,
                    },
                    None => permits.acquire_owned().await,
                };

                let result = match permit {
                    Ok(_permit) => future.await,
                    Err(_) => Err(Error::Internal("fan-out gate closed".into())),
                };
                let _ = tx.send((task_key, result)).await;
            });
            handles.push((key, handle));
        }
        drop(tx);

        while let Some((key, result)) = rx.recv().await {
            match result {
                Ok(value) => report.succeeded.push((key, value)),
                Err(e) => report.failed.push((key, e)),
            }
        }

        // Panicked tasks never sent anything
        for (key, handle) in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Fan-out task aborted");
                report
                    .failed
                    .push((key, Error::Internal(format!("task aborted: {}", e))));
            }
        }

        debug!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Fan-out finished"
        );
        report
    }
}
