use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;

/// Shared count of completed work units. Only ever increases.
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<AtomicU64>);

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, units: u64) {
        self.0.fetch_add(units, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of one batch run.
///
/// `results` holds outputs in completion order, only from items that finished
/// before the abort was observed. `error` carries at most one failure.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub results: Vec<T>,
    pub error: Option<SyncError>,
    pub cancelled: bool,
}

impl<T> BatchReport<T> {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Vec<T>, SyncError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.results),
        }
    }
}

enum TaskOutcome<T> {
    Done {
        units: u64,
        result: Result<T, SyncError>,
    },
    /// Cancelled before it started; never ran.
    Skipped,
}

/// Runs independent work items on a bounded pool, aborting on first failure.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    workers: usize,
    progress: Progress,
    interrupt: Option<CancellationToken>,
}

impl BatchExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            progress: Progress::new(),
            interrupt: None,
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Operator abort signal. Cancelling it aborts the batch like a failure
    /// and the report error becomes `SyncError::Interrupted`.
    pub fn with_interrupt(mut self, interrupt: CancellationToken) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, work: F) -> BatchReport<T>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        self.run_weighted(items, |_| 1, work).await
    }

    /// Like `run`, but each item advances `Progress` by `units(item)` on success.
    pub async fn run_weighted<I, T, U, F, Fut>(
        &self,
        items: Vec<I>,
        units: U,
        work: F,
    ) -> BatchReport<T>
    where
        I: Send + 'static,
        T: Send + 'static,
        U: Fn(&I) -> u64,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let total = items.len();
        let abort = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let work = Arc::new(work);
        let mut set = JoinSet::new();

        for item in items {
            let item_units = units(&item);
            let token = abort.child_token();
            let semaphore = semaphore.clone();
            let work = work.clone();
            set.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => return TaskOutcome::Skipped,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return TaskOutcome::Skipped,
                    },
                };
                if token.is_cancelled() {
                    return TaskOutcome::Skipped;
                }
                TaskOutcome::Done {
                    units: item_units,
                    result: work(item).await,
                }
            });
        }

        let interrupt = self.interrupt.clone().unwrap_or_default();
        let mut results = Vec::with_capacity(total);
        let mut failure: Option<SyncError> = None;
        let mut late = 0usize;
        let mut skipped = 0usize;

        // Completions already available are taken before the interrupt is
        // checked. Runs until every task has finished.
        loop {
            tokio::select! {
                biased;
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok(TaskOutcome::Skipped)) => skipped += 1,
                    Some(Ok(TaskOutcome::Done { units, result })) => match result {
                        Ok(_) if failure.is_some() => late += 1,
                        Ok(value) => {
                            results.push(value);
                            self.progress.add(units);
                        }
                        Err(e) if failure.is_some() => {
                            tracing::debug!(error = %e, "error after abort ignored");
                            late += 1;
                        }
                        Err(e) => {
                            tracing::warn!(
                                completed = results.len(),
                                total,
                                reason = e.reason(),
                                retryable = e.is_retryable(),
                                error = %e,
                                "batch item failed, aborting"
                            );
                            failure = Some(e);
                            abort.cancel();
                        }
                    },
                    Some(Err(join_err)) => {
                        if failure.is_none() {
                            tracing::error!("batch task panicked: {join_err}");
                            failure = Some(SyncError::Other(format!("batch task failed: {join_err}")));
                            abort.cancel();
                        }
                    }
                },
                _ = interrupt.cancelled(), if failure.is_none() => {
                    tracing::warn!(completed = results.len(), total, "batch interrupted, cancelling outstanding items");
                    failure = Some(SyncError::Interrupted);
                    abort.cancel();
                }
            }
        }

        let cancelled = failure.is_some();
        if cancelled {
            tracing::info!(
                succeeded = results.len(),
                excluded = late,
                skipped,
                total,
                "batch aborted"
            );
        }

        let succeeded = results.len();
        let error = failure.map(|cause| match cause {
            SyncError::Interrupted => SyncError::Interrupted,
            cause => SyncError::BatchAborted {
                succeeded,
                cause: Box::new(cause),
            },
        });

        BatchReport {
            results,
            error,
            cancelled,
        }
    }
}
