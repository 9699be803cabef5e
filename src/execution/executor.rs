//! # Task Executor
//!
//! Runs one [`TaskDescriptor`]: a retry loop governed by its
//! [`RetryPolicy`], optionally bounded as a whole by its
//! [`TimeoutPolicy`](crate::policy::TimeoutPolicy).
//!
//! ```text
//! PENDING -> RUNNING(1) -> SUCCESS
//!                       -> RETRY_WAIT -> RUNNING(n + 1) -> ...
//!                       -> FAILED
//! ```
//!
//! - Without a timeout the loop runs inline on the caller's task; nothing is
//!   spawned.
//! - With a timeout the loop is submitted to the [`WorkerPool`] and the caller
//!   waits until the deadline. When it elapses the loop is cancelled and
//!   [`ExecutionError::TimedOut`] is returned. Dropping the `execute` future
//!   cancels the submitted loop as well.
//! - Backoff waits and the bounded wait listen to the same
//!   [`CancellationToken`], so one signal interrupts both. Cancellation is
//!   surfaced as [`ExecutionError::Cancelled`] and is never retried; the
//!   caller's token stays cancelled.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::descriptor::TaskDescriptor;
use super::worker_pool::{WorkError, WorkerPool};
use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use crate::policy::RetryPolicy;
use crate::task::TaskRef;

/// Outcome of a successful execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Attempt number that succeeded (1-based)
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Applies retry and timeout policies to a task
///
/// The executor is stateless between invocations; attempt counters live only
/// for the duration of one call.
#[derive(Debug, Clone, Default)]
pub struct TaskExecutor {
    pool: WorkerPool,
}

impl TaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run bounded executions on `pool` instead of the ambient runtime
    pub fn with_pool(pool: WorkerPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub async fn execute(
        &self,
        descriptor: &TaskDescriptor,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionReport, ExecutionError> {
        self.execute_with_cancellation(descriptor, ctx, &CancellationToken::new())
            .await
    }

    /// Execute until success, final failure, timeout, or until `cancel` fires
    #[instrument(skip_all, fields(task = %descriptor.task.name()))]
    pub async fn execute_with_cancellation(
        &self,
        descriptor: &TaskDescriptor,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ExecutionError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let attempts = Arc::new(AtomicU32::new(0));

        let retry_loop = RetryLoop {
            task: Arc::clone(&descriptor.task),
            retry: descriptor.retry.clone(),
            ctx: ctx.clone(),
            cancel: cancel.child_token(),
            attempts: Arc::clone(&attempts),
        };

        let outcome = match descriptor.timeout.budget() {
            None => retry_loop.run().await,
            Some(budget) => self.run_bounded(retry_loop, budget, cancel, &attempts).await,
        };

        let elapsed = started.elapsed();
        match outcome {
            Ok(attempts) => {
                info!(
                    attempts = attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Task completed"
                );
                Ok(ExecutionReport {
                    attempts,
                    started_at,
                    elapsed,
                })
            }
            Err(failure) => {
                error!(
                    attempts = failure.attempts(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %failure,
                    "Task execution failed"
                );
                Err(failure)
            }
        }
    }

    async fn run_bounded(
        &self,
        retry_loop: RetryLoop,
        budget: Duration,
        cancel: &CancellationToken,
        attempts: &AtomicU32,
    ) -> Result<u32, ExecutionError> {
        let task = retry_loop.task.name().to_string();
        let token = retry_loop.cancel.clone();
        let deadline = Instant::now() + budget;

        let mut handle = self.pool.submit_with_token(token, retry_loop.run());
        let canceller = handle.canceller();
        debug!(
            task = %task,
            budget_ms = budget.as_millis() as u64,
            work_id = %handle.id(),
            "Retry loop submitted with deadline"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                canceller.cancel();
                Err(ExecutionError::Cancelled {
                    task,
                    attempts: attempts.load(Ordering::Acquire),
                })
            }
            joined = handle.join_until(Some(deadline)) => match joined {
                Ok(outcome) => outcome,
                Err(WorkError::TimedOut) => {
                    let attempts = attempts.load(Ordering::Acquire);
                    warn!(
                        task = %task,
                        budget_ms = budget.as_millis() as u64,
                        attempts = attempts,
                        "Task timed out; retry loop cancelled"
                    );
                    Err(ExecutionError::TimedOut {
                        task,
                        timeout: budget,
                        attempts,
                    })
                }
                Err(WorkError::Cancelled) => Err(ExecutionError::Cancelled {
                    task,
                    attempts: attempts.load(Ordering::Acquire),
                }),
                Err(WorkError::Panicked { message }) => {
                    Err(ExecutionError::Panicked { task, message })
                }
            },
        }
    }
}

/// Owned state of one retry loop, so it can run inline or on a worker
struct RetryLoop {
    task: TaskRef,
    retry: RetryPolicy,
    ctx: ExecutionContext,
    cancel: CancellationToken,
    /// Last attempt started, readable by the timeout wrapper
    attempts: Arc<AtomicU32>,
}

impl RetryLoop {
    async fn run(self) -> Result<u32, ExecutionError> {
        let task = self.task.name().to_string();
        let mut attempt: u32 = 1;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled {
                    task,
                    attempts: attempt - 1,
                });
            }

            self.attempts.store(attempt, Ordering::Release);
            debug!(task = %task, attempt = attempt, "Starting attempt");

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(ExecutionError::Cancelled { task, attempts: attempt });
                }
                outcome = self.task.execute(&self.ctx) => outcome,
            };

            let failure = match outcome {
                Ok(()) => return Ok(attempt),
                Err(failure) => failure,
            };

            if !self.retry.should_retry(attempt, &failure) {
                return Err(if attempt == 1 {
                    ExecutionError::Failed {
                        task,
                        attempts: attempt,
                        source: failure,
                    }
                } else {
                    ExecutionError::RetriesExhausted {
                        task,
                        attempts: attempt,
                        source: failure,
                    }
                });
            }

            let delay = self.retry.backoff().compute_delay(attempt);
            warn!(
                task = %task,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Attempt failed; retrying"
            );

            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        return Err(ExecutionError::Cancelled { task, attempts: attempt });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            attempt = attempt.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::policy::{FixedBackoff, NoBackoff, TimeoutPolicy};
    use crate::task::TaskFn;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(calls: Arc<AtomicUsize>, succeed_on: Option<usize>) -> TaskRef {
        TaskFn::arc("counting", move |_ctx: ExecutionContext| {
            let calls = Arc::clone(&calls);
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                match succeed_on {
                    Some(target) if call >= target => Ok(()),
                    _ => Err(TaskError::failed(format!("failure #{call}"))),
                }
            }
        })
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = TaskDescriptor::new(counting_task(Arc::clone(&calls), Some(1)));

        let report = TaskExecutor::new()
            .execute(&descriptor, &ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(report.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_retry_surfaces_original_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = TaskDescriptor::new(counting_task(Arc::clone(&calls), None));

        let error = TaskExecutor::new()
            .execute(&descriptor, &ExecutionContext::new())
            .await
            .unwrap_err();

        assert!(matches!(error, ExecutionError::Failed { attempts: 1, .. }));
        assert_eq!(error.task_error().unwrap().to_string(), "failure #1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = TaskDescriptor::new(counting_task(Arc::clone(&calls), Some(3)))
            .with_retry(RetryPolicy::new(5, NoBackoff));

        let report = TaskExecutor::new()
            .execute(&descriptor, &ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let task = TaskFn::arc("permanent", move |_ctx: ExecutionContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TaskError::permanent("invalid payload")) }
        });
        let descriptor =
            TaskDescriptor::new(task).with_retry(RetryPolicy::new(5, NoBackoff));

        let error = TaskExecutor::new()
            .execute(&descriptor, &ExecutionContext::new())
            .await
            .unwrap_err();
        assert!(matches!(error, ExecutionError::Failed { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff_bypasses_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = TaskDescriptor::new(counting_task(Arc::clone(&calls), None))
            .with_retry(RetryPolicy::new(5, FixedBackoff::new(Duration::from_secs(30))));
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let error = TaskExecutor::new()
            .execute_with_cancellation(&descriptor, &ExecutionContext::new(), &token)
            .await
            .unwrap_err();

        assert!(matches!(error, ExecutionError::Cancelled { attempts: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(token.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bounded_success_runs_on_worker() {
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = TaskDescriptor::new(counting_task(Arc::clone(&calls), Some(2)))
            .with_retry(RetryPolicy::new(3, NoBackoff))
            .with_timeout(TimeoutPolicy::Bounded(Duration::from_secs(5)));

        let report = TaskExecutor::new()
            .execute(&descriptor, &ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(report.attempts, 2);
    }

    #[tokio::test]
    async fn test_bounded_timeout_is_distinct() {
        let task = TaskFn::arc("sleepy", |_ctx: ExecutionContext| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
        let descriptor = TaskDescriptor::new(task)
            .with_timeout(TimeoutPolicy::Bounded(Duration::from_millis(50)));

        let error = TaskExecutor::new()
            .execute(&descriptor, &ExecutionContext::new())
            .await
            .unwrap_err();
        assert!(error.is_timeout());
        assert!(error.task_error().is_none());
        assert_eq!(error.attempts(), 1);
    }

    #[tokio::test]
    async fn test_bounded_panic_is_reported() {
        let task = TaskFn::arc("panicky", |_ctx: ExecutionContext| async {
            if true {
                panic!("attempt exploded");
            }
            Ok(())
        });
        let descriptor = TaskDescriptor::new(task)
            .with_timeout(TimeoutPolicy::Bounded(Duration::from_secs(5)));

        let error = TaskExecutor::new()
            .execute(&descriptor, &ExecutionContext::new())
            .await
            .unwrap_err();
        assert!(
            matches!(error, ExecutionError::Panicked { ref message, .. } if message == "attempt exploded")
        );
    }
}
