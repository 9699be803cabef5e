//! Worker Pool for Bounded and Parallel Execution
//!
//! Thin layer over the tokio runtime that turns a future into a cancellable
//! unit of work. The pool is the only place the crate spawns: the timeout
//! wrapper submits a whole retry loop, and the parallel coordinator submits one
//! unit per sibling task.
//!
//! The pool never owns the runtime it spawns on and has nothing to shut down.
//! Submitted work lives as long as its [`WorkHandle`]: dropping an unfinished
//! handle cancels the work, so abandoning a join never leaves it running.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ParallelConfig;

/// Why a unit of work produced no output
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkError {
    /// Cancelled through its handle or token before finishing
    #[error("work cancelled")]
    Cancelled,
    /// Still running when the join deadline elapsed; it has been cancelled
    #[error("work cancelled at join deadline")]
    TimedOut,
    #[error("work panicked: {message}")]
    Panicked { message: String },
}

/// Pool configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Maximum units running at once; unbounded when `None`
    pub max_concurrency: Option<usize>,
}

/// Submits work onto a tokio runtime with optional concurrency limiting
///
/// # Examples
///
/// ```rust
/// use taskrun_core::execution::WorkerPool;
///
/// #[tokio::main]
/// async fn main() {
///     let pool = WorkerPool::bounded(2);
///     let handles = (0..4).map(|n| pool.submit(async move { n * 10 })).collect();
///
///     let results = pool.await_all(handles, None).await;
///     assert_eq!(results, vec![Ok(0), Ok(10), Ok(20), Ok(30)]);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct WorkerPool {
    /// Runtime to spawn on; the ambient runtime when `None`
    runtime: Option<Handle>,
    permits: Option<Arc<Semaphore>>,
    pub config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Unbounded pool on the ambient runtime
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: WorkerPoolConfig) -> Self {
        let permits = config
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        Self {
            runtime: None,
            permits,
            config,
        }
    }

    /// Pool that runs at most `max_concurrency` units at once
    pub fn bounded(max_concurrency: usize) -> Self {
        Self::with_config(WorkerPoolConfig {
            max_concurrency: Some(max_concurrency),
        })
    }

    pub fn from_config(config: &ParallelConfig) -> Self {
        Self::with_config(WorkerPoolConfig {
            max_concurrency: config.max_concurrency,
        })
    }

    /// Spawn onto an explicit runtime instead of the ambient one
    pub fn on_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        self.config.max_concurrency
    }

    /// Free slots, `None` for an unbounded pool
    pub fn available_permits(&self) -> Option<usize> {
        self.permits.as_ref().map(|permits| permits.available_permits())
    }

    /// Submit work with its own cancellation token
    pub fn submit<F, T>(&self, work: F) -> WorkHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_with_token(CancellationToken::new(), work)
    }

    /// Submit work that stops when `token` is cancelled
    ///
    /// Work waiting for a concurrency slot is cancellable before it starts.
    pub fn submit_with_token<F, T>(&self, token: CancellationToken, work: F) -> WorkHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = Uuid::new_v4();
        let permits = self.permits.clone();
        let cancel = token.clone();

        let unit = async move {
            let _permit = match permits {
                Some(permits) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(WorkError::Cancelled),
                    permit = permits.acquire_owned() => {
                        Some(permit.map_err(|_| WorkError::Cancelled)?)
                    }
                },
                None => None,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(WorkError::Cancelled),
                output = work => Ok(output),
            }
        };

        let join = match &self.runtime {
            Some(runtime) => runtime.spawn(unit),
            None => tokio::spawn(unit),
        };
        debug!(work_id = %id, "Work submitted");

        WorkHandle { id, token, join }
    }

    /// Wait for every handle, in submission order, until `deadline`
    ///
    /// Units that already finished are reported even if the deadline has
    /// passed. Units still running at the deadline are cancelled and reported
    /// as [`WorkError::TimedOut`].
    pub async fn await_all<T>(
        &self,
        handles: Vec<WorkHandle<T>>,
        deadline: Option<Instant>,
    ) -> Vec<Result<T, WorkError>> {
        let mut outcomes = Vec::with_capacity(handles.len());
        for mut handle in handles {
            outcomes.push(handle.join_until(deadline).await);
        }

        let timed_out = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Err(WorkError::TimedOut)))
            .count();
        if timed_out > 0 {
            warn!(
                timed_out = timed_out,
                total = outcomes.len(),
                "Join deadline elapsed; cancelled unfinished work"
            );
        }

        outcomes
    }
}

/// Cancellable handle to one submitted unit of work
///
/// Dropping the handle before the work finishes cancels it.
#[derive(Debug)]
pub struct WorkHandle<T> {
    id: Uuid,
    token: CancellationToken,
    join: JoinHandle<Result<T, WorkError>>,
}

impl<T> WorkHandle<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Best-effort cancellation: fires the token and aborts the spawned task
    pub fn cancel(&self) {
        self.canceller().cancel();
    }

    /// Detached canceller usable while the handle is being awaited
    pub fn canceller(&self) -> WorkCanceller {
        WorkCanceller {
            token: self.token.clone(),
            abort: self.join.abort_handle(),
        }
    }

    pub async fn join(mut self) -> Result<T, WorkError> {
        self.join_until(None).await
    }

    /// Wait for the output until `deadline`, cancelling the work if it elapses
    pub async fn join_until(&mut self, deadline: Option<Instant>) -> Result<T, WorkError> {
        let joined = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, &mut self.join).await {
                Ok(joined) => joined,
                Err(_) => {
                    self.cancel();
                    debug!(work_id = %self.id, "Work cancelled at deadline");
                    return Err(WorkError::TimedOut);
                }
            },
            None => (&mut self.join).await,
        };

        match joined {
            Ok(outcome) => outcome,
            Err(error) => Err(join_error(error)),
        }
    }
}

impl<T> Drop for WorkHandle<T> {
    fn drop(&mut self) {
        if !self.join.is_finished() {
            self.token.cancel();
            self.join.abort();
            debug!(work_id = %self.id, "Work handle dropped; unfinished work cancelled");
        }
    }
}

/// Cancels a unit of work without borrowing its [`WorkHandle`]
#[derive(Debug, Clone)]
pub struct WorkCanceller {
    token: CancellationToken,
    abort: AbortHandle,
}

impl WorkCanceller {
    pub fn cancel(&self) {
        self.token.cancel();
        self.abort.abort();
    }
}

fn join_error(error: JoinError) -> WorkError {
    if error.is_cancelled() {
        return WorkError::Cancelled;
    }
    WorkError::Panicked {
        message: panic_message(error.into_panic()),
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
