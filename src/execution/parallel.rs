//! Fan-out / join of sibling tasks.
//!
//! Every sibling is submitted to the [`WorkerPool`] and joined once. Failures
//! never short-circuit the remaining siblings; they are collected into a
//! single [`AggregateError`] after the join completes.

use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::worker_pool::{WorkError, WorkerPool};
use crate::config::ParallelConfig;
use crate::context::ExecutionContext;
use crate::error::{AggregateError, TaskError, TaskFailure};
use crate::policy::TimeoutPolicy;
use crate::task::{Task, TaskRef};

/// Runs sibling tasks concurrently and joins them at one barrier
///
/// The coordinator borrows its pool; it never shuts the pool down.
#[derive(Debug, Clone, Default)]
pub struct ParallelCoordinator {
    pool: WorkerPool,
    timeout: TimeoutPolicy,
}

impl ParallelCoordinator {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            timeout: TimeoutPolicy::None,
        }
    }

    /// Bound the whole join by `timeout`
    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: &ParallelConfig) -> Self {
        let timeout = config
            .timeout_ms
            .map(TimeoutPolicy::from_millis)
            .unwrap_or_default();
        Self::new(WorkerPool::from_config(config)).with_timeout(timeout)
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn timeout(&self) -> TimeoutPolicy {
        self.timeout
    }

    /// Run every task against `ctx` and wait for all of them
    ///
    /// Returns `Ok(())` only when every sibling succeeded. Siblings still
    /// running at the deadline are cancelled and recorded as
    /// [`TaskError::Cancelled`] failures.
    #[instrument(skip_all, fields(tasks = tasks.len()))]
    pub async fn run_all(
        &self,
        tasks: &[TaskRef],
        ctx: &ExecutionContext,
    ) -> Result<(), AggregateError> {
        if tasks.is_empty() {
            return Ok(());
        }

        let deadline = self.timeout.budget().map(|budget| Instant::now() + budget);
        let handles = tasks
            .iter()
            .map(|task| {
                let task = Arc::clone(task);
                let ctx = ctx.clone();
                self.pool.submit(async move { task.execute(&ctx).await })
            })
            .collect::<Vec<_>>();
        debug!(submitted = handles.len(), "Parallel tasks submitted");

        let outcomes = self.pool.await_all(handles, deadline).await;

        let mut timed_out = false;
        let mut failures = Vec::new();
        for (index, (task, outcome)) in tasks.iter().zip(outcomes).enumerate() {
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(WorkError::TimedOut) => {
                    timed_out = true;
                    TaskError::Cancelled
                }
                Err(WorkError::Cancelled) => TaskError::Cancelled,
                Err(WorkError::Panicked { message }) => TaskError::Panicked { message },
            };
            failures.push(TaskFailure {
                index,
                task_name: task.name().to_string(),
                error,
            });
        }

        if failures.is_empty() {
            info!(total = tasks.len(), "All parallel tasks succeeded");
            return Ok(());
        }

        let aggregate = AggregateError {
            failures,
            total: tasks.len(),
            timed_out,
        };
        warn!(
            failed = aggregate.len(),
            total = aggregate.total,
            timed_out = timed_out,
            "Parallel tasks failed"
        );
        Err(aggregate)
    }
}

/// A group of siblings exposed as a single [`Task`]
#[derive(Clone)]
pub struct ParallelTask {
    name: Cow<'static, str>,
    coordinator: ParallelCoordinator,
    tasks: Vec<TaskRef>,
}

impl ParallelTask {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        coordinator: ParallelCoordinator,
        tasks: Vec<TaskRef>,
    ) -> Self {
        Self {
            name: name.into(),
            coordinator,
            tasks,
        }
    }

    pub fn tasks(&self) -> &[TaskRef] {
        &self.tasks
    }
}

impl fmt::Debug for ParallelTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelTask")
            .field("name", &self.name)
            .field("coordinator", &self.coordinator)
            .field(
                "tasks",
                &self.tasks.iter().map(|task| task.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[async_trait]
impl Task for ParallelTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<(), TaskError> {
        self.coordinator
            .run_all(&self.tasks, ctx)
            .await
            .map_err(TaskError::from)
    }
}
