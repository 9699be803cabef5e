//! Task descriptors: a task plus the policies it runs under.

use async_trait::async_trait;
use std::fmt;

use super::executor::TaskExecutor;
use super::worker_pool::WorkerPool;
use crate::config::CoreConfig;
use crate::context::ExecutionContext;
use crate::error::TaskError;
use crate::policy::{RetryPolicy, TimeoutPolicy};
use crate::task::{Task, TaskRef};

/// A task together with its retry and timeout policies
///
/// Built once per logical operation and never mutated by the executor, so the
/// same descriptor can be executed any number of times. Policies default to
/// [`RetryPolicy::none`] and [`TimeoutPolicy::None`].
///
/// A descriptor is itself a [`Task`], which lets retry/timeout-wrapped work
/// nest inside parallel fan-outs and transactional scopes. When nested, it
/// runs bounded executions on its own pool if one is set.
#[derive(Clone)]
pub struct TaskDescriptor {
    pub task: TaskRef,
    pub retry: RetryPolicy,
    pub timeout: TimeoutPolicy,
    pub pool: Option<WorkerPool>,
}

impl TaskDescriptor {
    pub fn new(task: TaskRef) -> Self {
        Self {
            task,
            retry: RetryPolicy::none(),
            timeout: TimeoutPolicy::None,
            pool: None,
        }
    }

    /// Use the retry and timeout sections of a loaded configuration
    pub fn from_config(task: TaskRef, config: &CoreConfig) -> Self {
        Self {
            task,
            retry: RetryPolicy::from_config(&config.retry),
            timeout: TimeoutPolicy::from_config(&config.timeout),
            pool: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pool used when the descriptor runs as a nested [`Task`]
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("task", &self.task.name())
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("pool", &self.pool)
            .finish()
    }
}

#[async_trait]
impl Task for TaskDescriptor {
    fn name(&self) -> &str {
        self.task.name()
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<(), TaskError> {
        let executor = match &self.pool {
            Some(pool) => TaskExecutor::with_pool(pool.clone()),
            None => TaskExecutor::new(),
        };
        executor
            .execute(self, ctx)
            .await
            .map(|_| ())
            .map_err(TaskError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffKind, CoreConfig};
    use crate::task::TaskFn;
    use std::time::Duration;

    fn noop() -> TaskRef {
        TaskFn::arc("noop", |_ctx: ExecutionContext| async { Ok(()) })
    }

    #[test]
    fn test_defaults_are_sentinels() {
        let descriptor = TaskDescriptor::new(noop());
        assert_eq!(descriptor.retry.max_attempts(), 1);
        assert_eq!(descriptor.timeout, TimeoutPolicy::None);
        assert_eq!(descriptor.name(), "noop");
    }

    #[test]
    fn test_from_config() {
        let mut config = CoreConfig::default();
        config.retry.max_attempts = 3;
        config.retry.backoff.kind = BackoffKind::Fixed;
        config.retry.backoff.base_delay_ms = 5;
        config.timeout.timeout_ms = Some(200);

        let descriptor = TaskDescriptor::from_config(noop(), &config);
        assert_eq!(descriptor.retry.max_attempts(), 3);
        assert_eq!(
            descriptor.retry.backoff().compute_delay(2),
            Duration::from_millis(5)
        );
        assert_eq!(
            descriptor.timeout,
            TimeoutPolicy::Bounded(Duration::from_millis(200))
        );
    }

    #[tokio::test]
    async fn test_descriptor_runs_as_nested_task() {
        let failing = TaskFn::arc("always_fails", |_ctx: ExecutionContext| async {
            Err(TaskError::failed("down"))
        });
        let descriptor = TaskDescriptor::new(failing)
            .with_retry(RetryPolicy::new(2, crate::policy::NoBackoff));

        let error = descriptor.execute(&ExecutionContext::new()).await.unwrap_err();
        match error {
            TaskError::Execution(inner) => assert_eq!(inner.attempts(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_nested_descriptor_uses_its_pool() {
        let pool = WorkerPool::bounded(1);
        let occupied = pool.submit(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        // The only slot is taken, so the bounded run cannot start in time.
        let descriptor = TaskDescriptor::new(noop())
            .with_timeout(TimeoutPolicy::Bounded(Duration::from_millis(50)))
            .with_pool(pool.clone());
        let error = descriptor.execute(&ExecutionContext::new()).await.unwrap_err();
        assert!(matches!(error, TaskError::Execution(ref inner) if inner.is_timeout()));

        occupied.cancel();
        let descriptor = descriptor.with_pool(WorkerPool::new());
        descriptor.execute(&ExecutionContext::new()).await.unwrap();
    }
}
