//! # Task Abstraction
//!
//! A [`Task`] is a single asynchronous operation run against a shared
//! [`ExecutionContext`]. It returns nothing on success; failures are reported
//! as [`TaskError`]. Tasks are shared as [`TaskRef`] so the same instance can be
//! retried, fanned out, or nested inside a transaction scope.
//!
//! [`TaskFn`] adapts an async closure into a task:
//!
//! ```rust
//! use taskrun_core::{ExecutionContext, Task, TaskError, TaskFn, TaskRef};
//!
//! let task: TaskRef = TaskFn::arc("record_visit", |ctx: ExecutionContext| async move {
//!     let visits = ctx.get("visits").and_then(|v| v.as_u64()).unwrap_or(0);
//!     ctx.put("visits", visits + 1);
//!     Ok::<(), TaskError>(())
//! });
//! assert_eq!(task.name(), "record_visit");
//! ```

use async_trait::async_trait;
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::TaskError;

/// Asynchronous unit of work executed against a shared context
///
/// Implementations must tolerate being called repeatedly (retries) and must
/// not assume the context is private to them.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Human-readable name used in logs and failure reports
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<(), TaskError>;
}

/// Shared handle to a task
pub type TaskRef = Arc<dyn Task>;

/// Task backed by an async closure
///
/// The closure receives its own handle onto the shared context.
pub struct TaskFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F, Fut> TaskFn<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Create the task already wrapped as a [`TaskRef`]
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> TaskRef {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<(), TaskError> {
        (self.f)(ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Unnamed;

    #[async_trait]
    impl Task for Unnamed {
        async fn execute(&self, _ctx: &ExecutionContext) -> Result<(), TaskError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_task_fn_sees_shared_context() {
        let ctx = ExecutionContext::new();
        let task = TaskFn::new("writer", |ctx: ExecutionContext| async move {
            ctx.put("written", true);
            Ok(())
        });

        task.execute(&ctx).await.unwrap();
        assert_eq!(ctx.get("written"), Some(json!(true)));
        assert_eq!(task.name(), "writer");
    }

    #[tokio::test]
    async fn test_task_fn_propagates_errors() {
        let task = TaskFn::arc("failing", |_ctx: ExecutionContext| async move {
            Err(TaskError::failed("nope"))
        });

        let error = task.execute(&ExecutionContext::new()).await.unwrap_err();
        assert_eq!(error.to_string(), "nope");
    }

    #[test]
    fn test_default_name_is_type_name() {
        assert!(Unnamed.name().ends_with("Unnamed"));
    }
}
