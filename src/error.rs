//! # Error Types
//!
//! Structured failures for every layer of task execution, built on `thiserror`.
//!
//! The taxonomy is closed so callers can `match` instead of inspecting error
//! classes at runtime:
//!
//! - [`TaskError`] - what a single [`Task`](crate::task::Task) attempt reports
//! - [`ExecutionError`] - what [`TaskExecutor`](crate::execution::TaskExecutor) surfaces
//!   (business failure, retry exhaustion, timeout, cancellation)
//! - [`AggregateError`] - every sibling failure from a parallel fan-out
//! - [`TransactionError`] - a failed transactional scope, carrying the original cause
//! - [`ConnectionError`] - failures raised by a connection provider or handle

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a single task attempt
#[derive(Error, Debug)]
pub enum TaskError {
    /// The task's own logic failed; eligible for retry
    #[error("{message}")]
    Failed { message: String },

    /// The task's own logic failed in a way that retrying cannot fix
    #[error("permanent failure: {message}")]
    Permanent { message: String },

    /// The task was cancelled before it could finish
    #[error("task cancelled")]
    Cancelled,

    /// The task panicked while running on a worker
    #[error("task panicked: {message}")]
    Panicked { message: String },

    /// A shared or private connection failed underneath the task
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A nested parallel fan-out failed
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// A nested transactional scope failed and was rolled back
    #[error(transparent)]
    Transaction(Box<TransactionError>),

    /// A nested retry/timeout-wrapped task failed
    #[error(transparent)]
    Execution(Box<ExecutionError>),
}

impl TaskError {
    /// Create a retryable business failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Create a non-retryable business failure
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Whether a retry policy may consider this failure at all
    ///
    /// Cancellation, panics and permanent failures are never retried. Nested
    /// structured failures are retryable unless the inner operation was
    /// itself cancelled.
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::Failed { .. } | TaskError::Connection(_) | TaskError::Aggregate(_) => true,
            TaskError::Permanent { .. } | TaskError::Cancelled | TaskError::Panicked { .. } => {
                false
            }
            TaskError::Transaction(inner) => inner.is_retryable(),
            TaskError::Execution(inner) => !matches!(**inner, ExecutionError::Cancelled { .. }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(error: anyhow::Error) -> Self {
        TaskError::Failed {
            message: format!("{error:#}"),
        }
    }
}

impl From<TransactionError> for TaskError {
    fn from(error: TransactionError) -> Self {
        TaskError::Transaction(Box::new(error))
    }
}

impl From<ExecutionError> for TaskError {
    fn from(error: ExecutionError) -> Self {
        TaskError::Execution(Box::new(error))
    }
}

/// Terminal failure of one [`TaskExecutor`](crate::execution::TaskExecutor) invocation
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The first attempt failed and the retry policy declined to retry
    #[error("task '{task}' failed on attempt {attempts}: {source}")]
    Failed {
        task: String,
        attempts: u32,
        #[source]
        source: TaskError,
    },

    /// At least one retry happened and the policy declined any further ones
    #[error("task '{task}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        task: String,
        attempts: u32,
        #[source]
        source: TaskError,
    },

    /// The whole retry loop did not finish within its budget
    #[error("task '{task}' timed out after {timeout:?} ({attempts} attempts started)")]
    TimedOut {
        task: String,
        timeout: Duration,
        attempts: u32,
    },

    /// The caller's cancellation token fired
    #[error("task '{task}' cancelled after {attempts} attempts")]
    Cancelled { task: String, attempts: u32 },

    /// The bounded retry loop panicked on its worker
    #[error("task '{task}' panicked: {message}")]
    Panicked { task: String, message: String },
}

impl ExecutionError {
    /// Number of attempts started before the failure was surfaced
    pub fn attempts(&self) -> u32 {
        match self {
            ExecutionError::Failed { attempts, .. }
            | ExecutionError::RetriesExhausted { attempts, .. }
            | ExecutionError::TimedOut { attempts, .. }
            | ExecutionError::Cancelled { attempts, .. } => *attempts,
            ExecutionError::Panicked { .. } => 0,
        }
    }

    /// The task's own error, when the failure came from the task
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            ExecutionError::Failed { source, .. }
            | ExecutionError::RetriesExhausted { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::TimedOut { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutionError::Cancelled { .. })
    }
}

/// One sibling failure inside an [`AggregateError`]
#[derive(Debug)]
pub struct TaskFailure {
    /// Position of the task in the submitted list
    pub index: usize,
    pub task_name: String,
    pub error: TaskError,
}

impl TaskFailure {
    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.index, self.task_name, self.error)
    }
}

/// Every failure collected from a parallel fan-out
#[derive(Debug)]
pub struct AggregateError {
    pub failures: Vec<TaskFailure>,
    /// Number of tasks that were submitted
    pub total: usize,
    /// Whether the overall join deadline elapsed
    pub timed_out: bool,
}

impl AggregateError {
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures caused by cancellation rather than the task's own logic
    pub fn cancelled(&self) -> impl Iterator<Item = &TaskFailure> {
        self.failures.iter().filter(|f| f.is_cancelled())
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} parallel tasks failed", self.failures.len(), self.total)?;
        if self.timed_out {
            write!(f, " (timed out)")?;
        }
        let rendered = self
            .failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, ": {rendered}")
    }
}

impl std::error::Error for AggregateError {}

/// Failure of a [`TransactionScope`](crate::transaction::TransactionScope)
#[derive(Error, Debug)]
pub enum TransactionError {
    /// No connection could be acquired from the provider
    #[error("failed to acquire transactional connection: {0}")]
    Acquire(#[source] ConnectionError),

    /// The acquired connection could not be put into transactional mode
    #[error("failed to configure transactional connection: {0}")]
    Configure(#[source] ConnectionError),

    /// A nested task failed; the transaction was rolled back
    #[error("transaction rolled back after task '{task_name}' (#{index}) failed: {source}")]
    RolledBack {
        index: usize,
        task_name: String,
        #[source]
        source: TaskError,
    },

    /// Every nested task succeeded but the commit itself failed
    #[error("transaction commit failed: {0}")]
    Commit(#[source] ConnectionError),
}

impl TransactionError {
    /// The nested task's original failure, if one triggered the rollback
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            TransactionError::RolledBack { source, .. } => Some(source),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            TransactionError::RolledBack { source, .. } => source.is_retryable(),
            _ => true,
        }
    }
}

/// Failure raised by a connection provider or a connection handle
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connection acquisition failed: {message}")]
    Acquire { message: String },

    #[error("statement failed: {message}")]
    Statement { message: String },

    #[error("commit failed: {message}")]
    Commit { message: String },

    #[error("rollback failed: {message}")]
    Rollback { message: String },

    #[error("connection settings could not be changed: {message}")]
    Settings { message: String },

    #[error("connection already closed")]
    Closed,

    /// A shared handle was used after its owning scope ended
    #[error("shared connection {id} was released by its transaction scope")]
    Released { id: uuid::Uuid },

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TaskError::failed("boom").is_retryable());
        assert!(!TaskError::permanent("bad input").is_retryable());
        assert!(!TaskError::Cancelled.is_retryable());
        assert!(!TaskError::Panicked {
            message: "oops".to_string()
        }
        .is_retryable());

        let nested: TaskError = ExecutionError::Cancelled {
            task: "inner".to_string(),
            attempts: 1,
        }
        .into();
        assert!(!nested.is_retryable());

        let rolled_back: TaskError = TransactionError::RolledBack {
            index: 0,
            task_name: "insert".to_string(),
            source: TaskError::permanent("constraint"),
        }
        .into();
        assert!(!rolled_back.is_retryable());
    }

    #[test]
    fn test_anyhow_conversion_keeps_context() {
        let error = anyhow::anyhow!("disk full").context("writing report");
        let task_error: TaskError = error.into();
        assert_eq!(task_error.to_string(), "writing report: disk full");
    }

    #[test]
    fn test_aggregate_display_lists_every_failure() {
        let aggregate = AggregateError {
            failures: vec![
                TaskFailure {
                    index: 1,
                    task_name: "fetch".to_string(),
                    error: TaskError::failed("404"),
                },
                TaskFailure {
                    index: 2,
                    task_name: "slow".to_string(),
                    error: TaskError::Cancelled,
                },
            ],
            total: 3,
            timed_out: true,
        };

        let rendered = aggregate.to_string();
        assert!(rendered.starts_with("2 of 3 parallel tasks failed (timed out)"));
        assert!(rendered.contains("[1] fetch: 404"));
        assert!(rendered.contains("[2] slow: task cancelled"));
        assert_eq!(aggregate.cancelled().count(), 1);
    }

    #[test]
    fn test_execution_error_accessors() {
        let error = ExecutionError::RetriesExhausted {
            task: "flaky".to_string(),
            attempts: 3,
            source: TaskError::failed("still broken"),
        };
        assert_eq!(error.attempts(), 3);
        assert_eq!(error.task_error().unwrap().to_string(), "still broken");
        assert!(!error.is_timeout());

        let timeout = ExecutionError::TimedOut {
            task: "slow".to_string(),
            timeout: Duration::from_millis(50),
            attempts: 1,
        };
        assert!(timeout.is_timeout());
        assert!(timeout.task_error().is_none());
    }
}
