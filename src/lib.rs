#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Taskrun Core
//!
//! In-process task execution for workflow libraries: retry and timeout
//! policies for single tasks, concurrent fan-out of sibling tasks, and
//! transactional scopes that share one database connection across a
//! sequence of nested tasks.
//!
//! ## Module Organization
//!
//! - [`task`] - The [`Task`] trait and closure adapter
//! - [`context`] - Shared key/value [`ExecutionContext`] with a shared-connection slot
//! - [`policy`] - Retry, backoff and timeout policies
//! - [`execution`] - [`TaskExecutor`], [`ParallelCoordinator`] and the [`WorkerPool`]
//! - [`transaction`] - [`TransactionScope`] and connection providers
//! - [`config`] - Configuration loading from files and environment
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use taskrun_core::{
//!     ExecutionContext, ExponentialBackoff, RetryPolicy, TaskDescriptor, TaskError,
//!     TaskExecutor, TaskFn, TimeoutPolicy,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetch = TaskFn::arc("fetch_orders", |ctx: ExecutionContext| async move {
//!     ctx.put("orders", 42);
//!     Ok::<(), TaskError>(())
//! });
//!
//! let descriptor = TaskDescriptor::new(fetch)
//!     .with_retry(RetryPolicy::new(3, ExponentialBackoff::default()))
//!     .with_timeout(TimeoutPolicy::Bounded(Duration::from_secs(5)));
//!
//! let ctx = ExecutionContext::new();
//! let report = TaskExecutor::new().execute(&descriptor, &ctx).await?;
//! println!("succeeded after {} attempt(s)", report.attempts);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Transactional behaviour can be exercised without a database through
//! [`InMemoryConnectionProvider`]. Tests against PostgreSQL need
//! `DATABASE_URL` and are ignored by default.

pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod logging;
pub mod policy;
pub mod task;
pub mod transaction;

pub use config::{ConfigManager, ConfigurationError, CoreConfig};
pub use context::ExecutionContext;
pub use error::{
    AggregateError, ConnectionError, ExecutionError, Result, TaskError, TaskFailure,
    TransactionError,
};
pub use execution::{
    ExecutionReport, ParallelCoordinator, ParallelTask, TaskDescriptor, TaskExecutor, WorkError,
    WorkHandle, WorkerPool,
};
pub use logging::init_structured_logging;
pub use policy::{
    BackoffStrategy, ExponentialBackoff, FixedBackoff, LinearBackoff, NoBackoff, RetryPolicy,
    TimeoutPolicy,
};
pub use task::{Task, TaskFn, TaskRef};
#[cfg(feature = "postgres")]
pub use transaction::PgConnectionProvider;
pub use transaction::{
    Connection, ConnectionProvider, InMemoryConnectionProvider, IsolationLevel,
    SharedConnectionHandle, TransactionScope,
};
