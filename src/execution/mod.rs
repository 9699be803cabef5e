//! # Execution
//!
//! Retry/timeout execution of single tasks, parallel fan-out of siblings, and
//! the worker pool both of them submit work to.

pub mod descriptor;
pub mod executor;
pub mod parallel;
pub mod worker_pool;

pub use descriptor::TaskDescriptor;
pub use executor::{ExecutionReport, TaskExecutor};
pub use parallel::{ParallelCoordinator, ParallelTask};
pub use worker_pool::{WorkCanceller, WorkError, WorkHandle, WorkerPool, WorkerPoolConfig};
