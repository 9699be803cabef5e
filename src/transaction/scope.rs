//! # Transaction Scope
//!
//! Wraps a sequence of nested tasks in one transaction on one connection.
//!
//! ```text
//! OPENING -> CONFIGURING -> PUBLISHING -> RUNNING(i of N) -> COMMITTING  -> CLOSED
//!                                                         -> ROLLING_BACK -> CLOSED
//! ```
//!
//! The connection is published into the [`ExecutionContext`] as a
//! [`SharedConnectionHandle`] before the first nested task runs and withdrawn
//! before the scope returns, whatever the outcome. A scope that starts while
//! the context already carries a shared connection joins that transaction
//! instead of opening its own.

use async_trait::async_trait;
use futures::FutureExt;
use std::borrow::Cow;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::connection::{Connection, ConnectionProvider, IsolationLevel, SharedConnectionHandle};
use crate::config::TransactionConfig;
use crate::context::ExecutionContext;
use crate::error::{ConnectionError, TaskError, TransactionError};
use crate::execution::worker_pool::panic_message;
use crate::task::{Task, TaskRef};

/// Connection settings captured right after acquisition
#[derive(Debug, Clone, Copy)]
struct OriginalSettings {
    auto_commit: bool,
    isolation: Option<IsolationLevel>,
}

/// Keeps the shared handle published for as long as it is alive
///
/// Dropping it withdraws the handle from the context and releases it, which
/// also covers a scope future dropped mid-run.
struct Publication<'a> {
    ctx: &'a ExecutionContext,
    handle: SharedConnectionHandle,
    active: bool,
}

impl<'a> Publication<'a> {
    /// Publish `handle`, or return the connection another scope published first
    fn publish(
        ctx: &'a ExecutionContext,
        handle: SharedConnectionHandle,
    ) -> Result<Self, SharedConnectionHandle> {
        ctx.publish_if_absent(handle.clone())?;
        Ok(Self {
            ctx,
            handle,
            active: true,
        })
    }

    fn withdraw(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.ctx.withdraw_connection(&self.handle);
        self.handle.release();
    }
}

impl Drop for Publication<'_> {
    fn drop(&mut self) {
        self.withdraw();
    }
}

/// Runs nested tasks inside a single transaction
///
/// Nested tasks run strictly in list order on the caller's task. The first
/// failure stops the sequence and rolls the transaction back; if every task
/// succeeds the transaction is committed. Rollback and cleanup errors are
/// logged and never replace the error that triggered them.
#[derive(Clone)]
pub struct TransactionScope {
    name: Cow<'static, str>,
    provider: Arc<dyn ConnectionProvider>,
    tasks: Vec<TaskRef>,
    isolation: Option<String>,
}

impl TransactionScope {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        provider: Arc<dyn ConnectionProvider>,
        tasks: Vec<TaskRef>,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            tasks,
            isolation: None,
        }
    }

    /// Request an isolation level by name, e.g. `"serializable"`
    ///
    /// Unknown names are logged and the connection default is kept.
    pub fn with_isolation(mut self, isolation: impl Into<String>) -> Self {
        self.isolation = Some(isolation.into());
        self
    }

    pub fn with_config(mut self, config: &TransactionConfig) -> Self {
        self.isolation = config.isolation_level.clone();
        self
    }

    pub fn tasks(&self) -> &[TaskRef] {
        &self.tasks
    }

    pub fn isolation(&self) -> Option<&str> {
        self.isolation.as_deref()
    }

    #[instrument(skip_all, fields(scope = %self.name))]
    pub async fn run(&self, ctx: &ExecutionContext) -> Result<(), TransactionError> {
        if let Some(outer) = ctx.shared_connection() {
            debug!(
                connection_id = %outer.id(),
                "Joining enclosing transaction"
            );
            return self.run_tasks(ctx).await;
        }

        debug!(state = "OPENING", "Acquiring transactional connection");
        let mut connection = self
            .provider
            .acquire()
            .await
            .map_err(TransactionError::Acquire)?;
        let original = OriginalSettings {
            auto_commit: connection.auto_commit(),
            isolation: connection.isolation_level(),
        };

        debug!(
            state = "CONFIGURING",
            auto_commit = original.auto_commit,
            isolation = ?original.isolation,
            "Disabling auto-commit"
        );
        if let Err(failure) = self.configure(connection.as_mut()).await {
            error!(error = %failure, "Could not configure transactional connection");
            restore_and_close(connection.as_mut(), original, true).await;
            return Err(TransactionError::Configure(failure));
        }

        let handle = SharedConnectionHandle::new(connection);
        debug!(state = "PUBLISHING", connection_id = %handle.id(), "Publishing shared connection");

        let mut publication = match Publication::publish(ctx, handle.clone()) {
            Ok(publication) => publication,
            Err(existing) => {
                debug!(
                    connection_id = %existing.id(),
                    "Another scope published a connection first; joining it"
                );
                {
                    let mut connection = handle.lock().await;
                    restore_and_close(&mut **connection, original, true).await;
                }
                handle.release();
                return self.run_tasks(ctx).await;
            }
        };

        // `settled` is false while the connection may still hold pending work.
        let (outcome, settled) = match self.run_tasks(ctx).await {
            Ok(()) => match commit(&handle).await {
                Ok(()) => (Ok(()), true),
                Err(failure) => {
                    let settled = roll_back_failed_commit(&handle).await;
                    (Err(TransactionError::Commit(failure)), settled)
                }
            },
            Err(failure) => {
                let settled = roll_back(&handle).await;
                (Err(failure), settled)
            }
        };
        publication.withdraw();

        debug!(state = "CLOSED", connection_id = %handle.id(), "Releasing transactional connection");
        let mut connection = handle.lock().await;
        restore_and_close(&mut **connection, original, settled).await;

        outcome
    }

    async fn configure(&self, connection: &mut dyn Connection) -> Result<(), ConnectionError> {
        connection.set_auto_commit(false).await?;

        let Some(requested) = self.isolation.as_deref() else {
            return Ok(());
        };
        match requested.parse::<IsolationLevel>() {
            Ok(level) => {
                connection.set_isolation_level(level).await?;
                debug!(isolation = %level, "Isolation level applied");
            }
            Err(unknown) => {
                warn!(
                    requested = requested,
                    error = %unknown,
                    "Ignoring invalid isolation level; keeping connection default"
                );
            }
        }
        Ok(())
    }

    /// Run nested tasks in order, stopping at the first failure
    async fn run_tasks(&self, ctx: &ExecutionContext) -> Result<(), TransactionError> {
        let total = self.tasks.len();
        for (index, task) in self.tasks.iter().enumerate() {
            debug!(
                state = "RUNNING",
                index = index,
                total = total,
                task = %task.name(),
                "Running nested task"
            );

            let outcome = AssertUnwindSafe(task.execute(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(TaskError::Panicked {
                        message: panic_message(payload),
                    })
                });

            if let Err(source) = outcome {
                warn!(
                    index = index,
                    task = %task.name(),
                    error = %source,
                    "Nested task failed; abandoning transaction"
                );
                return Err(TransactionError::RolledBack {
                    index,
                    task_name: task.name().to_string(),
                    source,
                });
            }
        }
        Ok(())
    }
}

async fn commit(handle: &SharedConnectionHandle) -> Result<(), ConnectionError> {
    let mut connection = handle.lock().await;
    debug!(state = "COMMITTING", connection_id = %handle.id(), "Committing transaction");

    match connection.commit().await {
        Ok(()) => {
            info!(connection_id = %handle.id(), "Transaction committed");
            Ok(())
        }
        Err(failure) => {
            error!(error = %failure, "Transaction commit failed");
            Err(failure)
        }
    }
}

/// Returns whether the pending work was discarded
async fn roll_back_failed_commit(handle: &SharedConnectionHandle) -> bool {
    let supported = handle.lock().await.supports_rollback_after_failed_commit();
    if !supported {
        warn!(
            connection_id = %handle.id(),
            "Connection cannot roll back after a failed commit; skipping rollback"
        );
        return false;
    }
    roll_back(handle).await
}

/// Returns whether the rollback succeeded
async fn roll_back(handle: &SharedConnectionHandle) -> bool {
    let mut connection = handle.lock().await;
    debug!(state = "ROLLING_BACK", connection_id = %handle.id(), "Rolling back transaction");
    match connection.rollback().await {
        Ok(()) => {
            info!(connection_id = %handle.id(), "Transaction rolled back");
            true
        }
        Err(failure) => {
            error!(error = %failure, "Transaction rollback failed");
            false
        }
    }
}

/// Put the connection back the way it was acquired, then close it
///
/// An unsettled connection may still hold pending work, and restoring
/// auto-commit on it would commit that work; it is closed as-is instead.
async fn restore_and_close(
    connection: &mut dyn Connection,
    original: OriginalSettings,
    settled: bool,
) {
    if !settled {
        warn!("Transaction outcome unresolved; closing without restoring settings");
        if let Err(failure) = connection.close().await {
            warn!(error = %failure, "Failed to close transactional connection");
        }
        return;
    }

    if connection.isolation_level() != original.isolation {
        match original.isolation {
            Some(level) => {
                if let Err(failure) = connection.set_isolation_level(level).await {
                    warn!(error = %failure, isolation = %level, "Failed to restore isolation level");
                }
            }
            None => debug!("Original isolation level unknown; leaving it unchanged"),
        }
    }

    if connection.auto_commit() != original.auto_commit {
        if let Err(failure) = connection.set_auto_commit(original.auto_commit).await {
            warn!(error = %failure, "Failed to restore auto-commit");
        }
    }

    if let Err(failure) = connection.close().await {
        warn!(error = %failure, "Failed to close transactional connection");
    }
}

impl fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionScope")
            .field("name", &self.name)
            .field(
                "tasks",
                &self.tasks.iter().map(|task| task.name()).collect::<Vec<_>>(),
            )
            .field("isolation", &self.isolation)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Task for TransactionScope {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<(), TaskError> {
        self.run(ctx).await.map_err(TaskError::from)
    }
}
