//! # Connection Abstractions
//!
//! The boundary between [`TransactionScope`](super::TransactionScope) and a
//! concrete database driver. A [`ConnectionProvider`] hands out
//! [`Connection`]s; the scope drives their lifecycle (auto-commit, isolation,
//! commit, rollback, close) and shares them with nested tasks through a
//! [`SharedConnectionHandle`], which only exposes statement execution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::ConnectionError;

/// Standard SQL transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling, as used in `SET TRANSACTION ISOLATION LEVEL ...`
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Unrecognised isolation level name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown isolation level: '{0}'")]
pub struct UnknownIsolationLevel(pub String);

impl FromStr for IsolationLevel {
    type Err = UnknownIsolationLevel;

    /// Accepts `read_committed`, `READ COMMITTED`, `read-committed`, ...
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value
            .trim()
            .to_ascii_lowercase()
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        match normalized.as_str() {
            "read uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "read committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(UnknownIsolationLevel(value.to_string())),
        }
    }
}

/// A single database connection whose transactional settings can be driven
/// by a scope
///
/// Semantics follow the usual driver contract: with auto-commit disabled,
/// executed statements accumulate in an implicit transaction until
/// [`commit`](Connection::commit) or [`rollback`](Connection::rollback).
/// Re-enabling auto-commit while work is pending commits that work.
#[async_trait]
pub trait Connection: Send {
    fn auto_commit(&self) -> bool;

    /// Current isolation level, `None` when the driver cannot report it
    fn isolation_level(&self) -> Option<IsolationLevel>;

    async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), ConnectionError>;

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), ConnectionError>;

    /// Execute a statement, returning the number of affected rows
    async fn execute(&mut self, statement: &str) -> Result<u64, ConnectionError>;

    async fn commit(&mut self) -> Result<(), ConnectionError>;

    async fn rollback(&mut self) -> Result<(), ConnectionError>;

    /// Release the connection; pending uncommitted work is discarded
    async fn close(&mut self) -> Result<(), ConnectionError>;

    /// Whether a rollback issued after a failed commit has defined behavior
    fn supports_rollback_after_failed_commit(&self) -> bool {
        false
    }
}

/// Source of connections for transactional scopes
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// Borrowed access to the connection owned by an enclosing transaction scope
///
/// Nested tasks can run statements through the handle but cannot commit,
/// roll back, or close the connection. Once the owning scope finishes, the
/// handle is released and every further call fails with
/// [`ConnectionError::Released`].
#[derive(Clone)]
pub struct SharedConnectionHandle {
    inner: Arc<SharedConnection>,
}

struct SharedConnection {
    id: Uuid,
    released: AtomicBool,
    connection: Mutex<Box<dyn Connection>>,
}

impl SharedConnectionHandle {
    pub(crate) fn new(connection: Box<dyn Connection>) -> Self {
        Self {
            inner: Arc::new(SharedConnection {
                id: Uuid::new_v4(),
                released: AtomicBool::new(false),
                connection: Mutex::new(connection),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Run a statement inside the enclosing transaction
    ///
    /// Calls from concurrent tasks are serialized; the connection is never
    /// used by two statements at once.
    pub async fn execute(&self, statement: &str) -> Result<u64, ConnectionError> {
        let mut connection = self.inner.connection.lock().await;
        if self.is_released() {
            return Err(ConnectionError::Released { id: self.id() });
        }
        connection.execute(statement).await
    }

    /// Exclusive access for the owning scope's lifecycle calls
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Box<dyn Connection>> {
        self.inner.connection.lock().await
    }

    pub(crate) fn release(&self) {
        self.inner.released.store(true, Ordering::Release);
    }

    pub(crate) fn same_connection(&self, other: &SharedConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SharedConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedConnectionHandle")
            .field("id", &self.id())
            .field("released", &self.is_released())
            .finish()
    }
}
