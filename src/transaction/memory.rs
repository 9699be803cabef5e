//! # In-Memory Connection Provider
//!
//! A connection provider with staged-write semantics and no database behind
//! it. Statements are plain strings: with auto-commit on they are published
//! immediately; with auto-commit off they are staged until commit and dropped
//! on rollback or close. Every lifecycle call is recorded, and failures can be
//! injected, which makes it the provider of choice for exercising
//! transactional scopes in tests or embedded setups.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use super::connection::{Connection, ConnectionProvider, IsolationLevel};
use crate::error::ConnectionError;

/// Lifecycle call observed by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Acquired { connection: usize },
    AutoCommitChanged { connection: usize, auto_commit: bool },
    IsolationChanged { connection: usize, level: IsolationLevel },
    Executed { connection: usize, statement: String },
    Committed { connection: usize },
    RolledBack { connection: usize },
    /// Settings as they were when the connection was closed
    Closed {
        connection: usize,
        auto_commit: bool,
        isolation: Option<IsolationLevel>,
    },
}

#[derive(Debug)]
struct MemoryState {
    committed: Vec<String>,
    events: Vec<ConnectionEvent>,
    acquired: usize,
    open: usize,
    default_auto_commit: bool,
    default_isolation: Option<IsolationLevel>,
    fail_acquire: bool,
    fail_commit: bool,
    fail_rollback: bool,
    failing_statement: Option<String>,
    rollback_after_failed_commit: bool,
}

/// Provider of [`MemoryConnection`]s sharing one committed-statement log
#[derive(Debug, Clone)]
pub struct InMemoryConnectionProvider {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for InMemoryConnectionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConnectionProvider {
    /// Connections start with auto-commit on and `READ COMMITTED` isolation
    pub fn new() -> Self {
        Self::with_defaults(true, Some(IsolationLevel::ReadCommitted))
    }

    /// Settings every newly acquired connection starts with
    pub fn with_defaults(auto_commit: bool, isolation: Option<IsolationLevel>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                committed: Vec::new(),
                events: Vec::new(),
                acquired: 0,
                open: 0,
                default_auto_commit: auto_commit,
                default_isolation: isolation,
                fail_acquire: false,
                fail_commit: false,
                fail_rollback: false,
                failing_statement: None,
                rollback_after_failed_commit: false,
            })),
        }
    }

    pub fn fail_acquire(&self, fail: bool) -> &Self {
        self.state.lock().fail_acquire = fail;
        self
    }

    pub fn fail_commit(&self, fail: bool) -> &Self {
        self.state.lock().fail_commit = fail;
        self
    }

    pub fn fail_rollback(&self, fail: bool) -> &Self {
        self.state.lock().fail_rollback = fail;
        self
    }

    /// Make every statement containing `fragment` fail
    pub fn fail_statements_containing(&self, fragment: impl Into<String>) -> &Self {
        self.state.lock().failing_statement = Some(fragment.into());
        self
    }

    /// Advertise defined rollback behavior after a failed commit
    pub fn support_rollback_after_failed_commit(&self, supported: bool) -> &Self {
        self.state.lock().rollback_after_failed_commit = supported;
        self
    }

    /// Statements that were made durable, in commit order
    pub fn committed(&self) -> Vec<String> {
        self.state.lock().committed.clone()
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.state.lock().events.clone()
    }

    pub fn acquired_count(&self) -> usize {
        self.state.lock().acquired
    }

    /// Connections acquired and neither closed nor dropped
    pub fn open_connections(&self) -> usize {
        self.state.lock().open
    }

    /// Settings recorded when the most recent connection was closed
    pub fn last_closed_settings(&self) -> Option<(bool, Option<IsolationLevel>)> {
        self.state
            .lock()
            .events
            .iter()
            .rev()
            .find_map(|event| match event {
                ConnectionEvent::Closed {
                    auto_commit,
                    isolation,
                    ..
                } => Some((*auto_commit, *isolation)),
                _ => None,
            })
    }

    pub fn default_settings(&self) -> (bool, Option<IsolationLevel>) {
        let state = self.state.lock();
        (state.default_auto_commit, state.default_isolation)
    }
}

#[async_trait]
impl ConnectionProvider for InMemoryConnectionProvider {
    async fn acquire(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        let mut state = self.state.lock();
        if state.fail_acquire {
            return Err(ConnectionError::Acquire {
                message: "in-memory provider configured to refuse connections".to_string(),
            });
        }

        state.acquired += 1;
        state.open += 1;
        let id = state.acquired;
        state.events.push(ConnectionEvent::Acquired { connection: id });
        debug!(connection = id, "In-memory connection acquired");

        Ok(Box::new(MemoryConnection {
            id,
            state: Arc::clone(&self.state),
            auto_commit: state.default_auto_commit,
            isolation: state.default_isolation,
            pending: Vec::new(),
            closed: false,
        }))
    }
}

/// Connection handed out by [`InMemoryConnectionProvider`]
#[derive(Debug)]
pub struct MemoryConnection {
    id: usize,
    state: Arc<Mutex<MemoryState>>,
    auto_commit: bool,
    isolation: Option<IsolationLevel>,
    pending: Vec<String>,
    closed: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if self.closed {
            Err(ConnectionError::Closed)
        } else {
            Ok(())
        }
    }

    fn record(&self, event: ConnectionEvent) {
        self.state.lock().events.push(event);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        if auto_commit && !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            self.state.lock().committed.extend(pending);
        }
        self.auto_commit = auto_commit;
        self.record(ConnectionEvent::AutoCommitChanged {
            connection: self.id,
            auto_commit,
        });
        Ok(())
    }

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.isolation = Some(level);
        self.record(ConnectionEvent::IsolationChanged {
            connection: self.id,
            level,
        });
        Ok(())
    }

    async fn execute(&mut self, statement: &str) -> Result<u64, ConnectionError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if let Some(fragment) = &state.failing_statement {
            if statement.contains(fragment.as_str()) {
                return Err(ConnectionError::Statement {
                    message: format!("statement rejected: {statement}"),
                });
            }
        }

        state.events.push(ConnectionEvent::Executed {
            connection: self.id,
            statement: statement.to_string(),
        });
        if self.auto_commit {
            state.committed.push(statement.to_string());
        } else {
            self.pending.push(statement.to_string());
        }
        Ok(1)
    }

    async fn commit(&mut self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if state.fail_commit {
            return Err(ConnectionError::Commit {
                message: "in-memory provider configured to fail commits".to_string(),
            });
        }
        state.committed.append(&mut self.pending);
        state
            .events
            .push(ConnectionEvent::Committed { connection: self.id });
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.pending.clear();
        let mut state = self.state.lock();
        if state.fail_rollback {
            return Err(ConnectionError::Rollback {
                message: "in-memory provider configured to fail rollbacks".to_string(),
            });
        }
        state
            .events
            .push(ConnectionEvent::RolledBack { connection: self.id });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.pending.clear();
        self.closed = true;
        let mut state = self.state.lock();
        state.open -= 1;
        state.events.push(ConnectionEvent::Closed {
            connection: self.id,
            auto_commit: self.auto_commit,
            isolation: self.isolation,
        });
        Ok(())
    }

    fn supports_rollback_after_failed_commit(&self) -> bool {
        self.state.lock().rollback_after_failed_commit
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.state.lock().open -= 1;
        }
    }
}
