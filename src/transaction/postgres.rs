//! # PostgreSQL Connection Provider
//!
//! [`ConnectionProvider`] backed by an `sqlx` [`PgPool`].
//!
//! PostgreSQL has no auto-commit switch, so the driver contract is emulated:
//! disabling auto-commit makes the next statement open a transaction with
//! `BEGIN`, and commit/rollback end it. Isolation is applied as a session
//! characteristic so it covers the transaction opened afterwards; the scope
//! restores the original value before the connection returns to the pool.
//! A connection dropped with a transaction still open is closed instead of
//! being returned to the pool.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres};
use tracing::{debug, warn};

use super::connection::{Connection, ConnectionProvider, IsolationLevel};
use crate::error::ConnectionError;

#[derive(Debug, Clone)]
pub struct PgConnectionProvider {
    pool: PgPool,
}

impl PgConnectionProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a fresh pool
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, ConnectionError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionProvider for PgConnectionProvider {
    async fn acquire(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        let mut connection = self.pool.acquire().await?;
        let isolation: String = sqlx::query_scalar("SHOW default_transaction_isolation")
            .fetch_one(&mut *connection)
            .await?;

        let isolation = match isolation.parse::<IsolationLevel>() {
            Ok(level) => Some(level),
            Err(error) => {
                warn!(%error, "Unrecognised session isolation level reported by server");
                None
            }
        };

        debug!(isolation = ?isolation, "PostgreSQL connection acquired");
        Ok(Box::new(PostgresConnection {
            connection: Some(connection),
            auto_commit: true,
            isolation,
            in_transaction: false,
        }))
    }
}

/// Pooled PostgreSQL connection with emulated auto-commit
#[derive(Debug)]
pub struct PostgresConnection {
    connection: Option<PoolConnection<Postgres>>,
    auto_commit: bool,
    isolation: Option<IsolationLevel>,
    in_transaction: bool,
}

impl PostgresConnection {
    fn connection(&mut self) -> Result<&mut PoolConnection<Postgres>, ConnectionError> {
        self.connection.as_mut().ok_or(ConnectionError::Closed)
    }

    async fn run(&mut self, command: &'static str) -> Result<(), ConnectionError> {
        let connection = self.connection()?;
        (&mut **connection).execute(command).await?;
        Ok(())
    }

    async fn begin_if_needed(&mut self) -> Result<(), ConnectionError> {
        if !self.auto_commit && !self.in_transaction {
            self.run("BEGIN").await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// End the open transaction; the server ends it even when the command fails
    async fn finish(&mut self, command: &'static str) -> Result<(), ConnectionError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.run(command).await
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), ConnectionError> {
        if auto_commit {
            self.finish("COMMIT").await?;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), ConnectionError> {
        if self.in_transaction {
            return Err(ConnectionError::Settings {
                message: "isolation level cannot change while a transaction is open".to_string(),
            });
        }

        let statement = format!(
            "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {}",
            level.as_sql()
        );
        let connection = self.connection()?;
        (&mut **connection).execute(statement.as_str()).await?;
        self.isolation = Some(level);
        Ok(())
    }

    async fn execute(&mut self, statement: &str) -> Result<u64, ConnectionError> {
        self.begin_if_needed().await?;
        let connection = self.connection()?;
        let result = sqlx::query(statement).execute(&mut **connection).await?;
        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> Result<(), ConnectionError> {
        self.finish("COMMIT").await.map_err(|error| ConnectionError::Commit {
            message: error.to_string(),
        })
    }

    async fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.finish("ROLLBACK").await.map_err(|error| ConnectionError::Rollback {
            message: error.to_string(),
        })
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        let result = self.rollback().await;
        if let Some(mut connection) = self.connection.take() {
            if result.is_err() {
                connection.close_on_drop();
            }
        }
        result
    }

    /// A failed `COMMIT` always ends the transaction server-side, so a
    /// follow-up `ROLLBACK` is harmless
    fn supports_rollback_after_failed_commit(&self) -> bool {
        true
    }
}

impl Drop for PostgresConnection {
    fn drop(&mut self) {
        if self.in_transaction {
            if let Some(connection) = self.connection.as_mut() {
                warn!("PostgreSQL connection dropped inside a transaction; closing it");
                connection.close_on_drop();
            }
        }
    }
}
