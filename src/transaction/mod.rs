//! # Transactions
//!
//! Connection abstractions and the [`TransactionScope`] that shares one
//! connection across a sequence of nested tasks.

pub mod connection;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod scope;

pub use connection::{
    Connection, ConnectionProvider, IsolationLevel, SharedConnectionHandle, UnknownIsolationLevel,
};
pub use memory::{ConnectionEvent, InMemoryConnectionProvider, MemoryConnection};
#[cfg(feature = "postgres")]
pub use postgres::{PgConnectionProvider, PostgresConnection};
pub use scope::TransactionScope;
