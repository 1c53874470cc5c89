//! Relational store capability.
//!
//! The loader only needs four things from a database: connect, execute a parameterized
//! statement, commit, close. [`RelationalStore`] and [`StoreConnection`] describe exactly that;
//! [`sqlite::SqliteStore`] is the bundled implementation.
//!
//! Connections are scoped: a [`StoreConnection`] that is dropped without [`StoreConnection::commit`]
//! discards its uncommitted work.

pub mod sqlite;

use thiserror::Error;

pub use sqlite::SqliteStore;

/// Errors reported by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not open a connection.
    #[error("connect failed: {message}")]
    Connect { message: String },

    /// A statement failed to prepare or execute.
    #[error("statement failed: {message}")]
    Execute { message: String },

    /// Commit or close failed.
    #[error("transaction failed: {message}")]
    Transaction { message: String },
}

/// Convenience result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A database that can hand out connections.
pub trait RelationalStore: Send + Sync {
    /// Open a new connection. Each pipeline stage opens its own and closes it when done.
    fn connect(&self) -> StoreResult<Box<dyn StoreConnection>>;

    /// Short description for logs (never contains credentials).
    fn describe(&self) -> String;
}

/// An open connection.
pub trait StoreConnection {
    /// Execute one statement with positional text parameters. Returns affected rows.
    fn execute(&mut self, statement: &str, params: &[&str]) -> StoreResult<usize>;

    /// Make everything executed since the last commit durable.
    fn commit(&mut self) -> StoreResult<()>;

    /// Close the connection. Uncommitted work is discarded.
    fn close(self: Box<Self>) -> StoreResult<()>;
}
