//! `SQLite`-backed implementation of [`RelationalStore`].

use std::path::{Path, PathBuf};

use rusqlite::{Connection, params_from_iter};

use super::{RelationalStore, StoreConnection, StoreError, StoreResult};

/// `SQLite` database on disk.
///
/// Every [`RelationalStore::connect`] opens a fresh [`Connection`]; there is no pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Store backed by the database file at `path`. Nothing is opened until `connect`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RelationalStore for SqliteStore {
    fn connect(&self) -> StoreResult<Box<dyn StoreConnection>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Connect {
                    message: format!("cannot create '{}': {e}", parent.display()),
                })?;
            }
        }
        let conn = Connection::open(&self.path).map_err(|e| StoreError::Connect {
            message: format!("{}: {e}", self.path.display()),
        })?;
        // Only takes effect on a new database; existing files keep their encoding.
        conn.execute_batch("PRAGMA encoding = 'UTF-8';")
            .map_err(|e| StoreError::Connect {
                message: e.to_string(),
            })?;
        Ok(Box::new(SqliteConnection { conn }))
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

/// A connection that opens a transaction on the first statement after a commit.
struct SqliteConnection {
    conn: Connection,
}

impl StoreConnection for SqliteConnection {
    fn execute(&mut self, statement: &str, params: &[&str]) -> StoreResult<usize> {
        if self.conn.is_autocommit() {
            self.conn
                .execute_batch("BEGIN")
                .map_err(|e| StoreError::Transaction {
                    message: format!("begin: {e}"),
                })?;
        }
        self.conn
            .execute(statement, params_from_iter(params.iter().copied()))
            .map_err(|e| StoreError::Execute {
                message: e.to_string(),
            })
    }

    fn commit(&mut self) -> StoreResult<()> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| StoreError::Transaction {
                message: format!("commit: {e}"),
            })
    }

    fn close(self: Box<Self>) -> StoreResult<()> {
        let SqliteConnection { conn } = *self;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")
                .map_err(|e| StoreError::Transaction {
                    message: format!("rollback: {e}"),
                })?;
        }
        conn.close().map_err(|(_, e)| StoreError::Transaction {
            message: format!("close: {e}"),
        })
    }
}
