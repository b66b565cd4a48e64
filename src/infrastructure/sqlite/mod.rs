//! SQLite-backed relational store shared by the currency registry and the
//! staging ledger.

pub mod registry;
pub mod staging;

use crate::domain::note::NoteStatus;
use crate::error::{CashierError, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, Params};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A shared SQLite connection.
///
/// `Clone` shares the underlying connection. Statements run synchronously
/// while the connection mutex is held, so callers must never keep the guard
/// across an `.await`.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens or creates a database file and ensures the schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::initialize(Connection::open(path)?)
    }

    /// Creates a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn connection(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the guard leaves no half-applied transaction
        // behind: rusqlite rolls back on drop.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ToSql for NoteStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for NoteStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse::<NoteStatus>()
            .map_err(|e: CashierError| FromSqlError::Other(Box::new(e)))
    }
}

/// Number of rows a staging statement must affect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rows {
    AtLeast(usize),
    Exactly(usize),
    AtMost(usize),
}

impl Rows {
    fn admits(self, affected: usize) -> bool {
        match self {
            Rows::AtLeast(min) => affected >= min,
            Rows::Exactly(count) => affected == count,
            Rows::AtMost(max) => affected <= max,
        }
    }
}

impl fmt::Display for Rows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rows::AtLeast(min) => write!(f, ">= {min}"),
            Rows::Exactly(count) => write!(f, "exactly {count}"),
            Rows::AtMost(max) => write!(f, "<= {max}"),
        }
    }
}

/// Runs one statement of a staging transaction and checks its row count.
///
/// A mismatch means the local store and the currency authority disagree; it
/// is reported as [`CashierError::SafeIntegrity`] so the enclosing
/// transaction is rolled back.
pub(crate) fn execute_expecting<P: Params>(
    conn: &Connection,
    step: &str,
    sql: &str,
    params: P,
    expected: Rows,
) -> Result<usize> {
    let affected = conn.execute(sql, params)?;
    if !expected.admits(affected) {
        let message = format!("{step} affected {affected} records instead of {expected}");
        debug!(step, affected, %expected, "unexpected row count");
        return Err(CashierError::SafeIntegrity(message));
    }
    debug!(step, affected, "staging statement applied");
    Ok(affected)
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cashier.db");
        SqliteStore::open(&path).unwrap();
        let store = SqliteStore::open(&path).unwrap();

        let tables: i64 = store
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('currencies', 'counter', 'safe', 'user2money')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_rows_admits() {
        assert!(Rows::AtLeast(1).admits(3));
        assert!(!Rows::AtLeast(1).admits(0));
        assert!(Rows::Exactly(1).admits(1));
        assert!(!Rows::Exactly(1).admits(2));
        assert!(Rows::AtMost(1).admits(0));
        assert!(!Rows::AtMost(1).admits(2));
    }

    #[test]
    fn test_execute_expecting_reports_shortfall() {
        let store = SqliteStore::in_memory().unwrap();
        let conn = store.connection();
        let result = execute_expecting(
            &conn,
            "delete safe",
            "DELETE FROM safe WHERE currency_serial = ?1",
            [1],
            Rows::Exactly(1),
        );
        match result {
            Err(CashierError::SafeIntegrity(message)) => {
                assert_eq!(message, "delete safe affected 0 records instead of exactly 1")
            }
            other => panic!("expected SafeIntegrity, got {other:?}"),
        }
    }

    #[test]
    fn test_note_status_column_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let conn = store.connection();
        let status: NoteStatus = conn
            .query_row("SELECT ?1", [NoteStatus::Remainder], |row| row.get(0))
            .unwrap();
        assert_eq!(status, NoteStatus::Remainder);
    }
}
