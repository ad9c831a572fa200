//! SQLite bootstrap for the bullet store.
//!
//! # Responsibility
//! - Open outline databases (file or in-memory) with the pragmas the
//!   bullet store relies on.
//! - Bring the `bullets` table to the schema this binary understands.
//!
//! # Invariants
//! - Schema version is tracked via `PRAGMA user_version`; 0 means a fresh
//!   file with no tables.
//! - `SqliteBackingStore::try_new` only accepts connections returned from
//!   here (or migrated the same way), so store code never sees a partial
//!   schema.
//! - Opening a database whose version is newer than this binary fails with
//!   `SchemaVersionMismatch`, and nothing is written to it.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Failures while opening or migrating an outline database.
#[derive(Debug)]
pub enum DbError {
    /// SQLite rejected a statement or could not open the file.
    Sqlite(rusqlite::Error),
    /// The file was written by a newer outliner; it is left untouched.
    SchemaVersionMismatch {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::SchemaVersionMismatch {
                db_version,
                latest_supported,
            } => write!(
                f,
                "outline database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::SchemaVersionMismatch { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
