//! Schema migrations for the `bullets` table.
//!
//! # Responsibility
//! - List every schema step the outline database has gone through.
//! - Apply the missing steps to a database in one transaction.
//!
//! # Invariants
//! - Versions start at 1 and increase by one per step; a step is never
//!   edited once released, later layout changes append a new step.
//! - After a successful run `PRAGMA user_version` equals the last applied
//!   step. A failed run leaves both the schema and the version untouched.
//! - Step 1 creates `bullets` with its sibling-order index and seeds the
//!   root bullet at `ROOT_BULLET_PBID`, so every migrated database has a
//!   root before any store call runs.

use crate::db::{DbError, DbResult};
use rusqlite::Connection;

/// One released schema step.
#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("0001_init.sql"),
}];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Brings `conn` up to `latest_version()`.
///
/// # Errors
/// - `SchemaVersionMismatch` when the database is newer than this binary.
/// - `Sqlite` when a step fails; the transaction is rolled back.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let current_version = current_user_version(conn)?;
    let latest = latest_version();

    if current_version > latest {
        return Err(DbError::SchemaVersionMismatch {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;

    Ok(())
}

/// Reads `PRAGMA user_version` from the connection.
pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
