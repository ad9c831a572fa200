//! Backing store contracts: the persistence boundary of the bullet tree.
//!
//! # Responsibility
//! - Define the durable operations a `Document` depends on.
//! - Define transaction scoping for callers that batch several calls.
//!
//! # Invariants
//! - The root bullet is never inserted or deleted through the contract.
//! - Deleting a bullet never cascades to its children.
//! - Sibling order is expressed only through the two positioning calls:
//!   every position is either "first under parent" or "right after an
//!   existing sibling".

use crate::db::DbError;
use crate::model::bullet::{BulletContent, BulletRecord, Pbid};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod sqlite;
pub mod write_delayed;

/// Result type used by backing store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from backing store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Durable storage could not complete the operation.
    Db(DbError),
    /// Bullet does not exist in storage.
    NotFound(Pbid),
    /// Caller broke the store contract.
    InvalidOperation(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl StoreError {
    /// Whether storage itself failed, as opposed to a contract violation.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Db(_))
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(pbid) => write!(f, "bullet not found: {pbid}"),
            Self::InvalidOperation(message) => write!(f, "invalid store operation: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "bullet store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "bullet store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "bullet store requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid bullet data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Durable operations the bullet tree is built on.
pub trait BackingStore {
    /// Loads one bullet record with its ordered children.
    fn fetch_bullet(&self, pbid: Pbid) -> StoreResult<BulletRecord>;
    /// Loads the parent of one bullet; `None` for root or unattached bullets.
    fn fetch_parent_of_bullet(&self, pbid: Pbid) -> StoreResult<Option<Pbid>>;
    /// Loads children pbids in sibling order.
    fn fetch_children_of_bullet(&self, pbid: Pbid) -> StoreResult<Vec<Pbid>>;
    /// Allocates an unparented bullet with empty textual content.
    fn insert_empty_bullet(&self) -> StoreResult<Pbid>;
    /// Removes one bullet record without touching its children.
    fn delete_bullet(&self, pbid: Pbid) -> StoreResult<()>;
    /// Overwrites one bullet's content.
    fn set_bullet_content(&self, pbid: Pbid, content: &BulletContent) -> StoreResult<()>;
    /// Moves `pbid` under `new_parent`, right after sibling `relative_to`.
    fn set_bullet_position_after(
        &self,
        pbid: Pbid,
        new_parent: Pbid,
        relative_to: Pbid,
    ) -> StoreResult<()>;
    /// Moves `pbid` under `new_parent` as its first child.
    fn set_bullet_position_at_beginning(&self, pbid: Pbid, new_parent: Pbid) -> StoreResult<()>;

    /// Whether writes touching `pbid` were accepted but are not yet
    /// visible to reads.
    ///
    /// Stores that apply every write immediately keep the default.
    fn has_unflushed_writes(&self, _pbid: Pbid) -> bool {
        false
    }
}

/// Backing store that can group several calls into one atomic unit.
///
/// Without an open transaction every call commits on its own.
pub trait TransactionalBackingStore: BackingStore {
    fn begin_transaction(&self) -> StoreResult<()>;
    fn commit_transaction(&self) -> StoreResult<()>;
    fn rollback_transaction(&self) -> StoreResult<()>;
}

impl<S: BackingStore + ?Sized> BackingStore for &S {
    fn fetch_bullet(&self, pbid: Pbid) -> StoreResult<BulletRecord> {
        (**self).fetch_bullet(pbid)
    }

    fn fetch_parent_of_bullet(&self, pbid: Pbid) -> StoreResult<Option<Pbid>> {
        (**self).fetch_parent_of_bullet(pbid)
    }

    fn fetch_children_of_bullet(&self, pbid: Pbid) -> StoreResult<Vec<Pbid>> {
        (**self).fetch_children_of_bullet(pbid)
    }

    fn insert_empty_bullet(&self) -> StoreResult<Pbid> {
        (**self).insert_empty_bullet()
    }

    fn delete_bullet(&self, pbid: Pbid) -> StoreResult<()> {
        (**self).delete_bullet(pbid)
    }

    fn set_bullet_content(&self, pbid: Pbid, content: &BulletContent) -> StoreResult<()> {
        (**self).set_bullet_content(pbid, content)
    }

    fn set_bullet_position_after(
        &self,
        pbid: Pbid,
        new_parent: Pbid,
        relative_to: Pbid,
    ) -> StoreResult<()> {
        (**self).set_bullet_position_after(pbid, new_parent, relative_to)
    }

    fn set_bullet_position_at_beginning(&self, pbid: Pbid, new_parent: Pbid) -> StoreResult<()> {
        (**self).set_bullet_position_at_beginning(pbid, new_parent)
    }

    fn has_unflushed_writes(&self, pbid: Pbid) -> bool {
        (**self).has_unflushed_writes(pbid)
    }
}
