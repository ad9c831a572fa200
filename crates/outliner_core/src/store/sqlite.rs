//! SQLite implementation of the backing store contract.
//!
//! # Responsibility
//! - Persist bullets, their parent links and sibling order in `bullets`.
//! - Expose explicit transaction scoping for batched writers.
//!
//! # Invariants
//! - Pbids are rowids and are never reused (`AUTOINCREMENT`).
//! - Child listing is deterministic: `sort_order ASC, pbid ASC`.
//! - Repositioning never makes a bullet its own ancestor.
//! - Repositioning renumbers `sort_order` densely from 0 under the new
//!   parent, inside a savepoint so it composes with an open transaction.

use crate::db::migrations::{current_user_version, latest_version};
use crate::model::bullet::{
    is_placeholder_pbid, now_epoch_ms, BulletContent, BulletRecord, BulletType, Pbid,
    ROOT_BULLET_PBID,
};
use crate::store::{BackingStore, StoreError, StoreResult, TransactionalBackingStore};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;

const REPOSITION_SAVEPOINT: &str = "bullet_reposition";

/// SQLite-backed bullet store.
pub struct SqliteBackingStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteBackingStore<'conn> {
    /// Creates store from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_bullet_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Whether an explicit transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn ensure_exists(&self, pbid: Pbid) -> StoreResult<()> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM bullets WHERE pbid = ?1);",
            [pbid_to_db(pbid)?],
            |row| row.get(0),
        )?;
        if exists == 1 {
            Ok(())
        } else {
            Err(StoreError::NotFound(pbid))
        }
    }

    /// Whether `ancestor` lies on the parent chain above `pbid`.
    ///
    /// A chain that reaches a deleted bullet ends there.
    fn is_ancestor(&self, ancestor: Pbid, pbid: Pbid) -> StoreResult<bool> {
        let mut visited = HashSet::new();
        let mut cursor = Some(pbid);
        while let Some(current) = cursor {
            if current == ancestor {
                return Ok(true);
            }
            if !visited.insert(current) {
                return Err(StoreError::InvalidData(format!(
                    "parent chain of bullet {pbid} loops at {current}"
                )));
            }
            cursor = match self.fetch_parent_of_bullet(current) {
                Ok(parent) => parent,
                Err(StoreError::NotFound(_)) => None,
                Err(err) => return Err(err),
            };
        }
        Ok(false)
    }

    /// Places `pbid` at `index` among the children of `new_parent`.
    ///
    /// `relative_to` must already be a child of `new_parent` when given.
    fn reposition(
        &self,
        pbid: Pbid,
        new_parent: Pbid,
        relative_to: Option<Pbid>,
    ) -> StoreResult<()> {
        if pbid == ROOT_BULLET_PBID {
            return Err(StoreError::InvalidOperation(
                "root bullet cannot be repositioned".to_string(),
            ));
        }
        if pbid == new_parent {
            return Err(StoreError::InvalidOperation(format!(
                "bullet {pbid} cannot become its own parent"
            )));
        }
        self.ensure_exists(pbid)?;
        self.ensure_exists(new_parent)?;
        if self.is_ancestor(pbid, new_parent)? {
            return Err(StoreError::InvalidOperation(format!(
                "bullet {pbid} cannot move under its own descendant {new_parent}"
            )));
        }

        with_savepoint(self.conn, REPOSITION_SAVEPOINT, |conn| {
            let mut siblings = list_child_ids(conn, new_parent)?;
            siblings.retain(|id| *id != pbid);

            let target_index = match relative_to {
                None => 0,
                Some(relative_to) => {
                    let position = siblings
                        .iter()
                        .position(|id| *id == relative_to)
                        .ok_or_else(|| {
                            StoreError::InvalidOperation(format!(
                                "bullet {relative_to} is not a child of {new_parent}"
                            ))
                        })?;
                    position + 1
                }
            };
            siblings.insert(target_index, pbid);

            let now = now_epoch_ms();
            conn.execute(
                "UPDATE bullets
                 SET parent_pbid = ?2,
                     updated_at = ?3
                 WHERE pbid = ?1;",
                params![pbid_to_db(pbid)?, pbid_to_db(new_parent)?, now],
            )?;
            for (index, id) in siblings.into_iter().enumerate() {
                conn.execute(
                    "UPDATE bullets
                     SET sort_order = ?2
                     WHERE pbid = ?1;",
                    params![pbid_to_db(id)?, index as i64],
                )?;
            }
            Ok(())
        })?;

        debug!(
            "event=bullet_reposition module=store status=ok pbid={pbid} parent={new_parent} after={}",
            relative_to.map_or_else(|| "none".to_string(), |id| id.to_string())
        );
        Ok(())
    }
}

impl BackingStore for SqliteBackingStore<'_> {
    fn fetch_bullet(&self, pbid: Pbid) -> StoreResult<BulletRecord> {
        let mut stmt = self.conn.prepare(
            "SELECT
                pbid,
                parent_pbid,
                content_type,
                content_text,
                content_mirror,
                created_at,
                updated_at
             FROM bullets
             WHERE pbid = ?1;",
        )?;
        let mut rows = stmt.query([pbid_to_db(pbid)?])?;
        let Some(row) = rows.next()? else {
            return Err(StoreError::NotFound(pbid));
        };
        let mut record = parse_bullet_row(row)?;
        record.children = list_child_ids(self.conn, pbid)?;
        Ok(record)
    }

    fn fetch_parent_of_bullet(&self, pbid: Pbid) -> StoreResult<Option<Pbid>> {
        let parent: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT parent_pbid FROM bullets WHERE pbid = ?1;",
                [pbid_to_db(pbid)?],
                |row| row.get(0),
            )
            .optional()?;
        match parent {
            None => Err(StoreError::NotFound(pbid)),
            Some(parent) => parent
                .map(|value| pbid_from_db(value, "bullets.parent_pbid"))
                .transpose(),
        }
    }

    fn fetch_children_of_bullet(&self, pbid: Pbid) -> StoreResult<Vec<Pbid>> {
        self.ensure_exists(pbid)?;
        list_child_ids(self.conn, pbid)
    }

    fn insert_empty_bullet(&self) -> StoreResult<Pbid> {
        let now = now_epoch_ms();
        self.conn.execute(
            "INSERT INTO bullets (
                parent_pbid,
                sort_order,
                content_type,
                content_text,
                content_mirror,
                created_at,
                updated_at
            ) VALUES (NULL, 0, ?1, '', NULL, ?2, ?2);",
            params![BulletType::Textual.tag(), now],
        )?;
        let pbid = pbid_from_db(self.conn.last_insert_rowid(), "bullets.pbid")?;
        if is_placeholder_pbid(pbid) {
            return Err(StoreError::InvalidData(format!(
                "allocated pbid {pbid} collides with placeholder range"
            )));
        }
        debug!("event=bullet_insert module=store status=ok pbid={pbid}");
        Ok(pbid)
    }

    fn delete_bullet(&self, pbid: Pbid) -> StoreResult<()> {
        if pbid == ROOT_BULLET_PBID {
            return Err(StoreError::InvalidOperation(
                "root bullet cannot be deleted".to_string(),
            ));
        }
        let changed = self
            .conn
            .execute("DELETE FROM bullets WHERE pbid = ?1;", [pbid_to_db(pbid)?])?;
        if changed == 0 {
            return Err(StoreError::NotFound(pbid));
        }
        debug!("event=bullet_delete module=store status=ok pbid={pbid}");
        Ok(())
    }

    fn set_bullet_content(&self, pbid: Pbid, content: &BulletContent) -> StoreResult<()> {
        let (text, mirror) = match content {
            BulletContent::Textual { text } => (Some(text.as_str()), None),
            BulletContent::Mirror { referee } => (None, Some(pbid_to_db(*referee)?)),
        };
        let changed = self.conn.execute(
            "UPDATE bullets
             SET content_type = ?2,
                 content_text = ?3,
                 content_mirror = ?4,
                 updated_at = ?5
             WHERE pbid = ?1;",
            params![
                pbid_to_db(pbid)?,
                content.bullet_type().tag(),
                text,
                mirror,
                now_epoch_ms(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(pbid));
        }
        debug!(
            "event=bullet_set_content module=store status=ok pbid={pbid} content_type={}",
            content.bullet_type().tag()
        );
        Ok(())
    }

    fn set_bullet_position_after(
        &self,
        pbid: Pbid,
        new_parent: Pbid,
        relative_to: Pbid,
    ) -> StoreResult<()> {
        if relative_to == pbid {
            return Err(StoreError::InvalidOperation(format!(
                "bullet {pbid} cannot be positioned after itself"
            )));
        }
        self.reposition(pbid, new_parent, Some(relative_to))
    }

    fn set_bullet_position_at_beginning(&self, pbid: Pbid, new_parent: Pbid) -> StoreResult<()> {
        self.reposition(pbid, new_parent, None)
    }
}

impl TransactionalBackingStore for SqliteBackingStore<'_> {
    fn begin_transaction(&self) -> StoreResult<()> {
        if self.in_transaction() {
            return Err(StoreError::InvalidOperation(
                "transaction already open".to_string(),
            ));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(())
    }

    fn commit_transaction(&self) -> StoreResult<()> {
        if !self.in_transaction() {
            return Err(StoreError::InvalidOperation(
                "no transaction to commit".to_string(),
            ));
        }
        self.conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    fn rollback_transaction(&self) -> StoreResult<()> {
        if !self.in_transaction() {
            return Err(StoreError::InvalidOperation(
                "no transaction to roll back".to_string(),
            ));
        }
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }
}

fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    body: impl FnOnce(&Connection) -> StoreResult<T>,
) -> StoreResult<T> {
    conn.execute_batch(&format!("SAVEPOINT {name};"))?;
    match body(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {name};"))?;
            Ok(value)
        }
        Err(err) => {
            conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"))?;
            Err(err)
        }
    }
}

fn list_child_ids(conn: &Connection, parent: Pbid) -> StoreResult<Vec<Pbid>> {
    let mut stmt = conn.prepare(
        "SELECT pbid
         FROM bullets
         WHERE parent_pbid = ?1
         ORDER BY sort_order ASC, pbid ASC;",
    )?;
    let mut rows = stmt.query([pbid_to_db(parent)?])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        ids.push(pbid_from_db(row.get(0)?, "bullets.pbid")?);
    }
    Ok(ids)
}

fn parse_bullet_row(row: &Row<'_>) -> StoreResult<BulletRecord> {
    let pbid = pbid_from_db(row.get("pbid")?, "bullets.pbid")?;
    let parent_pbid = row
        .get::<_, Option<i64>>("parent_pbid")?
        .map(|value| pbid_from_db(value, "bullets.parent_pbid"))
        .transpose()?;

    let type_tag: i64 = row.get("content_type")?;
    let content = match BulletType::from_tag(type_tag) {
        Some(BulletType::Textual) => BulletContent::Textual {
            text: row
                .get::<_, Option<String>>("content_text")?
                .unwrap_or_default(),
        },
        Some(BulletType::Mirror) => {
            let referee = row
                .get::<_, Option<i64>>("content_mirror")?
                .ok_or_else(|| {
                    StoreError::InvalidData(format!(
                        "mirror bullet {pbid} has no referee in bullets.content_mirror"
                    ))
                })?;
            BulletContent::Mirror {
                referee: pbid_from_db(referee, "bullets.content_mirror")?,
            }
        }
        None => {
            return Err(StoreError::InvalidData(format!(
                "invalid content type `{type_tag}` in bullets.content_type"
            )));
        }
    };

    Ok(BulletRecord {
        pbid,
        parent_pbid,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        content,
        children: Vec::new(),
    })
}

fn pbid_to_db(pbid: Pbid) -> StoreResult<i64> {
    i64::try_from(pbid).map_err(|_| StoreError::NotFound(pbid))
}

fn pbid_from_db(value: i64, column: &'static str) -> StoreResult<Pbid> {
    Pbid::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid pbid `{value}` in {column}")))
}

fn ensure_bullet_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, "bullets")? {
        return Err(StoreError::MissingRequiredTable("bullets"));
    }

    for column in [
        "pbid",
        "parent_pbid",
        "sort_order",
        "content_type",
        "content_text",
        "content_mirror",
        "created_at",
        "updated_at",
    ] {
        if !table_has_column(conn, "bullets", column)? {
            return Err(StoreError::MissingRequiredColumn {
                table: "bullets",
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::{pbid_from_db, pbid_to_db};
    use crate::store::StoreError;

    #[test]
    fn pbid_conversion_rejects_out_of_range_values() {
        assert_eq!(pbid_to_db(42).expect("small pbid fits"), 42);
        assert!(matches!(pbid_to_db(u64::MAX), Err(StoreError::NotFound(_))));
        assert!(matches!(
            pbid_from_db(-1, "bullets.pbid"),
            Err(StoreError::InvalidData(_))
        ));
    }
}
