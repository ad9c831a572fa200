//! In-memory bullet tree backed by a `BackingStore`.
//!
//! # Responsibility
//! - Materialize persisted bullets lazily into a slot arena.
//! - Route every tree mutation through the injected backing store.
//!
//! # Invariants
//! - The root bullet is materialized at construction and always occupies
//!   slot `ROOT_BULLET_RBID`.
//! - Mutations call the backing store first; in-memory state changes only
//!   after the store call succeeded, so a failed call leaves the document
//!   untouched.
//! - A child's pbid appears in its materialized parent's `children` exactly
//!   once.
//! - Deletes are shallow: children of a deleted bullet keep pointing at
//!   the vanished parent pbid. Removing a subtree is the caller's job.
//! - A bullet with unflushed store writes stays materialized, so the cached
//!   copy is the only view of those writes.
//! - A document is used from one thread at a time.

mod slots;

use crate::model::bullet::{
    now_epoch_ms, Bullet, BulletRecord, DocumentId, Pbid, Rbid, ROOT_BULLET_PBID,
    ROOT_BULLET_RBID,
};
use crate::store::{BackingStore, StoreError};
use log::debug;
use slots::BulletSlots;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Result type used by document operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Errors from document operations.
#[derive(Debug)]
pub enum DocumentError {
    /// Bullet does not exist in the backing store.
    NotFound(Pbid),
    /// No materialized bullet occupies this slot.
    UnknownBullet(Rbid),
    /// The root bullet cannot be deleted.
    RootDeletion,
    /// The root bullet cannot be moved.
    RootReparent,
    /// The root bullet cannot be evicted from the cache.
    RootEviction,
    /// Bullet has writes the store accepted but cannot read back yet.
    UnflushedWrites(Pbid),
    /// Reparent would make a bullet its own ancestor.
    CycleDetected { bullet: Pbid, parent: Pbid },
    /// Backing store failure.
    Store(StoreError),
}

impl DocumentError {
    /// Whether the caller broke the document contract.
    pub fn is_invalid_operation(&self) -> bool {
        match self {
            Self::UnknownBullet(_)
            | Self::RootDeletion
            | Self::RootReparent
            | Self::RootEviction
            | Self::UnflushedWrites(_)
            | Self::CycleDetected { .. } => true,
            Self::Store(StoreError::InvalidOperation(_)) => true,
            Self::NotFound(_) | Self::Store(_) => false,
        }
    }
}

impl Display for DocumentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(pbid) => write!(f, "bullet not found: {pbid}"),
            Self::UnknownBullet(rbid) => write!(f, "no bullet materialized in slot {rbid}"),
            Self::RootDeletion => write!(f, "root bullet cannot be deleted"),
            Self::RootReparent => write!(f, "root bullet cannot be reparented"),
            Self::RootEviction => write!(f, "root bullet cannot be evicted"),
            Self::UnflushedWrites(pbid) => {
                write!(f, "bullet {pbid} has unflushed writes and cannot be evicted")
            }
            Self::CycleDetected { bullet, parent } => write!(
                f,
                "reparent would create cycle: bullet {bullet} under parent {parent}"
            ),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DocumentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for DocumentError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(pbid) => Self::NotFound(pbid),
            other => Self::Store(other),
        }
    }
}

/// Materialized view of a persisted bullet tree.
///
/// `S` is usually a shared reference to a store, so several documents (or
/// a document and a flushing caller) can use one store.
pub struct Document<S: BackingStore> {
    id: DocumentId,
    store: S,
    slots: BulletSlots,
}

impl<S: BackingStore> Document<S> {
    /// Creates a document and materializes the root bullet.
    pub fn new(store: S) -> DocumentResult<Self> {
        let id = DocumentId(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed));
        let root = store.fetch_bullet(ROOT_BULLET_PBID)?;
        let mut slots = BulletSlots::default();
        let rbid = slots.store(|rbid| Bullet::from_record(id, rbid, root));
        debug_assert_eq!(rbid, ROOT_BULLET_RBID);
        debug!("event=document_open module=document status=ok document={}", id.0);
        Ok(Self { id, store, slots })
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    /// Whether `bullet` is the bullet materialized in this document's slot.
    pub fn owns(&self, bullet: &Bullet) -> bool {
        bullet.document == self.id
            && self
                .slots
                .get(bullet.rbid)
                .is_some_and(|slot| slot.pbid == bullet.pbid)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn get_root(&self) -> &Bullet {
        self.slots
            .get(ROOT_BULLET_RBID)
            .expect("root bullet slot is never evicted")
    }

    pub fn get_root_mut(&mut self) -> &mut Bullet {
        self.slots
            .get_mut(ROOT_BULLET_RBID)
            .expect("root bullet slot is never evicted")
    }

    pub fn get_bullet_by_rbid(&self, rbid: Rbid) -> Option<&Bullet> {
        self.slots.get(rbid)
    }

    pub fn get_bullet_by_rbid_mut(&mut self, rbid: Rbid) -> Option<&mut Bullet> {
        self.slots.get_mut(rbid)
    }

    /// Looks up a materialized bullet; never reads the backing store.
    pub fn get_bullet_by_pbid(&self, pbid: Pbid) -> Option<&Bullet> {
        self.slots.rbid_of(pbid).and_then(|rbid| self.slots.get(rbid))
    }

    pub fn get_bullet_by_pbid_mut(&mut self, pbid: Pbid) -> Option<&mut Bullet> {
        let rbid = self.slots.rbid_of(pbid)?;
        self.slots.get_mut(rbid)
    }

    /// Returns the bullet, materializing it from the backing store if needed.
    ///
    /// # Errors
    /// - `NotFound` when the store has no such bullet.
    pub fn fetch_bullet_by_pbid(&mut self, pbid: Pbid) -> DocumentResult<&mut Bullet> {
        if let Some(rbid) = self.slots.rbid_of(pbid) {
            return self.bullet_mut(rbid);
        }

        let record = self.store.fetch_bullet(pbid)?;
        if let Some(rbid) = self.slots.rbid_of(record.pbid) {
            return self.bullet_mut(rbid);
        }
        let rbid = self.materialize(record);
        self.bullet_mut(rbid)
    }

    /// Creates an empty, unparented bullet.
    ///
    /// The caller is expected to attach it with `reparent_bullet`.
    pub fn create_bullet(&mut self) -> DocumentResult<&mut Bullet> {
        let pbid = self.store.insert_empty_bullet()?;
        let rbid = self.materialize(BulletRecord::empty(pbid));
        debug!("event=bullet_create module=document status=ok pbid={pbid} rbid={rbid}");
        self.bullet_mut(rbid)
    }

    /// Deletes one bullet from storage and from the cache.
    ///
    /// Children are left in place with a dangling `parent_pbid`.
    pub fn delete_bullet(&mut self, rbid: Rbid) -> DocumentResult<()> {
        let bullet = self.bullet(rbid)?;
        if bullet.is_root() {
            return Err(DocumentError::RootDeletion);
        }
        let (pbid, parent_pbid) = (bullet.pbid, bullet.parent_pbid);

        self.store.delete_bullet(pbid)?;

        if let Some(parent) = parent_pbid.and_then(|parent| self.get_bullet_by_pbid_mut(parent)) {
            parent.children.retain(|child| *child != pbid);
        }
        self.slots.evict(rbid);
        debug!("event=bullet_delete module=document status=ok pbid={pbid} rbid={rbid}");
        Ok(())
    }

    /// Writes the bullet's in-memory content to storage.
    ///
    /// `content` must already hold the new value.
    pub fn update_bullet_content(&mut self, rbid: Rbid) -> DocumentResult<()> {
        let bullet = self.bullet(rbid)?;
        self.store
            .set_bullet_content(bullet.pbid, &bullet.content)?;
        self.bullet_mut(rbid)?.updated_at = now_epoch_ms();
        Ok(())
    }

    /// Moves a bullet under `new_parent_rbid` at position `index`.
    ///
    /// `index` is clamped to the number of siblings. Nothing changes when
    /// the move is rejected.
    ///
    /// # Errors
    /// - `RootReparent` when moving the root.
    /// - `CycleDetected` when the new parent is the bullet or one of its
    ///   descendants.
    pub fn reparent_bullet(
        &mut self,
        rbid: Rbid,
        new_parent_rbid: Rbid,
        index: usize,
    ) -> DocumentResult<()> {
        let bullet = self.bullet(rbid)?;
        if bullet.is_root() {
            return Err(DocumentError::RootReparent);
        }
        let (pbid, old_parent_pbid) = (bullet.pbid, bullet.parent_pbid);
        let new_parent = self.bullet(new_parent_rbid)?;
        let new_parent_pbid = new_parent.pbid;
        let mut siblings = new_parent.children.clone();

        if self.would_create_cycle(pbid, new_parent_pbid)? {
            return Err(DocumentError::CycleDetected {
                bullet: pbid,
                parent: new_parent_pbid,
            });
        }

        siblings.retain(|child| *child != pbid);
        let index = index.min(siblings.len());
        match index {
            0 => self
                .store
                .set_bullet_position_at_beginning(pbid, new_parent_pbid)?,
            _ => self
                .store
                .set_bullet_position_after(pbid, new_parent_pbid, siblings[index - 1])?,
        }

        if let Some(old_parent) =
            old_parent_pbid.and_then(|parent| self.get_bullet_by_pbid_mut(parent))
        {
            old_parent.children.retain(|child| *child != pbid);
        }
        siblings.insert(index, pbid);
        self.bullet_mut(new_parent_rbid)?.children = siblings;
        self.bullet_mut(rbid)?.parent_pbid = Some(new_parent_pbid);
        debug!(
            "event=bullet_reparent module=document status=ok pbid={pbid} parent={new_parent_pbid} index={index}"
        );
        Ok(())
    }

    /// Drops a bullet from the cache without touching storage.
    ///
    /// A later `fetch_bullet_by_pbid` reads it back from the store.
    ///
    /// # Errors
    /// - `UnflushedWrites` while the store holds writes for the bullet that
    ///   its reads do not reflect yet; reloading it would lose them.
    pub fn evict_bullet(&mut self, rbid: Rbid) -> DocumentResult<()> {
        let bullet = self.bullet(rbid)?;
        if bullet.is_root() {
            return Err(DocumentError::RootEviction);
        }
        if self.store.has_unflushed_writes(bullet.pbid) {
            return Err(DocumentError::UnflushedWrites(bullet.pbid));
        }
        self.slots.evict(rbid);
        Ok(())
    }

    /// Materialized bullets in slot order.
    pub fn bullets(&self) -> impl Iterator<Item = &Bullet> {
        self.slots.iter()
    }

    /// Number of slots ever allocated, occupied or free.
    pub fn slot_count(&self) -> usize {
        self.slots.slot_count()
    }

    pub fn free_slot_count(&self) -> usize {
        self.slots.free_count()
    }

    pub fn live_bullet_count(&self) -> usize {
        self.slots.live_count()
    }

    fn bullet(&self, rbid: Rbid) -> DocumentResult<&Bullet> {
        self.slots.get(rbid).ok_or(DocumentError::UnknownBullet(rbid))
    }

    fn bullet_mut(&mut self, rbid: Rbid) -> DocumentResult<&mut Bullet> {
        self.slots
            .get_mut(rbid)
            .ok_or(DocumentError::UnknownBullet(rbid))
    }

    fn materialize(&mut self, record: BulletRecord) -> Rbid {
        let id = self.id;
        self.slots
            .store(|rbid| Bullet::from_record(id, rbid, record))
    }

    /// Walks up from `candidate_parent` looking for `pbid`.
    ///
    /// Ancestors that are not materialized are read from the store; a
    /// chain ending at a vanished bullet has no cycle.
    fn would_create_cycle(&self, pbid: Pbid, candidate_parent: Pbid) -> DocumentResult<bool> {
        let mut visited = HashSet::new();
        let mut cursor = Some(candidate_parent);
        while let Some(current) = cursor {
            if current == pbid || !visited.insert(current) {
                return Ok(true);
            }
            cursor = match self.get_bullet_by_pbid(current) {
                Some(bullet) => bullet.parent_pbid,
                None => match self.store.fetch_parent_of_bullet(current) {
                    Ok(parent) => parent,
                    Err(StoreError::NotFound(_)) => None,
                    Err(err) => return Err(err.into()),
                },
            };
        }
        Ok(false)
    }
}
