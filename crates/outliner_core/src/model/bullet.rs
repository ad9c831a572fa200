//! Bullet domain model.
//!
//! # Responsibility
//! - Define durable and transient bullet identities.
//! - Define bullet content and its stable on-disk type tags.
//! - Define the storage record and its materialized in-memory form.
//!
//! # Invariants
//! - The root bullet always has pbid `ROOT_BULLET_PBID` and occupies slot
//!   `ROOT_BULLET_RBID` in every document.
//! - `BulletType` discriminants never change meaning.
//! - Mirror content is a lookup relation only; it never affects
//!   `parent_pbid` or `children`.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Persistent bullet id, saved to storage.
///
/// Currently the SQLite rowid of the bullet row.
pub type Pbid = u64;

/// Runtime bullet id: index of the bullet's slot in its document.
pub type Rbid = usize;

pub const ROOT_BULLET_PBID: Pbid = 1;
pub const ROOT_BULLET_RBID: Rbid = 0;

/// First pbid of the range handed out for not-yet-persisted bullets.
///
/// Durable stores never allocate ids in `PLACEHOLDER_PBID_BASE..`.
pub const PLACEHOLDER_PBID_BASE: Pbid = 1 << 62;

/// Returns whether `pbid` lies in the placeholder range.
pub fn is_placeholder_pbid(pbid: Pbid) -> bool {
    pbid >= PLACEHOLDER_PBID_BASE
}

/// Handle of the document that owns a materialized bullet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(pub(crate) u64);

/// Content kind tag.
///
/// NOTE: do not change these values, they are a part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i64)]
pub enum BulletType {
    Textual = 1,
    Mirror = 2,
}

impl BulletType {
    /// Integer tag stored in `bullets.content_type`.
    pub fn tag(self) -> i64 {
        self as i64
    }

    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            1 => Some(Self::Textual),
            2 => Some(Self::Mirror),
            _ => None,
        }
    }
}

/// What a bullet displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BulletContent {
    /// Owned text body.
    Textual { text: String },
    /// Shows the content of another bullet in place of its own.
    Mirror { referee: Pbid },
}

impl BulletContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Textual { text: text.into() }
    }

    pub fn mirror(referee: Pbid) -> Self {
        Self::Mirror { referee }
    }

    pub fn bullet_type(&self) -> BulletType {
        match self {
            Self::Textual { .. } => BulletType::Textual,
            Self::Mirror { .. } => BulletType::Mirror,
        }
    }

    /// Returns the text body, if this is textual content.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Textual { text } => Some(text.as_str()),
            Self::Mirror { .. } => None,
        }
    }
}

impl Default for BulletContent {
    fn default() -> Self {
        Self::Textual {
            text: String::new(),
        }
    }
}

/// Bullet as known to a backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulletRecord {
    pub pbid: Pbid,
    /// `None` for the root and for bullets not yet attached to a parent.
    pub parent_pbid: Option<Pbid>,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    /// Epoch ms modification timestamp.
    pub updated_at: i64,
    pub content: BulletContent,
    /// Children pbids in sibling order.
    pub children: Vec<Pbid>,
}

impl BulletRecord {
    /// Record of a freshly inserted bullet: empty text, no parent.
    pub fn empty(pbid: Pbid) -> Self {
        let now = now_epoch_ms();
        Self {
            pbid,
            parent_pbid: None,
            created_at: now,
            updated_at: now,
            content: BulletContent::default(),
            children: Vec::new(),
        }
    }
}

/// Bullet materialized inside a `Document`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bullet {
    /// Owning document; a handle, never an ownership edge.
    pub document: DocumentId,
    pub rbid: Rbid,
    pub pbid: Pbid,
    pub parent_pbid: Option<Pbid>,
    pub created_at: i64,
    pub updated_at: i64,
    pub content: BulletContent,
    pub children: Vec<Pbid>,
    /// Display-only state, never persisted.
    pub expanded: bool,
}

impl Bullet {
    pub(crate) fn from_record(document: DocumentId, rbid: Rbid, record: BulletRecord) -> Self {
        Self {
            document,
            rbid,
            pbid: record.pbid,
            parent_pbid: record.parent_pbid,
            created_at: record.created_at,
            updated_at: record.updated_at,
            content: record.content,
            children: record.children,
            expanded: true,
        }
    }

    pub fn is_root(&self) -> bool {
        self.pbid == ROOT_BULLET_PBID
    }

    /// Position of `pbid` among this bullet's children.
    pub fn child_index(&self, pbid: Pbid) -> Option<usize> {
        self.children.iter().position(|child| *child == pbid)
    }
}

/// Current wall clock in epoch milliseconds.
pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{is_placeholder_pbid, BulletContent, BulletType, PLACEHOLDER_PBID_BASE};

    #[test]
    fn bullet_type_tags_are_stable() {
        assert_eq!(BulletType::Textual.tag(), 1);
        assert_eq!(BulletType::Mirror.tag(), 2);
        assert_eq!(BulletType::from_tag(2), Some(BulletType::Mirror));
        assert_eq!(BulletType::from_tag(0), None);
        assert_eq!(BulletType::from_tag(3), None);
    }

    #[test]
    fn content_reports_matching_type() {
        assert_eq!(BulletContent::text("a").bullet_type(), BulletType::Textual);
        assert_eq!(BulletContent::mirror(7).bullet_type(), BulletType::Mirror);
        assert_eq!(BulletContent::mirror(7).as_text(), None);
    }

    #[test]
    fn placeholder_range_starts_at_base() {
        assert!(!is_placeholder_pbid(1));
        assert!(!is_placeholder_pbid(PLACEHOLDER_PBID_BASE - 1));
        assert!(is_placeholder_pbid(PLACEHOLDER_PBID_BASE));
    }
}
