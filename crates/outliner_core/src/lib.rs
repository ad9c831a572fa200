//! Core tree store for the outliner.
//! This crate is the single source of truth for bullet tree invariants.
//!
//! `Document` keeps an in-memory view of the tree and writes through a
//! `BackingStore`: either `SqliteBackingStore` directly, or a
//! `WriteDelayedBackingStore` that batches writes until flushed.

pub mod db;
pub mod document;
pub mod logging;
pub mod model;
pub mod store;

pub use document::{Document, DocumentError, DocumentResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::bullet::{
    is_placeholder_pbid, Bullet, BulletContent, BulletRecord, BulletType, DocumentId, Pbid, Rbid,
    PLACEHOLDER_PBID_BASE, ROOT_BULLET_PBID, ROOT_BULLET_RBID,
};
pub use store::sqlite::SqliteBackingStore;
pub use store::write_delayed::{QueuedOperation, WriteDelayedBackingStore};
pub use store::{BackingStore, StoreError, StoreResult, TransactionalBackingStore};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
