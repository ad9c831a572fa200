//! Bullet tree domain model.
//!
//! # Responsibility
//! - Define the identity spaces and the node shape shared by document and
//!   storage layers.
//!
//! # Invariants
//! - Durable (`Pbid`) and transient (`Rbid`) identities are never mixed.
//! - Content type tags are part of the on-disk format.

pub mod bullet;
