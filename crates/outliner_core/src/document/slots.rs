//! Slot arena indexed by transient bullet id.
//!
//! # Invariants
//! - `rbid_by_pbid` has an entry iff the slot it points to is occupied.
//! - `free_rbids.len() + live_count() == slots.len()`.
//! - A freed rbid is handed out again before the arena grows.

use crate::model::bullet::{Bullet, Pbid, Rbid};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct BulletSlots {
    slots: Vec<Option<Bullet>>,
    free_rbids: Vec<Rbid>,
    rbid_by_pbid: HashMap<Pbid, Rbid>,
}

impl BulletSlots {
    pub(crate) fn get(&self, rbid: Rbid) -> Option<&Bullet> {
        self.slots.get(rbid).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, rbid: Rbid) -> Option<&mut Bullet> {
        self.slots.get_mut(rbid).and_then(Option::as_mut)
    }

    pub(crate) fn rbid_of(&self, pbid: Pbid) -> Option<Rbid> {
        self.rbid_by_pbid.get(&pbid).copied()
    }

    /// Places a bullet built for its slot id into a recycled or new slot.
    pub(crate) fn store(&mut self, build: impl FnOnce(Rbid) -> Bullet) -> Rbid {
        let rbid = match self.free_rbids.pop() {
            Some(rbid) => rbid,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        let bullet = build(rbid);
        self.rbid_by_pbid.insert(bullet.pbid, rbid);
        self.slots[rbid] = Some(bullet);
        rbid
    }

    /// Empties one slot and returns it to the free list.
    pub(crate) fn evict(&mut self, rbid: Rbid) -> Option<Bullet> {
        let bullet = self.slots.get_mut(rbid)?.take()?;
        self.rbid_by_pbid.remove(&bullet.pbid);
        self.free_rbids.push(rbid);
        Some(bullet)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Bullet> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free_rbids.len()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.rbid_by_pbid.len()
    }
}
