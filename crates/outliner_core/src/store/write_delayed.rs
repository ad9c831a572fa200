//! Write-delaying decorator over a transactional backing store.
//!
//! # Responsibility
//! - Queue mutating calls and replay them later in one transaction.
//! - Hand out placeholder pbids for deferred inserts and rewrite them to
//!   real pbids while replaying.
//! - Forward reads to the wrapped store.
//!
//! # Invariants
//! - Queued operations replay in call order.
//! - A failed flush rolls the wrapped store back and leaves the queue and
//!   the placeholder table exactly as they were.
//! - Once resolved, a placeholder stays an alias of its real pbid for the
//!   lifetime of the decorator, in both directions.
//! - Reads never observe queued writes: they see flushed state only, and a
//!   read of an unflushed placeholder is `NotFound`.
//! - `NotFound` from a read names the pbid the caller passed in.

use crate::model::bullet::{
    is_placeholder_pbid, BulletContent, BulletRecord, Pbid, PLACEHOLDER_PBID_BASE,
    ROOT_BULLET_PBID,
};
use crate::store::{BackingStore, StoreError, StoreResult, TransactionalBackingStore};
use log::{debug, error, info, warn};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Instant;

/// One deferred mutating call, as issued by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedOperation {
    InsertEmptyBullet {
        placeholder: Pbid,
    },
    DeleteBullet {
        pbid: Pbid,
    },
    SetBulletContent {
        pbid: Pbid,
        content: BulletContent,
    },
    SetBulletPositionAfter {
        pbid: Pbid,
        new_parent: Pbid,
        relative_to: Pbid,
    },
    SetBulletPositionAtBeginning {
        pbid: Pbid,
        new_parent: Pbid,
    },
}

impl QueuedOperation {
    fn name(&self) -> &'static str {
        match self {
            Self::InsertEmptyBullet { .. } => "insert_empty_bullet",
            Self::DeleteBullet { .. } => "delete_bullet",
            Self::SetBulletContent { .. } => "set_bullet_content",
            Self::SetBulletPositionAfter { .. } => "set_bullet_position_after",
            Self::SetBulletPositionAtBeginning { .. } => "set_bullet_position_at_beginning",
        }
    }

    /// Every bullet whose stored state this operation changes, including
    /// parents whose child lists it edits.
    fn touched_pbids(&self) -> Vec<Pbid> {
        match self {
            Self::InsertEmptyBullet { placeholder } => vec![*placeholder],
            Self::DeleteBullet { pbid } | Self::SetBulletContent { pbid, .. } => vec![*pbid],
            Self::SetBulletPositionAfter {
                pbid,
                new_parent,
                relative_to,
            } => vec![*pbid, *new_parent, *relative_to],
            Self::SetBulletPositionAtBeginning { pbid, new_parent } => vec![*pbid, *new_parent],
        }
    }
}

/// Two-way mapping between placeholders and the pbids they resolved to.
#[derive(Debug, Default)]
struct PbidAliases {
    real_by_placeholder: HashMap<Pbid, Pbid>,
    placeholder_by_real: HashMap<Pbid, Pbid>,
}

impl PbidAliases {
    fn record(&mut self, placeholder: Pbid, real: Pbid) {
        self.real_by_placeholder.insert(placeholder, real);
        self.placeholder_by_real.insert(real, placeholder);
    }

    fn real(&self, placeholder: Pbid) -> Option<Pbid> {
        self.real_by_placeholder.get(&placeholder).copied()
    }

    fn visible(&self, real: Pbid) -> Pbid {
        self.placeholder_by_real
            .get(&real)
            .copied()
            .unwrap_or(real)
    }
}

/// Backing store that buffers writes until `flush_ops`.
pub struct WriteDelayedBackingStore<'s, S: TransactionalBackingStore + ?Sized> {
    receiver: &'s S,
    queued_ops: RefCell<Vec<QueuedOperation>>,
    next_placeholder: Cell<Pbid>,
    aliases: RefCell<PbidAliases>,
    flushing: Cell<bool>,
}

impl<'s, S: TransactionalBackingStore + ?Sized> WriteDelayedBackingStore<'s, S> {
    pub fn new(receiver: &'s S) -> Self {
        Self {
            receiver,
            queued_ops: RefCell::new(Vec::new()),
            next_placeholder: Cell::new(PLACEHOLDER_PBID_BASE),
            aliases: RefCell::new(PbidAliases::default()),
            flushing: Cell::new(false),
        }
    }

    /// Number of queued operations not yet applied to the wrapped store.
    pub fn unflushed_ops_count(&self) -> usize {
        self.queued_ops.borrow().len()
    }

    /// Snapshot of the queue, oldest first.
    pub fn queued_ops(&self) -> Vec<QueuedOperation> {
        self.queued_ops.borrow().clone()
    }

    /// Discards every queued operation without applying it.
    ///
    /// Placeholders handed out by discarded inserts never resolve.
    pub fn clear_ops(&self) {
        let discarded = std::mem::take(&mut *self.queued_ops.borrow_mut()).len();
        info!("event=write_delay_clear module=store status=ok discarded={discarded}");
    }

    /// Real pbid behind `pbid`, if it is a resolved placeholder.
    pub fn resolved_pbid(&self, pbid: Pbid) -> Option<Pbid> {
        self.aliases.borrow().real(pbid)
    }

    /// Replays the queue against the wrapped store inside one transaction.
    ///
    /// Returns the number of operations applied. On failure the wrapped
    /// store is rolled back and the queue is kept for retry or
    /// `clear_ops`.
    pub fn flush_ops(&self) -> StoreResult<usize> {
        if self.flushing.replace(true) {
            return Err(StoreError::InvalidOperation(
                "flush already in progress".to_string(),
            ));
        }
        let result = self.flush_queued();
        self.flushing.set(false);
        result
    }

    fn flush_queued(&self) -> StoreResult<usize> {
        let ops = self.queued_ops();
        if ops.is_empty() {
            return Ok(0);
        }

        let started_at = Instant::now();
        info!(
            "event=write_delay_flush module=store status=start ops={}",
            ops.len()
        );

        self.receiver.begin_transaction()?;
        let mut resolved = HashMap::new();
        let outcome = self
            .replay(&ops, &mut resolved)
            .and_then(|()| self.receiver.commit_transaction());

        if let Err(err) = outcome {
            if let Err(rollback_err) = self.receiver.rollback_transaction() {
                warn!(
                    "event=write_delay_flush module=store status=rollback_failed error={rollback_err}"
                );
            }
            error!(
                "event=write_delay_flush module=store status=error ops={} duration_ms={} error={}",
                ops.len(),
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }

        {
            let mut aliases = self.aliases.borrow_mut();
            for (placeholder, real) in resolved {
                aliases.record(placeholder, real);
            }
        }
        // Calls queued while replaying stay behind the flushed prefix.
        self.queued_ops.borrow_mut().drain(..ops.len());

        info!(
            "event=write_delay_flush module=store status=ok ops={} duration_ms={}",
            ops.len(),
            started_at.elapsed().as_millis()
        );
        Ok(ops.len())
    }

    fn replay(
        &self,
        ops: &[QueuedOperation],
        resolved: &mut HashMap<Pbid, Pbid>,
    ) -> StoreResult<()> {
        for (index, op) in ops.iter().enumerate() {
            debug!(
                "event=write_delay_replay module=store index={index} op={}",
                op.name()
            );
            match op {
                QueuedOperation::InsertEmptyBullet { placeholder } => {
                    let real = self.receiver.insert_empty_bullet()?;
                    resolved.insert(*placeholder, real);
                }
                QueuedOperation::DeleteBullet { pbid } => {
                    self.receiver
                        .delete_bullet(self.rewrite(*pbid, resolved)?)?;
                }
                QueuedOperation::SetBulletContent { pbid, content } => {
                    let content = match content {
                        BulletContent::Mirror { referee } => BulletContent::Mirror {
                            referee: self.rewrite(*referee, resolved)?,
                        },
                        textual => textual.clone(),
                    };
                    self.receiver
                        .set_bullet_content(self.rewrite(*pbid, resolved)?, &content)?;
                }
                QueuedOperation::SetBulletPositionAfter {
                    pbid,
                    new_parent,
                    relative_to,
                } => {
                    self.receiver.set_bullet_position_after(
                        self.rewrite(*pbid, resolved)?,
                        self.rewrite(*new_parent, resolved)?,
                        self.rewrite(*relative_to, resolved)?,
                    )?;
                }
                QueuedOperation::SetBulletPositionAtBeginning { pbid, new_parent } => {
                    self.receiver.set_bullet_position_at_beginning(
                        self.rewrite(*pbid, resolved)?,
                        self.rewrite(*new_parent, resolved)?,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Substitutes a placeholder with its real pbid during replay.
    fn rewrite(&self, pbid: Pbid, resolved: &HashMap<Pbid, Pbid>) -> StoreResult<Pbid> {
        if !is_placeholder_pbid(pbid) {
            return Ok(pbid);
        }
        resolved
            .get(&pbid)
            .copied()
            .or_else(|| self.aliases.borrow().real(pbid))
            .ok_or(StoreError::NotFound(pbid))
    }

    /// Maps a caller pbid to the wrapped store's pbid for reads.
    fn durable_pbid(&self, pbid: Pbid) -> StoreResult<Pbid> {
        self.rewrite(pbid, &HashMap::new())
    }

    /// Resolved placeholders and their real pbids share one key.
    fn durable_key(&self, pbid: Pbid) -> Pbid {
        self.aliases.borrow().real(pbid).unwrap_or(pbid)
    }

    fn visible_pbid(&self, real: Pbid) -> Pbid {
        self.aliases.borrow().visible(real)
    }

    fn enqueue(&self, op: QueuedOperation) {
        debug!("event=write_delay_enqueue module=store op={}", op.name());
        self.queued_ops.borrow_mut().push(op);
    }
}

impl<S: TransactionalBackingStore + ?Sized> BackingStore for WriteDelayedBackingStore<'_, S> {
    fn fetch_bullet(&self, pbid: Pbid) -> StoreResult<BulletRecord> {
        let mut record = self
            .receiver
            .fetch_bullet(self.durable_pbid(pbid)?)
            .map_err(|err| reported_as(err, pbid))?;
        record.pbid = self.visible_pbid(record.pbid);
        record.parent_pbid = record.parent_pbid.map(|parent| self.visible_pbid(parent));
        for child in &mut record.children {
            *child = self.visible_pbid(*child);
        }
        if let BulletContent::Mirror { referee } = &mut record.content {
            *referee = self.visible_pbid(*referee);
        }
        Ok(record)
    }

    fn fetch_parent_of_bullet(&self, pbid: Pbid) -> StoreResult<Option<Pbid>> {
        let parent = self
            .receiver
            .fetch_parent_of_bullet(self.durable_pbid(pbid)?)
            .map_err(|err| reported_as(err, pbid))?;
        Ok(parent.map(|parent| self.visible_pbid(parent)))
    }

    fn fetch_children_of_bullet(&self, pbid: Pbid) -> StoreResult<Vec<Pbid>> {
        let children = self
            .receiver
            .fetch_children_of_bullet(self.durable_pbid(pbid)?)
            .map_err(|err| reported_as(err, pbid))?;
        Ok(children
            .into_iter()
            .map(|child| self.visible_pbid(child))
            .collect())
    }

    fn insert_empty_bullet(&self) -> StoreResult<Pbid> {
        let placeholder = self.next_placeholder.get();
        self.next_placeholder.set(placeholder + 1);
        self.enqueue(QueuedOperation::InsertEmptyBullet { placeholder });
        Ok(placeholder)
    }

    fn delete_bullet(&self, pbid: Pbid) -> StoreResult<()> {
        if pbid == ROOT_BULLET_PBID {
            return Err(StoreError::InvalidOperation(
                "root bullet cannot be deleted".to_string(),
            ));
        }
        self.enqueue(QueuedOperation::DeleteBullet { pbid });
        Ok(())
    }

    fn set_bullet_content(&self, pbid: Pbid, content: &BulletContent) -> StoreResult<()> {
        self.enqueue(QueuedOperation::SetBulletContent {
            pbid,
            content: content.clone(),
        });
        Ok(())
    }

    fn set_bullet_position_after(
        &self,
        pbid: Pbid,
        new_parent: Pbid,
        relative_to: Pbid,
    ) -> StoreResult<()> {
        self.enqueue(QueuedOperation::SetBulletPositionAfter {
            pbid,
            new_parent,
            relative_to,
        });
        Ok(())
    }

    fn set_bullet_position_at_beginning(&self, pbid: Pbid, new_parent: Pbid) -> StoreResult<()> {
        self.enqueue(QueuedOperation::SetBulletPositionAtBeginning { pbid, new_parent });
        Ok(())
    }

    fn has_unflushed_writes(&self, pbid: Pbid) -> bool {
        let target = self.durable_key(pbid);
        self.queued_ops
            .borrow()
            .iter()
            .flat_map(QueuedOperation::touched_pbids)
            .any(|touched| self.durable_key(touched) == target)
    }
}

/// Reports a wrapped-store `NotFound` under the pbid the caller used.
fn reported_as(err: StoreError, pbid: Pbid) -> StoreError {
    match err {
        StoreError::NotFound(_) => StoreError::NotFound(pbid),
        other => other,
    }
}
