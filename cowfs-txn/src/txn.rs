//! The transaction object and its six-step commit protocol (§4.3).

use std::collections::HashMap;

use cowfs_btree::{Btree, CachedNode, LockOrderKey};
use cowfs_journal::{Journal, UpdateRecord};
use cowfs_types::{BtreeId, DeviceSet, Error, Key, Position, RestartReason, Result, Writer};

use crate::arena::Arena;
use crate::update::StagedUpdate;

/// Runs for the arena's span; a caller-supplied closure appended via
/// [`Transaction::add_precommit_hook`] that gets to inspect and extend
/// the staged update set before the re-check/append/apply steps run
/// (§4.3 step 4: "allocator trigger, extent trigger, replicas
/// accounting"). Those triggers live in crates layered on top of this
/// one (`cowfs-alloc`, `cowfs-extent`), so the hook seam is how they
/// plug in without `cowfs-txn` depending on them.
type PrecommitHook<'a> = Box<dyn FnOnce(&mut Vec<StagedUpdate>) -> Result<()> + 'a>;

const DEFAULT_ARENA_CAP: usize = 1 << 20;

/// One attempt at a transaction (§4.3 step 1: "allocate a transaction
/// object with a scratch arena and an empty path list"). Dropped
/// without committing if the attempt is abandoned before `commit` is
/// called — nothing is locked until then. `commit` itself acquires each
/// touched leaf's write lock up front and holds it across the
/// re-check/apply steps, releasing it once both have run.
pub struct Transaction<'a> {
    engine: &'a cowfs_btree::BtreeEngine,
    journal: &'a Journal,
    devices: &'a DeviceSet,
    arena: Arena,
    updates: Vec<StagedUpdate>,
    precommit_hooks: Vec<PrecommitHook<'a>>,
}

impl<'a> Transaction<'a> {
    pub fn begin(engine: &'a cowfs_btree::BtreeEngine, journal: &'a Journal, devices: &'a DeviceSet) -> Self {
        Self {
            engine,
            journal,
            devices,
            arena: Arena::new(DEFAULT_ARENA_CAP),
            updates: Vec::new(),
            precommit_hooks: Vec::new(),
        }
    }

    /// §4.3 step 3: stages an upsert. The current value at `new_key`'s
    /// position, if any, is captured now as the snapshot re-checked at
    /// commit.
    pub fn update(&mut self, btree_id: BtreeId, new_key: Key) {
        let old_snapshot = self.engine.tree(btree_id).lookup(new_key.position);
        self.updates.push(StagedUpdate { btree_id, old_snapshot, new_key });
    }

    /// §4.3 step 4: registers a hook that runs once, just before the
    /// commit protocol's reserve/re-check/append steps, and may call
    /// [`Transaction::update`] again (directly, since hooks receive the
    /// update list itself isn't how further staging happens — triggers
    /// call back into a transaction reference they were handed, which
    /// `cowfs-alloc`/`cowfs-extent` do by capturing `&mut Transaction`
    /// in their own wrapper around this seam).
    pub fn add_precommit_hook(&mut self, hook: impl FnOnce(&mut Vec<StagedUpdate>) -> Result<()> + 'a) {
        self.precommit_hooks.push(Box::new(hook));
    }

    fn run_precommit_hooks(&mut self) -> Result<()> {
        for hook in std::mem::take(&mut self.precommit_hooks) {
            hook(&mut self.updates)?;
        }
        Ok(())
    }

    /// Lock-ordering check (§4.3 step 2 / §9): staged updates must
    /// address positions in non-decreasing `(btree_id, position)` order.
    /// A transaction body that stages out of order is a programming
    /// error in the caller, not a race — it restarts the same as a true
    /// conflict so the retry wrapper's "re-execute the whole body"
    /// contract stays uniform.
    fn check_lock_order(&self) -> Result<()> {
        let keys: Vec<LockOrderKey> = self
            .updates
            .iter()
            .map(|u| LockOrderKey::new(u.btree_id, false, u.new_key.position, 0))
            .collect();
        if keys.windows(2).all(|w| w[0] <= w[1]) {
            Ok(())
        } else {
            Err(Error::TransactionRestart(RestartReason::LockOrdering))
        }
    }

    /// §4.3 step 5. Consumes the transaction: success or a restartable
    /// error, either of which ends this attempt.
    pub fn commit(mut self) -> Result<u64> {
        self.run_precommit_hooks()?;
        self.check_lock_order()?;

        // 5a: reserve journal space for the serialized update set.
        self.arena.reset();
        for update in &self.updates {
            let mut w = Writer::new();
            w.u8(update.btree_id as u8);
            w.u16(0);
            w.key(&update.new_key);
            self.arena.extend(&w.into_bytes())?;
        }
        let sectors = (self.arena.len() as u64).div_ceil(cowfs_io::SECTOR_SIZE as u64).max(1);
        self.journal.try_reserve(sectors)?;

        // Acquire every touched leaf's write lock once, up front, and
        // hold it continuously through the re-check (5b) and the apply
        // (5d) below. Two staged updates landing in the same leaf share
        // one guard rather than each taking and releasing their own, so
        // no concurrent commit can land on a touched position between
        // our re-check and our apply (§4.3 step 5b/5d, §8.1 invariant
        // 2). Leaves are locked in `self.updates` order, which
        // `check_lock_order` has already verified is lock-order-safe.
        let mut leaf_order: Vec<(BtreeId, Position)> = Vec::new();
        let mut leaf_index: HashMap<(BtreeId, Position), usize> = HashMap::new();
        for update in &self.updates {
            let min_key = self.engine.tree(update.btree_id).leaf_min_key(update.new_key.position);
            leaf_index.entry((update.btree_id, min_key)).or_insert_with(|| {
                leaf_order.push((update.btree_id, min_key));
                leaf_order.len() - 1
            });
        }
        let nodes: Vec<CachedNode> = leaf_order
            .iter()
            .map(|(btree_id, min_key)| self.engine.tree(*btree_id).leaf_handle(*min_key))
            .collect();
        let mut guards: Vec<_> = nodes.iter().map(|n| n.write()).collect();

        // 5b: re-check every staged old_key_snapshot still matches the
        // live value at its position, reading it out of the guard that
        // will also perform the apply below.
        for update in &self.updates {
            let min_key = self.engine.tree(update.btree_id).leaf_min_key(update.new_key.position);
            let idx = leaf_index[&(update.btree_id, min_key)];
            let live = Btree::read_locked(&guards[idx], update.new_key.position);
            if key_bytes(live.as_ref()) != key_bytes(update.old_snapshot.as_ref()) {
                return Err(Error::TransactionRestart(RestartReason::OptimisticReadConflict));
            }
        }

        // 5c: append entries under a monotonically increasing sequence.
        let records: Vec<UpdateRecord> = self
            .updates
            .iter()
            .map(|u| UpdateRecord { btree_id: u.btree_id, level: 0, key: u.new_key.clone() })
            .collect();
        let flush = false;
        let seq = self.journal.append(self.devices, records, flush)?;

        // 5d: apply to the still-locked nodes, marked dirty with `seq`
        // by the B-tree engine's own bset bookkeeping. The same guard
        // taken for the re-check above is released only after this
        // apply, so the two steps are atomic with respect to any other
        // transaction touching the same leaf.
        let mut needs_split = vec![false; nodes.len()];
        for update in &self.updates {
            let tree = self.engine.tree(update.btree_id);
            let min_key = tree.leaf_min_key(update.new_key.position);
            let idx = leaf_index[&(update.btree_id, min_key)];
            if tree.apply_locked(&mut guards[idx], update.new_key.clone()) {
                needs_split[idx] = true;
            }
        }
        drop(guards);
        for (idx, (btree_id, _)) in leaf_order.iter().enumerate() {
            self.engine.tree(*btree_id).finish_split(nodes[idx].clone(), needs_split[idx]);
        }

        // 6: the remaining locks (any leaf not touched by this
        // transaction) never existed; the ones acquired above released
        // explicitly just before the split pass.
        Ok(seq)
    }

    pub fn staged_count(&self) -> usize {
        self.updates.len()
    }
}

fn key_bytes(key: Option<&Key>) -> Option<Vec<u8>> {
    key.map(|k| {
        let mut w = Writer::new();
        w.key(k);
        w.into_bytes()
    })
}
