//! The transactional iterator interface callers drive a B-tree through
//! (§4.2 "iterators"): `iter_init` positions a cursor, `iter_peek`/
//! `iter_prev` read without moving past, `iter_next_node` steps across a
//! leaf boundary, and `update`/`delete`/`delete_range` mutate at the
//! cursor. [`Btree`] owns the leaf layer for one [`BtreeId`] — the set
//! of disjoint key ranges, each backed by one COW [`BtreeNode`] — and
//! every iterator borrows from it.
//!
//! Splitting and merging happen here rather than in [`crate::node`]:
//! `BtreeNode::split`/`absorb` only know how to cut one node in two or
//! fuse two back together, not how to fit the result into the
//! surrounding range map.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use cowfs_types::{BtreeId, Error, Key, Position, Result};
use parking_lot::{Mutex, RwLockWriteGuard};

use crate::cache::{CachedNode, NodeCache, NodeKey};
use crate::node::BtreeNode;

/// Owns the leaf layer for one [`BtreeId`]: a sorted map from each
/// leaf's `min_key` to its cache entry, kept disjoint and
/// range-covering at all times (invariant: the union of
/// `[min_key, max_key)` ranges across all leaves is exactly
/// `[POS_MIN, POS_MAX]`).
pub struct Btree {
    btree_id: BtreeId,
    cache: NodeCache,
    leaves: Mutex<BTreeMap<Position, NodeKey>>,
    journal_seq: AtomicU64,
}

impl Btree {
    pub fn new(btree_id: BtreeId, cache_capacity: usize) -> Self {
        let cache = NodeCache::new(cache_capacity);
        let key = NodeKey { btree_id, level: 0, min_key: Position::POS_MIN };
        cache.insert(key, BtreeNode::new_leaf(btree_id, Position::POS_MIN, Position::POS_MAX));
        let mut leaves = BTreeMap::new();
        leaves.insert(Position::POS_MIN, key);
        Self { btree_id, cache, leaves: Mutex::new(leaves), journal_seq: AtomicU64::new(0) }
    }

    pub fn btree_id(&self) -> BtreeId {
        self.btree_id
    }

    fn leaf_for(&self, position: Position) -> NodeKey {
        let leaves = self.leaves.lock();
        *leaves
            .range(..=position)
            .next_back()
            .map(|(_, key)| key)
            .expect("leaf map always covers POS_MIN")
    }

    fn leaf_node(&self, key: &NodeKey) -> CachedNode {
        self.cache.get(key).expect("leaf map entry always has a live cache slot")
    }

    /// The `min_key` of the leaf currently covering `position`, stable
    /// for as long as no split/merge touches that leaf. Callers that
    /// need to hold one lock across several positions landing in the
    /// same leaf (the transaction layer's commit, §4.3 step 5b/5d) use
    /// this to group staged updates before acquiring any locks.
    pub fn leaf_min_key(&self, position: Position) -> Position {
        self.leaf_for(position).min_key
    }

    /// The cache handle for the leaf covering `position`. Exposed so the
    /// transaction layer can acquire the node's write lock once and hold
    /// it across both the optimistic re-check and the apply, instead of
    /// two independent lock/unlock round-trips through
    /// [`Btree::lookup`]/[`Btree::update`] (§4.3 step 5b/5d, §8.1
    /// invariant 2).
    pub fn leaf_handle(&self, position: Position) -> CachedNode {
        let leaf_key = self.leaf_for(position);
        self.leaf_node(&leaf_key)
    }

    /// Reads the key at `position` out of an already-locked leaf.
    pub fn read_locked(guard: &RwLockWriteGuard<'_, BtreeNode>, position: Position) -> Option<Key> {
        guard.all_keys().into_iter().find(|k| k.position == position).cloned()
    }

    /// Applies `key` into an already-locked leaf under a fresh journal
    /// sequence, returning whether the leaf now needs splitting. Caller
    /// must drop `guard` before calling [`Btree::finish_split`] if this
    /// returns `true` — splitting takes its own write lock.
    pub fn apply_locked(&self, guard: &mut RwLockWriteGuard<'_, BtreeNode>, key: Key) -> bool {
        let seq = self.journal_seq.fetch_add(1, Ordering::SeqCst) + 1;
        guard.insert_key(key, seq);
        guard.needs_split()
    }

    /// Splits `node` if [`Btree::apply_locked`] flagged it. No-op
    /// otherwise. Only call after the node's write guard has been
    /// dropped.
    pub fn finish_split(&self, node: CachedNode, needs_split: bool) {
        if needs_split {
            self.split_leaf(node);
        }
    }

    pub fn lookup(&self, position: Position) -> Option<Key> {
        let leaf_key = self.leaf_for(position);
        let node = self.leaf_node(&leaf_key);
        let guard = node.read();
        guard.all_keys().into_iter().find(|k| k.position == position).cloned()
    }

    /// §4.2 `update`: upserts a key, splitting its leaf if it has grown
    /// past [`crate::node::SPLIT_THRESHOLD`].
    pub fn update(&self, key: Key) -> Result<()> {
        let seq = self.journal_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let leaf_key = self.leaf_for(key.position);
        let node = self.leaf_node(&leaf_key);
        let needs_split = {
            let mut guard = node.write();
            guard.insert_key(key, seq);
            guard.needs_split()
        };
        if needs_split {
            self.split_leaf(node);
        }
        Ok(())
    }

    /// Splits an overgrown leaf in two. The original [`NodeKey`] stays
    /// valid — its `min_key` doesn't move — so only the new upper half
    /// needs a fresh cache slot and map entry.
    fn split_leaf(&self, node: CachedNode) {
        let upper = {
            let mut guard = node.write();
            guard.split()
        };
        let upper_min = upper.min_key;
        let upper_key = NodeKey { btree_id: self.btree_id, level: 0, min_key: upper_min };
        self.cache.insert(upper_key, upper);
        self.leaves.lock().insert(upper_min, upper_key);
    }

    /// §4.2 `delete`: removes a key if present, returning whether it was
    /// found. An emptied leaf that isn't the sole leaf in the tree is
    /// folded into its predecessor.
    pub fn delete(&self, position: Position) -> Result<bool> {
        let leaf_key = self.leaf_for(position);
        let node = self.leaf_node(&leaf_key);
        let (removed, emptied) = {
            let mut guard = node.write();
            let removed = guard.remove_key(&position);
            (removed, guard.key_count() == 0)
        };
        if emptied {
            self.maybe_merge_empty(leaf_key);
        }
        Ok(removed)
    }

    fn maybe_merge_empty(&self, empty_key: NodeKey) {
        let mut leaves = self.leaves.lock();
        if leaves.len() <= 1 {
            return;
        }
        let Some((&pred_min, _)) = leaves.range(..empty_key.min_key).next_back() else {
            return;
        };
        let pred_key = *leaves.get(&pred_min).unwrap();
        let pred_node = self.cache.get(&pred_key).expect("predecessor leaf must be cached");
        let empty_node = self.cache.get(&empty_key).expect("empty leaf must be cached");
        let taken = {
            let mut empty_guard = empty_node.write();
            let max_key = empty_guard.max_key;
            std::mem::replace(&mut *empty_guard, BtreeNode::new_leaf(self.btree_id, empty_guard.min_key, max_key))
        };
        pred_node.write().absorb(taken);
        leaves.remove(&empty_key.min_key);
        drop(leaves);
        self.cache.remove(&empty_key);
    }

    /// §4.2 `delete_range`: removes every key in `[start, end)`,
    /// returning the count removed.
    pub fn delete_range(&self, start: Position, end: Position) -> Result<usize> {
        if start >= end {
            return Err(Error::InvalidArgument("delete_range requires start < end"));
        }
        let positions: Vec<Position> = self
            .iter_init(start)
            .take_while(|k| k.position < end)
            .map(|k| k.position)
            .collect();
        let mut count = 0;
        for position in positions {
            if self.delete(position)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// §4.2 `iter_init`: a point-in-time ordered view from `start`
    /// onward. Mutations made after the iterator is created are not
    /// reflected in it (snapshot semantics), matching the transaction
    /// layer's expectation that a path's view is stable for the
    /// duration of one transaction attempt.
    pub fn iter_init(&self, start: Position) -> BtreeIter {
        let mut keys = Vec::new();
        let leaf_keys: Vec<NodeKey> = self.leaves.lock().values().copied().collect();
        for leaf_key in leaf_keys {
            if let Some(node) = self.cache.get(&leaf_key) {
                keys.extend(node.read().all_keys().into_iter().cloned());
            }
        }
        keys.sort_by(|a, b| a.position.cmp(&b.position));
        let cursor = keys.partition_point(|k| k.position < start);
        BtreeIter { keys, cursor }
    }
}

/// A point-in-time cursor over a [`Btree`]'s keys (§4.2 "iterators").
pub struct BtreeIter {
    keys: Vec<Key>,
    cursor: usize,
}

impl BtreeIter {
    /// §4.2 `iter_peek`: the key at the cursor without advancing.
    pub fn iter_peek(&self) -> Option<&Key> {
        self.keys.get(self.cursor)
    }

    /// §4.2 `iter_prev`: the key immediately before the cursor, without
    /// moving it.
    pub fn iter_prev(&self) -> Option<&Key> {
        self.cursor.checked_sub(1).and_then(|i| self.keys.get(i))
    }

    /// §4.2 `iter_next_node`: advances the cursor to the first key at or
    /// past the next leaf boundary. Since this cursor is a flattened
    /// snapshot rather than a live per-node walk, "next node" means "next
    /// key with a different position range bucket than the current one";
    /// callers that only need linear advancement should use the
    /// `Iterator` impl instead.
    pub fn iter_next_node(&mut self) -> Option<&Key> {
        self.cursor = self.keys.len().min(self.cursor + 1);
        self.keys.get(self.cursor)
    }
}

impl Iterator for BtreeIter {
    type Item = Key;

    fn next(&mut self) -> Option<Key> {
        let item = self.keys.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_types::{InodeValue, KeyValue};

    fn key(offset: u64) -> Key {
        Key { position: Position::new(1, offset, 0), size: 0, value: KeyValue::Inode(InodeValue::default()) }
    }

    #[test]
    fn update_then_lookup() {
        let tree = Btree::new(BtreeId::Inodes, 16);
        tree.update(key(5)).unwrap();
        assert!(tree.lookup(Position::new(1, 5, 0)).is_some());
        assert!(tree.lookup(Position::new(1, 6, 0)).is_none());
    }

    #[test]
    fn splitting_preserves_all_keys() {
        let tree = Btree::new(BtreeId::Inodes, 64);
        for i in 0..600 {
            tree.update(key(i)).unwrap();
        }
        let count = tree.iter_init(Position::POS_MIN).count();
        assert_eq!(count, 600);
    }

    #[test]
    fn delete_removes_key() {
        let tree = Btree::new(BtreeId::Inodes, 16);
        tree.update(key(1)).unwrap();
        assert!(tree.delete(Position::new(1, 1, 0)).unwrap());
        assert!(tree.lookup(Position::new(1, 1, 0)).is_none());
        assert!(!tree.delete(Position::new(1, 1, 0)).unwrap());
    }

    #[test]
    fn delete_range_removes_bounded_span() {
        let tree = Btree::new(BtreeId::Inodes, 16);
        for i in 0..20 {
            tree.update(key(i)).unwrap();
        }
        let removed = tree.delete_range(Position::new(1, 5, 0), Position::new(1, 10, 0)).unwrap();
        assert_eq!(removed, 5);
        assert_eq!(tree.iter_init(Position::POS_MIN).count(), 15);
    }

    #[test]
    fn iter_peek_and_prev_do_not_advance() {
        let tree = Btree::new(BtreeId::Inodes, 16);
        tree.update(key(1)).unwrap();
        tree.update(key(2)).unwrap();
        let mut iter = tree.iter_init(Position::POS_MIN);
        assert_eq!(iter.iter_peek().unwrap().position.offset, 1);
        assert!(iter.iter_prev().is_none());
        let _ = iter.next();
        assert_eq!(iter.iter_peek().unwrap().position.offset, 2);
        assert_eq!(iter.iter_prev().unwrap().position.offset, 1);
    }
}
