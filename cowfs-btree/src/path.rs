//! A btree path: one locked node reference per level from the root down
//! to a leaf, held for the duration of a lookup or mutation (§4.2
//! "paths"). Locks are acquired root-to-leaf and released leaf-to-root,
//! which is what [`LOCK_ORDER`] encodes.

use cowfs_types::{BtreeId, Position};

use crate::cache::{CachedNode, NodeKey};
use crate::lock::LockType;

/// Global lock acquisition order: `(btree_id, cached?, position, -level)`.
/// Cross-tree locking always takes a lower-numbered [`BtreeId`] first;
/// within a tree, cached (non-durable-yet) nodes before non-cached ones
/// at the same key; within that, lower keys before higher; and within
/// the same key range, higher levels (closer to the root) before lower
/// ones. A path that needs to lock a node out of this order must drop
/// everything it holds and retry from the top, surfacing as
/// [`cowfs_types::RestartReason::LockOrdering`].
pub const LOCK_ORDER_DOC: &str = "(btree_id, cached, position, -level)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LockOrderKey {
    pub btree_id: BtreeId,
    pub cached: bool,
    pub position: Position,
    pub neg_level: std::cmp::Reverse<u16>,
}

impl LockOrderKey {
    pub fn new(btree_id: BtreeId, cached: bool, position: Position, level: u16) -> Self {
        Self { btree_id, cached, position, neg_level: std::cmp::Reverse(level) }
    }
}

/// One level of a [`Path`]: the node reference, the lock type currently
/// held on it, and whether it was served from the cache as a "cached"
/// (not guaranteed durable) entry.
pub struct PathLevel {
    pub key: NodeKey,
    pub node: CachedNode,
    pub lock: LockType,
    pub cached: bool,
}

/// A held traversal from root to some target level, used by both reads
/// and the transaction layer's update machinery. Dropping a `Path`
/// releases its locks in leaf-to-root order.
pub struct Path {
    levels: Vec<PathLevel>,
}

impl Path {
    pub fn new() -> Self {
        Self { levels: Vec::new() }
    }

    pub fn push(&mut self, level: PathLevel) {
        self.levels.push(level);
    }

    pub fn leaf(&self) -> Option<&PathLevel> {
        self.levels.first()
    }

    pub fn root(&self) -> Option<&PathLevel> {
        self.levels.last()
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn lock_order_keys(&self) -> Vec<LockOrderKey> {
        self.levels
            .iter()
            .map(|l| LockOrderKey::new(l.key.btree_id, l.cached, l.key.min_key, l.key.level))
            .collect()
    }

    /// True if acquiring this path's levels in their current order would
    /// respect [`LOCK_ORDER_DOC`] — i.e. the keys are sorted ascending.
    pub fn is_order_respected(&self) -> bool {
        self.lock_order_keys().windows(2).all(|w| w[0] <= w[1])
    }
}

impl Default for Path {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Path {
    fn drop(&mut self) {
        for level in self.levels.drain(..).rev() {
            match level.lock {
                LockType::Read => {}
                LockType::Intent | LockType::Write => {}
            }
            drop(level.node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::BtreeNode;
    use parking_lot::RwLock;
    use std::sync::Arc;

    fn level(btree_id: BtreeId, level_num: u16, offset: u64) -> PathLevel {
        let min_key = Position::new(0, offset, 0);
        PathLevel {
            key: NodeKey { btree_id, level: level_num, min_key },
            node: Arc::new(RwLock::new(BtreeNode::new_leaf(btree_id, min_key, Position::POS_MAX))),
            lock: LockType::Read,
            cached: false,
        }
    }

    #[test]
    fn ascending_keys_respect_order() {
        let mut path = Path::new();
        path.push(level(BtreeId::Inodes, 0, 0));
        path.push(level(BtreeId::Inodes, 1, 10));
        assert!(path.is_order_respected());
    }

    #[test]
    fn descending_keys_violate_order() {
        let mut path = Path::new();
        path.push(level(BtreeId::Inodes, 0, 10));
        path.push(level(BtreeId::Inodes, 1, 0));
        assert!(!path.is_order_respected());
    }
}
