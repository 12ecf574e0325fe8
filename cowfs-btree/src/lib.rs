//! The B-tree transactional KV engine (§4.2): append-only copy-on-write
//! nodes organized as bsets, a per-node `RwLock` guarding each cached
//! node (with `lock`/`path` providing the six-state read/intent/write
//! model §4.2 describes, for a future multi-level path descent — see
//! `DESIGN.md`), an LRU node cache with cannibalize-on-pressure reclaim,
//! and the iterator interface the transaction layer drives mutations
//! through. Sits on top of `cowfs-io`/`cowfs-types` only, per the
//! dependency order in §2 — journal replay and transactional commit are
//! layered on top of this crate rather than folded into it.

pub mod bset;
pub mod cache;
pub mod codec;
pub mod iter;
pub mod lock;
pub mod node;
pub mod node_io;
pub mod path;

pub use bset::Bset;
pub use cache::{CachedNode, NodeCache, NodeKey};
pub use cowfs_types::DeviceSet;
pub use iter::{Btree, BtreeIter};
pub use lock::{LockType, SixLock};
pub use node::{BtreeNode, NodePtr, MERGE_THRESHOLD, SPLIT_THRESHOLD};
pub use path::{LockOrderKey, Path, PathLevel};

/// One running B-tree engine instance: every [`cowfs_types::BtreeId`]
/// gets its own [`Btree`], so callers (the transaction layer) address
/// mutations by id rather than threading a tree handle around
/// themselves.
pub struct BtreeEngine {
    trees: std::collections::HashMap<cowfs_types::BtreeId, Btree>,
}

impl BtreeEngine {
    pub fn new(cache_capacity_per_tree: usize) -> Self {
        let trees = cowfs_types::BtreeId::ALL
            .into_iter()
            .map(|id| (id, Btree::new(id, cache_capacity_per_tree)))
            .collect();
        Self { trees }
    }

    pub fn tree(&self, id: cowfs_types::BtreeId) -> &Btree {
        self.trees.get(&id).expect("BtreeEngine::new populates every BtreeId")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_types::{BtreeId, InodeValue, Key, KeyValue, Position};

    #[test]
    fn engine_exposes_every_tree() {
        let engine = BtreeEngine::new(16);
        for id in BtreeId::ALL {
            assert_eq!(engine.tree(id).btree_id(), id);
        }
    }

    #[test]
    fn trees_are_independent() {
        let engine = BtreeEngine::new(16);
        let key = Key { position: Position::new(1, 0, 0), size: 0, value: KeyValue::Inode(InodeValue::default()) };
        engine.tree(BtreeId::Inodes).update(key).unwrap();
        assert!(engine.tree(BtreeId::Inodes).lookup(Position::new(1, 0, 0)).is_some());
        assert!(engine.tree(BtreeId::Dirents).lookup(Position::new(1, 0, 0)).is_none());
    }
}
