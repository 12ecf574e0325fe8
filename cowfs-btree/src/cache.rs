//! In-memory node cache with LRU reclaim and a cannibalize lock (§4.2
//! "cache cannibalization"): when the cache is full and every node is
//! pinned by an in-flight path, a thread that needs a fresh slot may
//! "cannibalize" — evict nodes out from under other paths — but only
//! one thread may do that at a time, and every other path must then
//! restart rather than touch a node mid-cannibalization.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use cowfs_types::{BtreeId, Position};
use parking_lot::{Mutex, RwLock};

use crate::node::BtreeNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub btree_id: BtreeId,
    pub level: u16,
    pub min_key: Position,
}

pub type CachedNode = Arc<RwLock<BtreeNode>>;

struct Inner {
    nodes: HashMap<NodeKey, CachedNode>,
    /// Most-recently-used at the back.
    lru: VecDeque<NodeKey>,
    capacity: usize,
}

impl Inner {
    fn touch(&mut self, key: &NodeKey) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
        }
        self.lru.push_back(*key);
    }
}

/// The node cache. A live [`Cannibalize`] guard marks that eviction is
/// in progress; callers attempting a normal lookup during that window
/// get `None` back and should restart their path rather than race the
/// evictor.
pub struct NodeCache {
    inner: Mutex<Inner>,
    cannibalize: Mutex<bool>,
}

impl NodeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                nodes: HashMap::new(),
                lru: VecDeque::new(),
                capacity,
            }),
            cannibalize: Mutex::new(false),
        }
    }

    pub fn get(&self, key: &NodeKey) -> Option<CachedNode> {
        let mut inner = self.inner.lock();
        if inner.nodes.contains_key(key) {
            inner.touch(key);
        }
        inner.nodes.get(key).cloned()
    }

    /// Inserts a freshly read or newly allocated node, evicting the
    /// least-recently-used entry first if at capacity. Pinned nodes
    /// (`Arc` strong count > 1, i.e. some path still holds a reference)
    /// are skipped when choosing an eviction victim.
    pub fn insert(&self, key: NodeKey, node: BtreeNode) -> CachedNode {
        let mut inner = self.inner.lock();
        if inner.nodes.len() >= inner.capacity && !inner.nodes.contains_key(&key) {
            self.evict_one(&mut inner);
        }
        let cached = Arc::new(RwLock::new(node));
        inner.nodes.insert(key, cached.clone());
        inner.touch(&key);
        cached
    }

    pub fn remove(&self, key: &NodeKey) {
        let mut inner = self.inner.lock();
        inner.nodes.remove(key);
        if let Some(pos) = inner.lru.iter().position(|k| k == key) {
            inner.lru.remove(pos);
        }
    }

    fn evict_one(&self, inner: &mut Inner) {
        let victim = inner
            .lru
            .iter()
            .position(|k| inner.nodes.get(k).map(|n| Arc::strong_count(n) == 1).unwrap_or(true));
        if let Some(pos) = victim {
            let key = inner.lru.remove(pos).unwrap();
            inner.nodes.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempts to begin cannibalizing. Returns a guard on success; the
    /// caller must restart its path (not block) on failure, since
    /// waiting here risks deadlocking against the very path that holds
    /// the pins this call wants to evict.
    pub fn try_cannibalize(&self) -> Option<Cannibalize<'_>> {
        let mut flag = self.cannibalize.lock();
        if *flag {
            None
        } else {
            *flag = true;
            Some(Cannibalize { cache: self })
        }
    }
}

pub struct Cannibalize<'a> {
    cache: &'a NodeCache,
}

impl Drop for Cannibalize<'_> {
    fn drop(&mut self) {
        *self.cache.cannibalize.lock() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(offset: u64) -> NodeKey {
        NodeKey { btree_id: BtreeId::Inodes, level: 0, min_key: Position::new(0, offset, 0) }
    }

    fn leaf() -> BtreeNode {
        BtreeNode::new_leaf(BtreeId::Inodes, Position::POS_MIN, Position::POS_MAX)
    }

    #[test]
    fn insert_and_get_round_trips() {
        let cache = NodeCache::new(4);
        let k = key(0);
        cache.insert(k, leaf());
        assert!(cache.get(&k).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_unpinned_lru_entry_at_capacity() {
        let cache = NodeCache::new(2);
        cache.insert(key(0), leaf());
        cache.insert(key(1), leaf());
        cache.insert(key(2), leaf());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key(0)).is_none());
    }

    #[test]
    fn cannibalize_is_exclusive() {
        let cache = NodeCache::new(4);
        let guard = cache.try_cannibalize();
        assert!(guard.is_some());
        assert!(cache.try_cannibalize().is_none());
        drop(guard);
        assert!(cache.try_cannibalize().is_some());
    }
}
