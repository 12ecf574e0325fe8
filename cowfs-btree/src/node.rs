use cowfs_types::{BtreeId, ExtentPointer, Key, Position};

use crate::bset::{validate_sequence, Bset};

/// A node's on-disk address: the pointer set it was last written to
/// (replicated the same as extent data, §4.2 "Node writes go through the
/// same replica/checksum machinery as extent writes") plus the btree
/// level it occupies so a cached parent can validate a child pointer
/// hasn't gone stale underneath it.
#[derive(Debug, Clone)]
pub struct NodePtr {
    pub pointers: Vec<ExtentPointer>,
    pub level: u16,
    pub btree_id: BtreeId,
}

impl NodePtr {
    pub fn new(btree_id: BtreeId, level: u16, pointers: Vec<ExtentPointer>) -> Self {
        Self { pointers, level, btree_id }
    }
}

/// Fill thresholds a node is split or merged at (§4.2 "Node format"):
/// interior nodes split well before they're physically full so a split
/// doesn't immediately cascade into the parent, and two adjacent nodes
/// under half full are coalesced rather than left sparse.
pub const SPLIT_THRESHOLD: usize = 256;
pub const MERGE_THRESHOLD: usize = 64;

/// An in-memory B-tree node: a sequence of bsets (newest last) plus the
/// key range it covers. Mutations land in the newest bset; `compact`
/// flattens everything down to one before a COW write, the way the
/// teacher's `vsfs` flattens a dirty inode's block list before it
/// rewrites the inode image.
#[derive(Debug, Clone)]
pub struct BtreeNode {
    pub btree_id: BtreeId,
    pub level: u16,
    pub min_key: Position,
    pub max_key: Position,
    bsets: Vec<Bset>,
    journal_seq: u64,
}

impl BtreeNode {
    pub fn new_leaf(btree_id: BtreeId, min_key: Position, max_key: Position) -> Self {
        Self {
            btree_id,
            level: 0,
            min_key,
            max_key,
            bsets: vec![Bset::new(0)],
            journal_seq: 0,
        }
    }

    pub fn new_interior(btree_id: BtreeId, level: u16, min_key: Position, max_key: Position) -> Self {
        Self {
            btree_id,
            level,
            min_key,
            max_key,
            bsets: vec![Bset::new(0)],
            journal_seq: 0,
        }
    }

    /// Reconstructs a node from its decoded bsets (used by
    /// [`crate::codec::decode_node`] only — callers elsewhere go through
    /// [`BtreeNode::new_leaf`]/[`BtreeNode::new_interior`] plus
    /// [`BtreeNode::insert_key`]).
    pub(crate) fn from_parts(btree_id: BtreeId, level: u16, min_key: Position, max_key: Position, bsets: Vec<Bset>) -> Self {
        let journal_seq = bsets.last().map(|b| b.journal_seq).unwrap_or(0);
        Self { btree_id, level, min_key, max_key, bsets, journal_seq }
    }

    pub(crate) fn bsets(&self) -> &[Bset] {
        &self.bsets
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    /// Inserts `key` into the newest bset, stamping it with the journal
    /// sequence this mutation is committing under.
    pub fn insert_key(&mut self, key: Key, journal_seq: u64) {
        self.journal_seq = self.journal_seq.max(journal_seq);
        let newest = self.bsets.last_mut().expect("node always has >=1 bset");
        if newest.journal_seq != journal_seq && !newest.is_empty() {
            self.bsets.push(Bset::new(journal_seq));
        } else {
            newest.journal_seq = journal_seq;
        }
        self.bsets.last_mut().unwrap().upsert(key);
    }

    pub fn remove_key(&mut self, position: &Position) -> bool {
        let mut removed = false;
        for bset in &mut self.bsets {
            if bset.remove(position) {
                removed = true;
            }
        }
        removed
    }

    /// Merges all bsets into the visible key set, newest-wins on
    /// duplicate positions. This is the read path's view of the node;
    /// `compact` makes it the stored representation too.
    pub fn all_keys(&self) -> Vec<&Key> {
        let mut by_position: std::collections::BTreeMap<Position, &Key> = std::collections::BTreeMap::new();
        for bset in &self.bsets {
            for key in bset.keys() {
                by_position.insert(key.position, key);
            }
        }
        by_position.into_values().collect()
    }

    pub fn key_count(&self) -> usize {
        self.bsets.iter().map(Bset::len).sum()
    }

    pub fn needs_split(&self) -> bool {
        self.key_count() >= SPLIT_THRESHOLD
    }

    pub fn needs_merge(&self) -> bool {
        self.key_count() < MERGE_THRESHOLD
    }

    pub fn bset_count(&self) -> usize {
        self.bsets.len()
    }

    pub fn validate(&self) -> bool {
        validate_sequence(&self.bsets)
    }

    /// Flattens every bset into a single one (§4.2's periodic compaction),
    /// keeping the newest-wins value at each position.
    pub fn compact(&mut self) {
        let seq = self.journal_seq;
        let mut merged = Bset::new(seq);
        for key in self.all_keys() {
            merged.upsert(key.clone());
        }
        self.bsets = vec![merged];
    }

    /// Splits this node in half by key count, returning the new node that
    /// takes the upper half. Caller is responsible for updating the
    /// parent's separator key and both pointers (§4.2 split protocol).
    pub fn split(&mut self) -> BtreeNode {
        self.compact();
        let keys: Vec<Key> = self.all_keys().into_iter().cloned().collect();
        let mid = keys.len() / 2;
        let upper_min = keys[mid].position;

        let mut lower = Bset::new(self.journal_seq);
        for key in &keys[..mid] {
            lower.upsert(key.clone());
        }
        let mut upper = Bset::new(self.journal_seq);
        for key in &keys[mid..] {
            upper.upsert(key.clone());
        }

        let old_max = self.max_key;
        self.max_key = upper_min;
        self.bsets = vec![lower];

        BtreeNode {
            btree_id: self.btree_id,
            level: self.level,
            min_key: upper_min,
            max_key: old_max,
            bsets: vec![upper],
            journal_seq: self.journal_seq,
        }
    }

    /// Absorbs `other` (which must cover the key range immediately above
    /// this node's) into this node, for the merge/coalesce path.
    pub fn absorb(&mut self, other: BtreeNode) {
        self.compact();
        for bset in other.bsets {
            for key in bset.keys() {
                self.insert_key(key.clone(), bset.journal_seq);
            }
        }
        self.max_key = other.max_key;
        self.compact();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_types::{InodeValue, KeyValue};

    fn key(offset: u64, value: KeyValue) -> Key {
        Key { position: Position::new(1, offset, 0), size: 0, value }
    }

    fn inode_key(offset: u64) -> Key {
        key(offset, KeyValue::Inode(InodeValue::default()))
    }

    #[test]
    fn insert_and_read_back() {
        let mut node = BtreeNode::new_leaf(BtreeId::Inodes, Position::POS_MIN, Position::POS_MAX);
        node.insert_key(inode_key(1), 1);
        node.insert_key(inode_key(2), 1);
        assert_eq!(node.key_count(), 2);
        assert_eq!(node.all_keys().len(), 2);
    }

    #[test]
    fn newer_journal_seq_opens_new_bset() {
        let mut node = BtreeNode::new_leaf(BtreeId::Inodes, Position::POS_MIN, Position::POS_MAX);
        node.insert_key(inode_key(1), 1);
        node.insert_key(inode_key(2), 2);
        assert_eq!(node.bset_count(), 2);
        assert!(node.validate());
    }

    #[test]
    fn compact_collapses_to_one_bset_newest_wins() {
        let mut node = BtreeNode::new_leaf(BtreeId::Inodes, Position::POS_MIN, Position::POS_MAX);
        node.insert_key(inode_key(1), 1);
        let mut updated = InodeValue::default();
        updated.size = 42;
        node.insert_key(key(1, KeyValue::Inode(updated)), 2);
        node.compact();
        assert_eq!(node.bset_count(), 1);
        let keys = node.all_keys();
        assert_eq!(keys.len(), 1);
        match &keys[0].value {
            KeyValue::Inode(v) => assert_eq!(v.size, 42),
            _ => panic!("expected inode value"),
        }
    }

    #[test]
    fn split_divides_key_range() {
        let mut node = BtreeNode::new_leaf(BtreeId::Inodes, Position::POS_MIN, Position::POS_MAX);
        for i in 0..10 {
            node.insert_key(inode_key(i), 1);
        }
        let upper = node.split();
        assert!(node.key_count() + upper.key_count() == 10);
        assert_eq!(node.max_key, upper.min_key);
        assert!(node.max_key < upper.max_key || upper.max_key == Position::POS_MAX);
    }

    #[test]
    fn absorb_reverses_a_split() {
        let mut node = BtreeNode::new_leaf(BtreeId::Inodes, Position::POS_MIN, Position::POS_MAX);
        for i in 0..10 {
            node.insert_key(inode_key(i), 1);
        }
        let upper = node.split();
        let total_before = node.key_count() + upper.key_count();
        node.absorb(upper);
        assert_eq!(node.key_count(), total_before);
        assert_eq!(node.max_key, Position::POS_MAX);
    }
}
