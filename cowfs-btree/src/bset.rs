use cowfs_types::Key;

/// An append-only segment of sorted keys within a node (glossary
/// "Bset"). New keys land in the newest bset; a node accumulates bsets
/// as it's mutated between journal commits and periodically compacts
/// them back down to one (§4.2 "Node format").
#[derive(Debug, Clone)]
pub struct Bset {
    /// Journal sequence this bset became durable at. The decoder checks
    /// these are non-decreasing across a node's bsets on read.
    pub journal_seq: u64,
    keys: Vec<Key>,
}

impl Bset {
    pub fn new(journal_seq: u64) -> Self {
        Self { journal_seq, keys: Vec::new() }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Inserts in position order, replacing an existing key at the same
    /// position (an upsert within one bset never needs a duplicate
    /// entry the way cross-bset upserts do).
    pub fn upsert(&mut self, key: Key) {
        match self.keys.binary_search_by(|k| k.position.cmp(&key.position)) {
            Ok(idx) => self.keys[idx] = key,
            Err(idx) => self.keys.insert(idx, key),
        }
    }

    pub fn remove(&mut self, position: &cowfs_types::Position) -> bool {
        if let Ok(idx) = self.keys.binary_search_by(|k| k.position.cmp(position)) {
            self.keys.remove(idx);
            true
        } else {
            false
        }
    }
}

/// Validates that a sequence of bsets (oldest to newest, as read off
/// disk) carries non-decreasing journal sequence numbers (§4.2 "on read,
/// the decoder validates the bset sequence number against
/// expectations").
pub fn validate_sequence(bsets: &[Bset]) -> bool {
    bsets.windows(2).all(|w| w[0].journal_seq <= w[1].journal_seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_types::{KeyValue, Position};

    fn key(offset: u64) -> Key {
        Key {
            position: Position::new(1, offset, 0),
            size: 0,
            value: KeyValue::Inode(Default::default()),
        }
    }

    #[test]
    fn upsert_keeps_sorted_order() {
        let mut bset = Bset::new(0);
        bset.upsert(key(5));
        bset.upsert(key(1));
        bset.upsert(key(3));
        let offsets: Vec<_> = bset.keys().iter().map(|k| k.position.offset).collect();
        assert_eq!(offsets, vec![1, 3, 5]);
    }

    #[test]
    fn upsert_replaces_same_position() {
        let mut bset = Bset::new(0);
        bset.upsert(key(5));
        bset.upsert(key(5));
        assert_eq!(bset.len(), 1);
    }

    #[test]
    fn sequence_validation_catches_regression() {
        let good = vec![Bset::new(1), Bset::new(2), Bset::new(2)];
        assert!(validate_sequence(&good));
        let bad = vec![Bset::new(3), Bset::new(1)];
        assert!(!validate_sequence(&bad));
    }
}
