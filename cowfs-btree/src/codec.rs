//! On-disk encoding for a [`BtreeNode`] image: a small fixed header
//! (btree id, level, key range, bset count) followed by each bset's
//! `(journal_seq, key_count, keys...)`. Key encode/decode itself is
//! shared with `cowfs-journal`'s update records via
//! [`cowfs_types::wire`], since a journaled update and a bset entry are
//! the same `Key` either way.

use cowfs_types::{BtreeId, Error, Result, Writer, Reader};

use crate::bset::Bset;
use crate::node::BtreeNode;

pub fn encode_node(node: &BtreeNode) -> Vec<u8> {
    let mut w = Writer::new();
    w.u8(node.btree_id as u8);
    w.u16(node.level);
    w.position(node.min_key);
    w.position(node.max_key);
    let bsets = node.bsets();
    w.u32(bsets.len() as u32);
    for bset in bsets {
        w.u64(bset.journal_seq);
        w.u32(bset.keys().len() as u32);
        for key in bset.keys() {
            w.key(key);
        }
    }
    w.into_bytes()
}

pub fn decode_node(buf: &[u8]) -> Result<BtreeNode> {
    let mut r = Reader::new(buf);
    let btree_id = BtreeId::from_u8(r.u8()?).ok_or(Error::CorruptMetadata)?;
    let level = r.u16()?;
    let min_key = r.position()?;
    let max_key = r.position()?;
    let nbsets = r.u32()?;
    let mut bsets = Vec::with_capacity(nbsets as usize);
    for _ in 0..nbsets {
        let journal_seq = r.u64()?;
        let nkeys = r.u32()?;
        let mut bset = Bset::new(journal_seq);
        for _ in 0..nkeys {
            bset.upsert(r.key()?);
        }
        bsets.push(bset);
    }
    Ok(BtreeNode::from_parts(btree_id, level, min_key, max_key, bsets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_types::{CompressionType, ExtentPointer, ExtentValue, InodeValue, Key, KeyValue, Position};

    #[test]
    fn inode_key_round_trips() {
        let mut node = BtreeNode::new_leaf(BtreeId::Inodes, Position::POS_MIN, Position::POS_MAX);
        node.insert_key(
            Key { position: Position::new(1, 0, 0), size: 0, value: KeyValue::Inode(InodeValue { size: 99, ..Default::default() }) },
            1,
        );
        let encoded = encode_node(&node);
        let decoded = decode_node(&encoded).unwrap();
        let keys = decoded.all_keys();
        assert_eq!(keys.len(), 1);
        match &keys[0].value {
            KeyValue::Inode(v) => assert_eq!(v.size, 99),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn extent_key_with_pointers_round_trips() {
        let mut node = BtreeNode::new_leaf(BtreeId::Extents, Position::POS_MIN, Position::POS_MAX);
        let value = ExtentValue {
            compressed_size: 4096,
            uncompressed_size: 8192,
            compression: CompressionType::Lz4,
            nr_required: 1,
            pointers: vec![ExtentPointer::new(0, 10, 0, 1)],
            stripe: None,
        };
        node.insert_key(Key { position: Position::new(2, 0, 0), size: 8192, value: KeyValue::Extent(value) }, 1);
        let decoded = decode_node(&encode_node(&node)).unwrap();
        match &decoded.all_keys()[0].value {
            KeyValue::Extent(v) => assert_eq!(v.pointers[0].offset, 10),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn truncated_buffer_errors_instead_of_panicking() {
        let mut node = BtreeNode::new_leaf(BtreeId::Inodes, Position::POS_MIN, Position::POS_MAX);
        node.insert_key(Key { position: Position::new(1, 0, 0), size: 0, value: KeyValue::Inode(InodeValue::default()) }, 1);
        let mut encoded = encode_node(&node);
        encoded.truncate(encoded.len() / 2);
        assert!(decode_node(&encoded).is_err());
    }
}
