//! Node I/O: reading a node image through the replica-picker (retrying
//! the next pointer on checksum failure) and writing a freshly COW'd
//! node image to a caller-supplied set of replica locations. Allocating
//! *where* to write is the allocator's job (§4.5); this module only
//! knows how to get bytes to and from already-chosen locations, the
//! same division of labor `cowfs-extent` uses for data.

use cowfs_io::SECTOR_SIZE;
use cowfs_types::{checksum, ChecksumType, DeviceSet, Error, ExtentPointer, Result};

use crate::codec::{decode_node, encode_node};
use crate::node::{BtreeNode, NodePtr};

/// Reads a node, trying each pointer in `ptr` in order until one
/// decodes and checksum-validates. All pointers failing is
/// [`Error::UnrecoverableRead`] (§7 "no replica succeeded").
pub fn read_node(devices: &DeviceSet, ptr: &NodePtr, size_sectors: u32) -> Result<BtreeNode> {
    let mut last_err = Error::UnrecoverableRead;
    for pointer in &ptr.pointers {
        match read_one(devices, pointer, size_sectors) {
            Ok(node) => return Ok(node),
            Err(e) => {
                log::warn!("btree node replica on device {} unreadable: {e}", pointer.device);
                last_err = e;
            }
        }
    }
    Err(last_err)
}

fn read_one(devices: &DeviceSet, pointer: &ExtentPointer, size_sectors: u32) -> Result<BtreeNode> {
    let dev = devices.get(pointer.device)?;
    let mut buf = vec![0u8; size_sectors as usize * SECTOR_SIZE];
    dev.read_at(pointer.offset, &mut buf)?;

    let checksum_type = checksum_type_from_u8(pointer.checksum_type);
    if !checksum::verify(checksum_type, &buf, pointer.checksum) {
        return Err(Error::ChecksumMismatch);
    }
    let node = decode_node(&buf)?;
    if !node.validate() {
        return Err(Error::CorruptMetadata);
    }
    Ok(node)
}

/// Writes `node` to every pointer in `targets`, stamping each with the
/// checksum of the encoded image, and returns the [`NodePtr`] the
/// parent should now reference. The parent-pointer flip itself (making
/// this the visible version) is the caller's responsibility — it must
/// happen atomically with respect to readers, which for interior nodes
/// means going through the transaction layer's path update.
pub fn write_node(devices: &DeviceSet, node: &BtreeNode, mut targets: Vec<ExtentPointer>, checksum_type: ChecksumType, size_sectors: u32) -> Result<NodePtr> {
    let mut encoded = encode_node(node);
    let capacity = size_sectors as usize * SECTOR_SIZE;
    if encoded.len() > capacity {
        return Err(Error::InvalidArgument("node image exceeds btree node size"));
    }
    encoded.resize(capacity, 0);
    let sum = checksum::compute(checksum_type, &encoded);

    for target in &mut targets {
        let dev = devices.get(target.device)?;
        dev.write_at(target.offset, &encoded)?;
        target.checksum_type = checksum_type as u8;
        target.checksum = sum;
    }
    for target in &targets {
        devices.get(target.device)?.flush()?;
    }

    Ok(NodePtr::new(node.btree_id, node.level, targets))
}

fn checksum_type_from_u8(v: u8) -> ChecksumType {
    use ChecksumType::*;
    match v {
        0 => None,
        1 => Crc32c,
        2 => Crc64,
        3 => Xxh3,
        _ => Poly1305,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_io::MemBlockDevice;
    use cowfs_types::{BtreeId, InodeValue, Key, KeyValue, Position};
    use std::sync::Arc;

    fn devices_with(count: usize, sectors: u64) -> DeviceSet {
        let mut set = DeviceSet::new();
        for i in 0..count {
            set.insert(i as u16, Arc::new(MemBlockDevice::new(sectors)));
        }
        set
    }

    fn sample_node() -> BtreeNode {
        let mut node = BtreeNode::new_leaf(BtreeId::Inodes, Position::POS_MIN, Position::POS_MAX);
        node.insert_key(Key { position: Position::new(1, 0, 0), size: 0, value: KeyValue::Inode(InodeValue::default()) }, 1);
        node
    }

    #[test]
    fn write_then_read_round_trips() {
        let devices = devices_with(2, 1024);
        let node = sample_node();
        let targets = vec![ExtentPointer::new(0, 16, 0, 1), ExtentPointer::new(1, 16, 0, 1)];
        let ptr = write_node(&devices, &node, targets, ChecksumType::Crc32c, 8).unwrap();
        let read_back = read_node(&devices, &ptr, 8).unwrap();
        assert_eq!(read_back.all_keys().len(), 1);
    }

    #[test]
    fn falls_back_to_second_replica_on_corruption() {
        let devices = devices_with(2, 1024);
        let node = sample_node();
        let targets = vec![ExtentPointer::new(0, 16, 0, 1), ExtentPointer::new(1, 16, 0, 1)];
        let ptr = write_node(&devices, &node, targets, ChecksumType::Crc32c, 8).unwrap();

        let mut garbage = vec![0u8; 8 * SECTOR_SIZE];
        garbage[0] = 0xFF;
        devices.get(0).unwrap().write_at(16, &garbage).unwrap();

        let read_back = read_node(&devices, &ptr, 8).unwrap();
        assert_eq!(read_back.all_keys().len(), 1);
    }

    #[test]
    fn all_replicas_bad_is_unrecoverable() {
        let devices = devices_with(1, 1024);
        let node = sample_node();
        let targets = vec![ExtentPointer::new(0, 16, 0, 1)];
        let ptr = write_node(&devices, &node, targets, ChecksumType::Crc32c, 8).unwrap();

        let mut garbage = vec![0u8; 8 * SECTOR_SIZE];
        garbage[0] = 0xFF;
        devices.get(0).unwrap().write_at(16, &garbage).unwrap();

        assert!(read_node(&devices, &ptr, 8).is_err());
    }
}
