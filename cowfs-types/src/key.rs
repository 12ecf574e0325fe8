//! The closed set of key/value variants a B-tree key can carry (§3.1,
//! §9 "Polymorphism over key variants"). `KeyValue` is the tagged
//! variant the note calls for; each variant owns its encode/decode
//! rather than `cowfs-btree` knowing about any of them, so adding a key
//! type never touches the B-tree engine itself.

use crate::bucket::BucketRecord;
use crate::extent::ExtentValue;
use crate::position::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum KeyType {
    Inode = 0,
    Dirent = 1,
    Extent = 2,
    AllocBucket = 3,
    FreeSpace = 4,
    NeedDiscard = 5,
    Lru = 6,
    Replicas = 7,
    Snapshot = 8,
    Subvolume = 9,
    Xattr = 10,
    Reflink = 11,
}

/// A full B-tree key: position, size, type tag, and payload (§3.1
/// "Key"). `size` is the span in logical units the key covers — for
/// extents, bytes; for everything else conventionally 0.
#[derive(Debug, Clone)]
pub struct Key {
    pub position: Position,
    pub size: u64,
    pub value: KeyValue,
}

impl Key {
    pub fn key_type(&self) -> KeyType {
        self.value.key_type()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
    }
}
impl Eq for Key {}
impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Key {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.position.cmp(&other.position)
    }
}

#[derive(Debug, Clone)]
pub enum KeyValue {
    Inode(InodeValue),
    Dirent(DirentValue),
    Extent(ExtentValue),
    AllocBucket(BucketRecord),
    FreeSpace(FreeSpaceValue),
    NeedDiscard(NeedDiscardValue),
    Lru(LruValue),
    Replicas(ReplicasValue),
    Snapshot(SnapshotValue),
    Subvolume(SubvolumeValue),
    Xattr(XattrValue),
    Reflink(ReflinkValue),
}

impl KeyValue {
    pub fn key_type(&self) -> KeyType {
        match self {
            KeyValue::Inode(_) => KeyType::Inode,
            KeyValue::Dirent(_) => KeyType::Dirent,
            KeyValue::Extent(_) => KeyType::Extent,
            KeyValue::AllocBucket(_) => KeyType::AllocBucket,
            KeyValue::FreeSpace(_) => KeyType::FreeSpace,
            KeyValue::NeedDiscard(_) => KeyType::NeedDiscard,
            KeyValue::Lru(_) => KeyType::Lru,
            KeyValue::Replicas(_) => KeyType::Replicas,
            KeyValue::Snapshot(_) => KeyType::Snapshot,
            KeyValue::Subvolume(_) => KeyType::Subvolume,
            KeyValue::Xattr(_) => KeyType::Xattr,
            KeyValue::Reflink(_) => KeyType::Reflink,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InodeValue {
    pub uid: u32,
    pub gid: u32,
    pub mode: u16,
    pub size: u64,
    pub atime: u64,
    pub ctime: u64,
    pub mtime: u64,
    pub nlink: u32,
    pub bi_flags: u32,
}

#[derive(Debug, Clone)]
pub struct DirentValue {
    pub target_inode: u64,
    pub name: String,
    pub is_dir: bool,
}

/// `(device, encoded_generation_bits || offset)` free-space entry
/// (§4.5). Stored as a value only so the position can carry the packed
/// key; `device`/`bucket_offset` here are denormalized for convenience.
#[derive(Debug, Clone, Copy)]
pub struct FreeSpaceValue {
    pub device: u16,
    pub bucket_offset: u64,
    pub generation: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct NeedDiscardValue {
    pub device: u16,
    pub bucket_offset: u64,
}

/// `(device, read_time)` cached-bucket LRU entry (§4.5).
#[derive(Debug, Clone, Copy)]
pub struct LruValue {
    pub device: u16,
    pub bucket_offset: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicasValue {
    pub nr_required: u8,
    pub nr_devices: u8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotValue {
    pub parent: u32,
    pub subvolume: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SubvolumeValue {
    pub root_inode: u64,
    pub snapshot: u32,
    pub readonly: bool,
}

#[derive(Debug, Clone, Default)]
pub struct XattrValue {
    pub name: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ReflinkValue {
    pub refcount: u32,
    pub extent: Option<ExtentValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_order_by_position_only() {
        let mk = |offset| Key {
            position: Position::new(1, offset, 0),
            size: 0,
            value: KeyValue::Inode(InodeValue::default()),
        };
        assert!(mk(0) < mk(1));
        assert_eq!(mk(5).key_type(), KeyType::Inode);
    }
}
