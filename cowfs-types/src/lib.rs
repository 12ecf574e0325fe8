//! Shared data model (§3) used by every `cowfs` crate: positions, keys,
//! B-tree identifiers, checksums, bucket/extent records, targets,
//! options, and the common error type. Kept dependency-free of any one
//! layer so `cowfs-super`, `cowfs-btree`, `cowfs-alloc`, and
//! `cowfs-extent` can all build on the same vocabulary without a cycle.

pub mod btree_id;
pub mod bucket;
pub mod checksum;
pub mod device_set;
pub mod error;
pub mod extent;
pub mod key;
pub mod options;
pub mod position;
pub mod target;
pub mod wire;

pub use btree_id::BtreeId;
pub use bucket::{BucketFlags, BucketRecord, BucketState, DataAllowedMask, DataType};
pub use checksum::ChecksumType;
pub use device_set::DeviceSet;
pub use error::{Error, RestartReason, Result};
pub use extent::{CompressionType, Durability, ErasureStripePtr, ExtentPointer, ExtentValue};
pub use key::{
    DirentValue, FreeSpaceValue, InodeValue, Key, KeyType, KeyValue, LruValue, NeedDiscardValue,
    ReflinkValue, ReplicasValue, SnapshotValue, SubvolumeValue, XattrValue,
};
pub use options::{DeviceOptions, ErrorAction, FsOptions, OptionKind, OptionMeta, OptionScope};
pub use position::Position;
pub use target::Target;
pub use wire::{Reader, Writer};

/// 128-bit little-endian identifier (§6.1 "UUIDs").
pub type Uuid = uuid::Uuid;
