//! Freespace-init (§4.5): on first mount after a format upgrade that
//! adds the freespace/need_discard indices, scan `alloc` once and
//! populate them from whatever state each bucket is already recorded
//! in. Ordinary operation never calls this — `Allocate`/`Invalidate`
//! keep the indices in sync incrementally — so this is a one-shot bulk
//! driver the mount path runs conditionally, the same role
//! `cowfs-super`'s feature-bit check plays for on-disk format bumps.

use cowfs_btree::BtreeEngine;
use cowfs_types::{BtreeId, BucketState, FreeSpaceValue, Key, KeyValue, NeedDiscardValue, Position, Result};

use crate::bucket_addr::BucketAddr;

pub struct FreespaceInitStats {
    pub freespace_entries: usize,
    pub need_discard_entries: usize,
}

pub fn run_freespace_init(engine: &BtreeEngine) -> Result<FreespaceInitStats> {
    let alloc_tree = engine.tree(BtreeId::Alloc);
    let freespace_tree = engine.tree(BtreeId::Freespace);
    let need_discard_tree = engine.tree(BtreeId::NeedDiscard);

    let mut stats = FreespaceInitStats { freespace_entries: 0, need_discard_entries: 0 };
    for key in alloc_tree.iter_init(Position::POS_MIN) {
        let KeyValue::AllocBucket(record) = &key.value else {
            continue;
        };
        let addr = BucketAddr::from_position(key.position);
        match record.state() {
            BucketState::Free => {
                freespace_tree.update(Key {
                    position: addr.freespace_position(record.gen),
                    size: 0,
                    value: KeyValue::FreeSpace(FreeSpaceValue { device: addr.device, bucket_offset: addr.bucket_offset, generation: record.gen }),
                })?;
                stats.freespace_entries += 1;
            }
            BucketState::NeedDiscard => {
                need_discard_tree.update(Key {
                    position: addr.need_discard_position(),
                    size: 0,
                    value: KeyValue::NeedDiscard(NeedDiscardValue { device: addr.device, bucket_offset: addr.bucket_offset }),
                })?;
                stats.need_discard_entries += 1;
            }
            BucketState::Dirty | BucketState::Cached | BucketState::Metadata => {}
        }
    }
    log::info!(
        "freespace-init: {} freespace entries, {} need_discard entries",
        stats.freespace_entries,
        stats.need_discard_entries
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_types::{BucketRecord, DataType};

    #[test]
    fn populates_freespace_for_free_buckets() {
        let engine = BtreeEngine::new(16);
        for bucket in 0..3u64 {
            let addr = BucketAddr::new(0, bucket);
            engine
                .tree(BtreeId::Alloc)
                .update(Key { position: addr.alloc_position(), size: 0, value: KeyValue::AllocBucket(BucketRecord::new(DataType::User)) })
                .unwrap();
        }
        let stats = run_freespace_init(&engine).unwrap();
        assert_eq!(stats.freespace_entries, 3);
        assert_eq!(stats.need_discard_entries, 0);
        assert!(engine.tree(BtreeId::Freespace).lookup(BucketAddr::new(0, 1).freespace_position(0)).is_some());
    }

    #[test]
    fn dirty_buckets_are_skipped() {
        let engine = BtreeEngine::new(16);
        let addr = BucketAddr::new(0, 0);
        let mut record = BucketRecord::new(DataType::User);
        record.set_state(BucketState::Dirty);
        engine.tree(BtreeId::Alloc).update(Key { position: addr.alloc_position(), size: 0, value: KeyValue::AllocBucket(record) }).unwrap();

        let stats = run_freespace_init(&engine).unwrap();
        assert_eq!(stats.freespace_entries, 0);
        assert_eq!(stats.need_discard_entries, 0);
    }
}
