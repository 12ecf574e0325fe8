//! Discard worker (§4.5): periodically drains `need_discard`, issuing
//! device TRIMs for buckets whose invalidation is durable, then frees
//! them. "Durable" is tracked via [`cowfs_types::BucketRecord::write_time`],
//! stamped with the invalidating transaction's journal sequence —
//! `write_time` has no other use for a bucket that was just invalidated
//! (it isn't user data), so it doubles as the durability watermark
//! rather than inventing a new on-disk field for one worker to read.

use cowfs_btree::BtreeEngine;
use cowfs_types::{BtreeId, BucketState, DeviceSet, FreeSpaceValue, Key, KeyValue, Position, Result};

use crate::bucket_addr::BucketAddr;
use crate::device_config::DeviceConfig;

/// Runs one discard pass. `durable_upto_seq` is the newest journal
/// sequence the caller has confirmed flushed; buckets invalidated after
/// that point are left queued for the next pass.
pub fn run_discard_pass(engine: &BtreeEngine, devices: &DeviceSet, device_configs: &std::collections::HashMap<u16, DeviceConfig>, durable_upto_seq: u64) -> Result<usize> {
    let need_discard = engine.tree(BtreeId::NeedDiscard);
    let alloc_tree = engine.tree(BtreeId::Alloc);
    let freespace_tree = engine.tree(BtreeId::Freespace);

    let queued: Vec<Key> = need_discard.iter_init(Position::POS_MIN).collect();
    let mut discarded = 0;
    for key in queued {
        let KeyValue::NeedDiscard(value) = &key.value else {
            continue;
        };
        let addr = BucketAddr::new(value.device, value.bucket_offset);
        let Some(record_key) = alloc_tree.lookup(addr.alloc_position()) else {
            need_discard.delete(key.position)?;
            continue;
        };
        let KeyValue::AllocBucket(mut record) = record_key.value else {
            continue;
        };
        if record.write_time > durable_upto_seq {
            continue;
        }

        if let Some(config) = device_configs.get(&addr.device) {
            if config.discard {
                if let Ok(dev) = devices.get(addr.device) {
                    if dev.supports_discard() {
                        let offset = addr.bucket_offset * config.bucket_size_sectors;
                        dev.discard(offset, config.bucket_size_sectors)?;
                    }
                }
            }
        }

        record.set_state(BucketState::Free);
        alloc_tree.update(Key { position: addr.alloc_position(), size: 0, value: KeyValue::AllocBucket(record) })?;
        freespace_tree.update(Key {
            position: addr.freespace_position(record.gen),
            size: 0,
            value: KeyValue::FreeSpace(FreeSpaceValue { device: addr.device, bucket_offset: addr.bucket_offset, generation: record.gen }),
        })?;
        need_discard.delete(key.position)?;
        discarded += 1;
    }
    Ok(discarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_io::MemBlockDevice;
    use cowfs_types::{BucketRecord, DataAllowedMask, DataType, Target};
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn durable_bucket_is_discarded_and_freed() {
        let engine = BtreeEngine::new(16);
        let mut devices = DeviceSet::new();
        devices.insert(0, Arc::new(MemBlockDevice::new(1024)));
        let mut configs = HashMap::new();
        configs.insert(0, DeviceConfig { target: Target::Null, data_allowed: DataAllowedMask::default_allowed(), discard: true, bucket_size_sectors: 8, nr_buckets: 4 });

        let addr = BucketAddr::new(0, 1);
        let mut record = BucketRecord::new(DataType::User);
        record.set_state(BucketState::NeedDiscard);
        record.write_time = 5;
        engine.tree(BtreeId::Alloc).update(Key { position: addr.alloc_position(), size: 0, value: KeyValue::AllocBucket(record) }).unwrap();
        engine
            .tree(BtreeId::NeedDiscard)
            .update(Key {
                position: addr.need_discard_position(),
                size: 0,
                value: KeyValue::NeedDiscard(cowfs_types::NeedDiscardValue { device: 0, bucket_offset: 1 }),
            })
            .unwrap();

        let count = run_discard_pass(&engine, &devices, &configs, 10).unwrap();
        assert_eq!(count, 1);
        assert!(engine.tree(BtreeId::NeedDiscard).lookup(addr.need_discard_position()).is_none());
        let updated = engine.tree(BtreeId::Alloc).lookup(addr.alloc_position()).unwrap();
        let KeyValue::AllocBucket(rec) = updated.value else { panic!("wrong key type") };
        assert_eq!(rec.state(), BucketState::Free);
        assert!(engine.tree(BtreeId::Freespace).lookup(addr.freespace_position(rec.gen)).is_some());
    }

    #[test]
    fn not_yet_durable_bucket_stays_queued() {
        let engine = BtreeEngine::new(16);
        let devices = DeviceSet::new();
        let configs = HashMap::new();

        let addr = BucketAddr::new(0, 1);
        let mut record = BucketRecord::new(DataType::User);
        record.set_state(BucketState::NeedDiscard);
        record.write_time = 50;
        engine.tree(BtreeId::Alloc).update(Key { position: addr.alloc_position(), size: 0, value: KeyValue::AllocBucket(record) }).unwrap();
        engine
            .tree(BtreeId::NeedDiscard)
            .update(Key {
                position: addr.need_discard_position(),
                size: 0,
                value: KeyValue::NeedDiscard(cowfs_types::NeedDiscardValue { device: 0, bucket_offset: 1 }),
            })
            .unwrap();

        let count = run_discard_pass(&engine, &devices, &configs, 10).unwrap();
        assert_eq!(count, 0);
        assert!(engine.tree(BtreeId::NeedDiscard).lookup(addr.need_discard_position()).is_some());
    }
}
