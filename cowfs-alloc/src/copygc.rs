//! Copygc (§4.5): "when fragmentation exceeds a threshold, rewrite
//! partial buckets to new buckets to recover space." Identifying
//! candidates is the allocator's job and lives here; actually moving an
//! extent's live data to a new bucket needs the extent I/O path's write
//! machinery, which this crate doesn't have — [`find_candidates`]
//! returns what a `cowfs-extent`-side mover would relocate, the same
//! split `cowfs-alloc`/`cowfs-extent` use for `Allocate` itself.

use cowfs_btree::BtreeEngine;
use cowfs_types::{BtreeId, BucketState, KeyValue, Position};

use crate::bucket_addr::BucketAddr;
use crate::device_config::DeviceConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CopygcCandidate {
    pub addr: BucketAddr,
    pub live_fraction: f64,
}

/// Scans `alloc` for dirty/cached buckets whose live data occupies less
/// than `threshold` of their capacity — the fragmentation signal worth
/// rewriting to reclaim the dead space around it.
pub fn find_candidates(engine: &BtreeEngine, device_configs: &std::collections::HashMap<u16, DeviceConfig>, threshold: f64) -> Vec<CopygcCandidate> {
    let alloc_tree = engine.tree(BtreeId::Alloc);
    let mut candidates = Vec::new();
    for key in alloc_tree.iter_init(Position::POS_MIN) {
        let KeyValue::AllocBucket(record) = &key.value else {
            continue;
        };
        if !matches!(record.state(), BucketState::Dirty | BucketState::Cached) {
            continue;
        }
        let addr = BucketAddr::from_position(key.position);
        let Some(config) = device_configs.get(&addr.device) else {
            continue;
        };
        let capacity_sectors = config.bucket_size_sectors.max(1);
        let live_sectors = (record.dirty_sectors + record.cached_sectors) as u64;
        let live_fraction = live_sectors as f64 / capacity_sectors as f64;
        if live_fraction < threshold && live_sectors > 0 {
            candidates.push(CopygcCandidate { addr, live_fraction });
        }
    }
    candidates.sort_by(|a, b| a.live_fraction.partial_cmp(&b.live_fraction).unwrap());
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_types::{BucketRecord, DataAllowedMask, DataType, Key, KeyValue, Target};
    use std::collections::HashMap;

    fn configs() -> HashMap<u16, DeviceConfig> {
        let mut map = HashMap::new();
        map.insert(0, DeviceConfig { target: Target::Null, data_allowed: DataAllowedMask::default_allowed(), discard: false, bucket_size_sectors: 8, nr_buckets: 4 });
        map
    }

    #[test]
    fn sparse_bucket_is_a_candidate() {
        let engine = BtreeEngine::new(16);
        let addr = BucketAddr::new(0, 0);
        let mut record = BucketRecord::new(DataType::User);
        record.set_state(BucketState::Dirty);
        record.dirty_sectors = 1;
        engine.tree(BtreeId::Alloc).update(Key { position: addr.alloc_position(), size: 0, value: KeyValue::AllocBucket(record) }).unwrap();

        let candidates = find_candidates(&engine, &configs(), 0.5);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].addr, addr);
    }

    #[test]
    fn full_bucket_is_not_a_candidate() {
        let engine = BtreeEngine::new(16);
        let addr = BucketAddr::new(0, 0);
        let mut record = BucketRecord::new(DataType::User);
        record.set_state(BucketState::Dirty);
        record.dirty_sectors = 8;
        engine.tree(BtreeId::Alloc).update(Key { position: addr.alloc_position(), size: 0, value: KeyValue::AllocBucket(record) }).unwrap();

        assert!(find_candidates(&engine, &configs(), 0.5).is_empty());
    }

    #[test]
    fn free_buckets_are_never_candidates() {
        let engine = BtreeEngine::new(16);
        let addr = BucketAddr::new(0, 0);
        engine
            .tree(BtreeId::Alloc)
            .update(Key { position: addr.alloc_position(), size: 0, value: KeyValue::AllocBucket(BucketRecord::new(DataType::User)) })
            .unwrap();
        assert!(find_candidates(&engine, &configs(), 0.9).is_empty());
    }
}
