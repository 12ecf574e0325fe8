//! The allocator (§4.5): four per-device btrees (`alloc`, `freespace`,
//! `need_discard`, `lru`), the `Allocate`/`Invalidate` operations,
//! reservation, and the discard/copygc background jobs. Sits on top of
//! `cowfs-btree`/`cowfs-journal`/`cowfs-txn` per the dependency order in
//! §2 — `cowfs-extent`'s write path calls into this crate rather than
//! the other way around.

use std::collections::{HashMap, HashSet};

use cowfs_btree::BtreeEngine;
use cowfs_journal::Journal;
use cowfs_txn::{run_txn, run_txn_seq};
use cowfs_types::{BtreeId, BucketRecord, BucketState, DataType, DeviceSet, Durability, Error, ExtentPointer, FreeSpaceValue, Key, KeyValue, LruValue, NeedDiscardValue, Position, Result, Target};
use parking_lot::Mutex;

use crate::bucket_addr::BucketAddr;
use crate::device_config::DeviceConfig;
use crate::reservation::ReservationPool;

pub struct Allocator {
    devices: HashMap<u16, DeviceConfig>,
    reservations: ReservationPool,
    /// §4.5 "bucket is open" predicate: buckets mid-transition between a
    /// freespace draw and their `alloc` record committing to `Dirty`,
    /// which [`Allocator::invalidate`] must not race past.
    open: Mutex<HashSet<BucketAddr>>,
}

impl Allocator {
    pub fn new(devices: HashMap<u16, DeviceConfig>) -> Self {
        let total_sectors: u64 = devices.values().map(|c| c.bucket_size_sectors * c.nr_buckets).sum();
        Self { devices, reservations: ReservationPool::new(total_sectors), open: Mutex::new(HashSet::new()) }
    }

    pub fn reservations(&self) -> &ReservationPool {
        &self.reservations
    }

    /// Per-device configuration, for callers driving the discard/copygc
    /// background passes directly (`cowfs_alloc::run_discard_pass`,
    /// `cowfs_alloc::find_candidates`) rather than through a method on
    /// this type.
    pub fn device_configs(&self) -> &HashMap<u16, DeviceConfig> {
        &self.devices
    }

    fn candidate_order(&self, target: Target, data_type: DataType, write_point: u64) -> Vec<u16> {
        let mut candidates: Vec<u16> = self
            .devices
            .iter()
            .filter(|(&dev, cfg)| cfg.matches(dev, target, data_type))
            .map(|(&dev, _)| dev)
            .collect();
        candidates.sort_unstable();
        if candidates.is_empty() {
            return candidates;
        }
        // §4.6 step 3's hashed write-point selector, reused here so
        // independent allocation streams fan out across candidate
        // devices instead of piling onto the first match.
        let rotate = (write_point.wrapping_mul(0x9E37_79B9_7F4A_7C15) as usize) % candidates.len();
        candidates.rotate_left(rotate);
        candidates
    }

    /// §4.5 `Allocate(write_point, target, durability)`.
    pub fn allocate(&self, engine: &BtreeEngine, journal: &Journal, devices: &DeviceSet, write_point: u64, target: Target, durability: Durability) -> Result<ExtentPointer> {
        let order = self.candidate_order(target, DataType::User, write_point);
        if order.is_empty() {
            return Err(Error::InvalidArgument("no device matches allocation target"));
        }

        for device in order {
            if let Some(addr) = self.draw_free_bucket(engine, device)? {
                self.open.lock().insert(addr);
                let result = self.commit_allocation(engine, journal, devices, addr, durability);
                self.open.lock().remove(&addr);
                return result;
            }
        }

        // No device had a free bucket; invalidate the globally
        // LRU-oldest cached bucket and give the caller one retry's
        // worth of a pointer by recursing once.
        if self.invalidate(engine, journal, devices)?.is_some() {
            return self.allocate(engine, journal, devices, write_point, target, durability);
        }
        Err(Error::NoSpace)
    }

    fn draw_free_bucket(&self, engine: &BtreeEngine, device: u16) -> Result<Option<BucketAddr>> {
        let tree = engine.tree(BtreeId::Freespace);
        let start = Position::new(device as u64, 0, 0);
        let Some(key) = tree.iter_init(start).take_while(|k| k.position.inode == device as u64).next() else {
            return Ok(None);
        };
        let KeyValue::FreeSpace(value) = &key.value else {
            return Err(Error::CorruptMetadata);
        };
        let addr = BucketAddr::new(value.device, value.bucket_offset);
        tree.delete(key.position)?;
        Ok(Some(addr))
    }

    fn commit_allocation(&self, engine: &BtreeEngine, journal: &Journal, devices: &DeviceSet, addr: BucketAddr, durability: Durability) -> Result<ExtentPointer> {
        let generation = run_txn(engine, journal, devices, |txn| {
            let alloc_tree = engine.tree(BtreeId::Alloc);
            let current = alloc_tree
                .lookup(addr.alloc_position())
                .ok_or(Error::corruption(BtreeId::Alloc, addr.alloc_position(), "freespace entry with no alloc record"))?;
            let KeyValue::AllocBucket(mut record) = current.value else {
                return Err(Error::CorruptMetadata);
            };
            record.set_state(BucketState::Dirty);
            record.data_type = DataType::User as u8;
            let generation = record.gen;
            txn.update(BtreeId::Alloc, Key { position: addr.alloc_position(), size: 0, value: KeyValue::AllocBucket(record) });
            Ok(generation)
        })?;

        let config = self.devices.get(&addr.device).expect("allocated device must be configured");
        let offset_sectors = addr.bucket_offset * config.bucket_size_sectors;
        Ok(ExtentPointer::new(addr.device, offset_sectors, generation, durability))
    }

    /// §4.5 `Invalidate`: pops the LRU head across every device's cached
    /// buckets, returning the address freed, or `None` if nothing is
    /// cached. The `alloc` record transition is journaled via
    /// `cowfs_txn::run_txn_seq` and stamps `write_time` with the commit
    /// sequence, so [`crate::discard::run_discard_pass`] can tell a
    /// durable invalidation from one still sitting in the journal.
    pub fn invalidate(&self, engine: &BtreeEngine, journal: &Journal, devices: &DeviceSet) -> Result<Option<BucketAddr>> {
        let lru_tree = engine.tree(BtreeId::Lru);
        let mut iter = lru_tree.iter_init(Position::POS_MIN);
        loop {
            let Some(key) = iter.next() else { return Ok(None) };
            let KeyValue::Lru(value) = &key.value else {
                return Err(Error::CorruptMetadata);
            };
            let addr = BucketAddr::new(value.device, value.bucket_offset);
            if self.open.lock().contains(&addr) {
                continue;
            }
            lru_tree.delete(key.position)?;

            let alloc_tree = engine.tree(BtreeId::Alloc);
            let Some(current) = alloc_tree.lookup(addr.alloc_position()) else {
                continue;
            };
            let KeyValue::AllocBucket(seed) = current.value else {
                return Err(Error::CorruptMetadata);
            };
            let config = self.devices.get(&addr.device).expect("lru entry must reference a configured device");
            let discard = config.discard;

            // The committed record can't carry its own commit sequence
            // (it's built before `commit()` runs), so stamp `write_time`
            // with the sequence `run_txn_seq` hands back in a second,
            // non-transactional update — `alloc` is still the source of
            // truth for bucket state, this just annotates durability.
            let (mut record, seq) = run_txn_seq(engine, journal, devices, |txn| {
                let mut record = seed;
                record.bump_generation();
                record.dirty_sectors = 0;
                record.cached_sectors = 0;
                record.set_state(if discard { BucketState::NeedDiscard } else { BucketState::Free });
                txn.update(BtreeId::Alloc, Key { position: addr.alloc_position(), size: 0, value: KeyValue::AllocBucket(record) });
                Ok(record)
            })?;
            record.write_time = seq;
            alloc_tree.update(Key { position: addr.alloc_position(), size: 0, value: KeyValue::AllocBucket(record) })?;

            if discard {
                let need_discard_tree = engine.tree(BtreeId::NeedDiscard);
                need_discard_tree.update(Key {
                    position: addr.need_discard_position(),
                    size: 0,
                    value: KeyValue::NeedDiscard(NeedDiscardValue { device: addr.device, bucket_offset: addr.bucket_offset }),
                })?;
            } else {
                let freespace_tree = engine.tree(BtreeId::Freespace);
                freespace_tree.update(Key {
                    position: addr.freespace_position(record.gen),
                    size: 0,
                    value: KeyValue::FreeSpace(FreeSpaceValue { device: addr.device, bucket_offset: addr.bucket_offset, generation: record.gen }),
                })?;
            }
            return Ok(Some(addr));
        }
    }

    /// Marks a cached bucket's address for the LRU clock, called when
    /// the extent read path caches a replica.
    pub fn note_cached(&self, engine: &BtreeEngine, addr: BucketAddr, read_time: u64) -> Result<()> {
        engine.tree(BtreeId::Lru).update(Key {
            position: BucketAddr::lru_position(addr.device, read_time),
            size: 0,
            value: KeyValue::Lru(LruValue { device: addr.device, bucket_offset: addr.bucket_offset }),
        })
    }
}
