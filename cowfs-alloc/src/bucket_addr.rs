//! Bucket addressing across the allocator's four btrees (§4.5). Every
//! one of `alloc`/`freespace`/`need_discard`/`lru` is keyed by
//! `Position`, which is natively `(inode, offset, snapshot)` — the
//! allocator repurposes `inode` to carry the device index, since a
//! bucket has no inode of its own, the same way `cowfs-journal` reuses
//! plain `Key`/`Position` machinery for entries that aren't file data.

use cowfs_types::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketAddr {
    pub device: u16,
    pub bucket_offset: u64,
}

impl BucketAddr {
    pub fn new(device: u16, bucket_offset: u64) -> Self {
        Self { device, bucket_offset }
    }

    /// `alloc` btree key: one entry per bucket, keyed only by address.
    pub fn alloc_position(self) -> Position {
        Position::new(self.device as u64, self.bucket_offset, 0)
    }

    /// `freespace` btree key: `(device, encoded_generation_bits ||
    /// offset)` per §4.5, so a scan of one device's free buckets visits
    /// them in `(generation, offset)` order — lets the allocator prefer
    /// low-generation buckets without a separate pass.
    pub fn freespace_position(self, generation: u8) -> Position {
        let encoded = ((generation as u64) << 56) | (self.bucket_offset & 0x00FF_FFFF_FFFF_FFFF);
        Position::new(self.device as u64, encoded, 0)
    }

    pub fn need_discard_position(self) -> Position {
        Position::new(self.device as u64, self.bucket_offset, 0)
    }

    /// `lru` btree key: `(device, read_time)` — note this is keyed by
    /// `read_time`, not bucket address, so a given bucket's LRU entry
    /// moves when [`cowfs_types::LruValue`]'s `read_time` would, which
    /// in this allocator happens once, at the point it becomes cached.
    pub fn lru_position(device: u16, read_time: u64) -> Position {
        Position::new(device as u64, read_time, 0)
    }

    pub fn from_position(position: Position) -> Self {
        Self { device: position.inode as u16, bucket_offset: position.offset }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freespace_position_orders_by_generation_then_offset() {
        let a = BucketAddr::new(0, 100);
        let low_gen = a.freespace_position(0);
        let high_gen = a.freespace_position(1);
        assert!(low_gen < high_gen);
    }

    #[test]
    fn alloc_position_round_trips_device_and_offset() {
        let addr = BucketAddr::new(3, 42);
        let back = BucketAddr::from_position(addr.alloc_position());
        assert_eq!(addr, back);
    }
}
