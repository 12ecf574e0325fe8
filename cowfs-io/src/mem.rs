use std::sync::RwLock;

use crate::{check_aligned, check_in_range, BlockDevice, Result, SECTOR_SIZE};

/// An in-memory [`BlockDevice`], used by unit tests and by
/// `cowfs-harness`'s multi-device test rig. Grounded on the teacher's
/// `io::Cursor`, generalized from a single borrowed slice to an owned,
/// growable, lock-protected buffer so it can stand in for a whole disk
/// across a multi-step test.
pub struct MemBlockDevice {
    data: RwLock<Vec<u8>>,
    discard: bool,
}

impl MemBlockDevice {
    pub fn new(num_sectors: u64) -> Self {
        Self {
            data: RwLock::new(vec![0u8; num_sectors as usize * SECTOR_SIZE]),
            discard: true,
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().expect("lock poisoned").clone()
    }
}

impl BlockDevice for MemBlockDevice {
    fn num_sectors(&self) -> u64 {
        (self.data.read().expect("lock poisoned").len() / SECTOR_SIZE) as u64
    }

    fn read_at(&self, sector: u64, buf: &mut [u8]) -> Result<()> {
        check_aligned(buf.len())?;
        check_in_range(self.num_sectors(), sector, buf.len())?;
        let data = self.data.read().expect("lock poisoned");
        let start = sector as usize * SECTOR_SIZE;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&self, sector: u64, buf: &[u8]) -> Result<()> {
        check_aligned(buf.len())?;
        check_in_range(self.num_sectors(), sector, buf.len())?;
        let mut data = self.data.write().expect("lock poisoned");
        let start = sector as usize * SECTOR_SIZE;
        data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn discard(&self, sector: u64, nr_sectors: u64) -> Result<()> {
        let mut data = self.data.write().expect("lock poisoned");
        let start = sector as usize * SECTOR_SIZE;
        let end = start + nr_sectors as usize * SECTOR_SIZE;
        data.get_mut(start..end)
            .ok_or(crate::IoError::OutOfRange)?
            .fill(0);
        Ok(())
    }

    fn supports_discard(&self) -> bool {
        self.discard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_roundtrip() {
        let dev = MemBlockDevice::new(4);
        let buf = [0xA5u8; SECTOR_SIZE];
        dev.write_at(1, &buf).unwrap();
        let mut out = [0u8; SECTOR_SIZE];
        dev.read_at(1, &mut out).unwrap();
        assert_eq!(buf, out);
    }

    #[test]
    fn out_of_range_rejected() {
        let dev = MemBlockDevice::new(4);
        let buf = [0u8; SECTOR_SIZE];
        assert!(dev.write_at(4, &buf).is_err());
    }

    #[test]
    fn unaligned_rejected() {
        let dev = MemBlockDevice::new(4);
        let buf = [0u8; 10];
        assert!(dev.write_at(0, &buf).is_err());
    }
}
