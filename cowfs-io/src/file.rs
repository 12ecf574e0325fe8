use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{check_aligned, check_in_range, BlockDevice, IoError, Result, SECTOR_SIZE};

/// A [`BlockDevice`] backed by a real file or block special device.
pub struct FileBlockDevice {
    file: File,
    num_sectors: AtomicU64,
    discard: bool,
}

impl FileBlockDevice {
    /// Opens `path` for read/write and determines its size in sectors
    /// from the file metadata (a block device's size must be supplied by
    /// the caller via [`FileBlockDevice::with_num_sectors`], since
    /// `metadata().len()` on a special file is usually zero).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            num_sectors: AtomicU64::new(len / SECTOR_SIZE as u64),
            discard: false,
        })
    }

    pub fn with_num_sectors(mut self, num_sectors: u64) -> Self {
        self.num_sectors.store(num_sectors, Ordering::Relaxed);
        self
    }

    pub fn with_discard(mut self, discard: bool) -> Self {
        self.discard = discard;
        self
    }

    /// Grow or shrink the device's declared sector count (§6.2
    /// `DiskResize`). Does not itself resize the backing file; a caller
    /// formatting a plain file should `set_len` first.
    pub fn set_num_sectors(&self, num_sectors: u64) {
        self.num_sectors.store(num_sectors, Ordering::Relaxed);
    }
}

impl BlockDevice for FileBlockDevice {
    fn num_sectors(&self) -> u64 {
        self.num_sectors.load(Ordering::Relaxed)
    }

    fn read_at(&self, sector: u64, buf: &mut [u8]) -> Result<()> {
        check_aligned(buf.len())?;
        check_in_range(self.num_sectors(), sector, buf.len())?;
        let offset = sector * SECTOR_SIZE as u64;
        self.file.read_exact_at(buf, offset).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                IoError::ShortTransfer {
                    expected: buf.len(),
                    actual: 0,
                }
            } else {
                IoError::from(e)
            }
        })
    }

    fn write_at(&self, sector: u64, buf: &[u8]) -> Result<()> {
        check_aligned(buf.len())?;
        check_in_range(self.num_sectors(), sector, buf.len())?;
        let offset = sector * SECTOR_SIZE as u64;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn discard(&self, sector: u64, nr_sectors: u64) -> Result<()> {
        if !self.discard {
            return Ok(());
        }
        // Real TRIM requires an ioctl (BLKDISCARD) on a block special
        // file; on a plain file used for testing/loopback we only need
        // the bookkeeping the allocator does around this call, so this
        // is intentionally a no-op beyond range validation.
        check_in_range(self.num_sectors(), sector, (nr_sectors as usize) * SECTOR_SIZE)?;
        Ok(())
    }

    fn supports_discard(&self) -> bool {
        self.discard
    }
}
