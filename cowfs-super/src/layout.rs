use cowfs_io::{BlockDevice, SECTOR_SIZE};
use cowfs_types::{Error, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Sector holding the superblock layout record (§6.1).
pub const LAYOUT_SECTOR: u64 = 7;
/// Sector holding the primary superblock; `8 * 512 == 4096`, matching
/// the magic's required byte offset (§6.1).
pub const SB_SECTOR: u64 = 8;

pub const LAYOUT_MAGIC: [u8; 8] = *b"cowfsLyt";
pub const MAX_SB_OFFSETS: usize = 61;

/// On-disk layout record: where to find every superblock replica on
/// this device (§3.1 Superblock "layout" sub-record, §6.1).
#[repr(C, packed)]
#[derive(Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct LayoutRecord {
    pub magic: [u8; 8],
    pub max_size_bits: u8,
    pub nr_superblocks: u8,
    _pad: [u8; 6],
    pub sb_offsets: [u64; MAX_SB_OFFSETS],
}

impl LayoutRecord {
    pub fn new(offsets: &[u64], max_size_bits: u8) -> Result<Self> {
        if offsets.len() > MAX_SB_OFFSETS {
            return Err(Error::InvalidArgument("too many superblock offsets"));
        }
        let mut sb_offsets = [0u64; MAX_SB_OFFSETS];
        sb_offsets[..offsets.len()].copy_from_slice(offsets);
        Ok(Self {
            magic: LAYOUT_MAGIC,
            max_size_bits,
            nr_superblocks: offsets.len() as u8,
            _pad: [0; 6],
            sb_offsets,
        })
    }

    pub fn offsets(&self) -> &[u64] {
        &self.sb_offsets[..self.nr_superblocks as usize]
    }

    pub fn read(dev: &dyn BlockDevice) -> Result<Self> {
        let mut buf = [0u8; SECTOR_SIZE];
        dev.read_at(LAYOUT_SECTOR, &mut buf)?;
        let (record, _) =
            LayoutRecord::read_from_prefix(&buf).map_err(|_| Error::Truncated)?;
        if record.magic != LAYOUT_MAGIC {
            return Err(Error::BadMagic);
        }
        Ok(record)
    }

    pub fn write(&self, dev: &dyn BlockDevice) -> Result<()> {
        let mut buf = [0u8; SECTOR_SIZE];
        self.write_to_prefix(&mut buf)
            .map_err(|_| Error::InvalidArgument("layout record too large for one sector"))?;
        dev.write_at(LAYOUT_SECTOR, &buf)?;
        Ok(())
    }

    /// Default two-copy layout: primary at [`SB_SECTOR`], backup near
    /// the end of the device (§4.1 failure semantics).
    pub fn default_for_device(num_sectors: u64) -> Result<Self> {
        let backup = num_sectors.saturating_sub(SB_SECTOR + 64);
        Self::new(&[SB_SECTOR, backup], 63 - num_sectors.leading_zeros() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_io::MemBlockDevice;

    #[test]
    fn write_then_read_round_trips() {
        let dev = MemBlockDevice::new(4096);
        let layout = LayoutRecord::default_for_device(4096).unwrap();
        layout.write(&dev).unwrap();
        let read_back = LayoutRecord::read(&dev).unwrap();
        assert_eq!(read_back.offsets(), layout.offsets());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dev = MemBlockDevice::new(4096);
        assert!(matches!(LayoutRecord::read(&dev), Err(Error::BadMagic)));
    }
}
