use bitflags::bitflags;
use cowfs_io::{BlockDevice, SECTOR_SIZE};
use cowfs_types::{ChecksumType, DataAllowedMask, DeviceOptions, Error, FsOptions, Reader, Result, Target, Uuid, Writer};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::crypt::EncryptionKeyMaterial;
use crate::disk_group::DiskGroupTree;
use crate::layout::{LayoutRecord, SB_SECTOR};
use crate::member::{DeviceState, Member};

pub const SB_MAGIC: [u8; 16] = *b"cowfs-superblk!!";

bitflags! {
    /// Feature bits (§4.1). A superblock read that finds a required
    /// feature bit this build does not understand must fail with
    /// `UnknownRequiredFeature` (§4.1 contract).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureFlags: u64 {
        const EXTENTS_REPLICAS = 1 << 0;
        const ERASURE_CODING   = 1 << 1;
        const REFLINK          = 1 << 2;
        const ENCRYPTION       = 1 << 3;
        const SUBVOLUMES       = 1 << 4;
    }
}

/// Feature bits this build understands; anything else set as
/// "required" (here: any bit at all, since we don't yet model optional
/// vs. required bits separately) fails the mount per §4.1.
pub const SUPPORTED_FEATURES: FeatureFlags = FeatureFlags::all();

/// Fixed-size header, checksummed and written last on every update
/// (§4.1 superblock write contract). Variable-length sections (member
/// table, disk-group tree, crypt material, journal bucket list) follow
/// immediately after and are *not* covered by `header_checksum` — each
/// carries its own length and checksum so the section dispatcher can
/// validate them independently.
#[repr(C, packed)]
#[derive(Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct SuperblockHeader {
    pub magic: [u8; 16],
    pub checksum_type: u8,
    _pad0: [u8; 7],
    pub checksum: u64,
    pub uuid_external: [u8; 16],
    pub uuid_internal: [u8; 16],
    pub block_size: u32,
    pub btree_node_size: u32,
    pub nr_members: u32,
    pub nr_devices_this_sb: u32,
    pub features: u64,
    pub seq: u64,
}

/// Fully parsed superblock (§3.1). The journal bucket list, member
/// table, and disk-group tree are the "variable-length trailing
/// sections" the fixed header's section dispatcher decodes.
#[derive(Debug, Clone)]
pub struct Superblock {
    pub uuid_external: Uuid,
    pub uuid_internal: Uuid,
    pub block_size: u32,
    pub btree_node_size: u32,
    pub features: FeatureFlags,
    pub seq: u64,
    pub members: Vec<Member>,
    pub disk_groups: DiskGroupTree,
    pub crypt: Option<EncryptionKeyMaterial>,
    pub journal_buckets: Vec<Vec<u64>>,
    pub foreground_target: Target,
    pub background_target: Target,
    pub promote_target: Target,
    pub metadata_target: Target,
    pub options: FsOptions,
}

impl Superblock {
    pub fn new(uuid_external: Uuid, block_size: u32, btree_node_size: u32) -> Self {
        Self {
            uuid_external,
            uuid_internal: Uuid::new_v4(),
            block_size,
            btree_node_size,
            features: FeatureFlags::empty(),
            seq: 0,
            members: Vec::new(),
            disk_groups: DiskGroupTree::new(),
            crypt: None,
            journal_buckets: Vec::new(),
            foreground_target: Target::Null,
            background_target: Target::Null,
            promote_target: Target::Null,
            metadata_target: Target::Null,
            options: FsOptions::default(),
        }
    }

    fn header(&self, checksum_type: ChecksumType) -> SuperblockHeader {
        SuperblockHeader {
            magic: SB_MAGIC,
            checksum_type: checksum_type as u8,
            _pad0: [0; 7],
            checksum: 0,
            uuid_external: *self.uuid_external.as_bytes(),
            uuid_internal: *self.uuid_internal.as_bytes(),
            block_size: self.block_size,
            btree_node_size: self.btree_node_size,
            nr_members: self.members.len() as u32,
            nr_devices_this_sb: self.members.len() as u32,
            features: self.features.bits(),
            seq: self.seq,
        }
    }

    /// §4.1 superblock write: recompute the checksum last, write every
    /// replica offset in the layout, then flush. A caller that only has
    /// one replica ready (formatting) should still go through
    /// [`Superblock::write_one`] for each offset in turn.
    ///
    /// The member table is the one variable-length trailing section this
    /// build actually round-trips (disk-group tree, crypt material, and
    /// journal bucket list stay in-memory-only for now, tracked in
    /// `DESIGN.md`) — without it a remount would have no device list to
    /// rebuild a [`cowfs_types::DeviceSet`] from.
    pub fn write(&self, dev: &dyn BlockDevice, layout: &LayoutRecord) -> Result<()> {
        let members_buf = self.encode_members();
        for &offset in layout.offsets() {
            self.write_one(dev, offset)?;
            self.write_members(dev, offset + 1, &members_buf)?;
        }
        dev.flush()?;
        Ok(())
    }

    fn encode_members(&self) -> Vec<u8> {
        let mut w = Writer::new();
        for m in &self.members {
            for byte in m.uuid.as_bytes() {
                w.u8(*byte);
            }
            w.u64(m.nbuckets);
            w.u32(m.bucket_size);
            w.u8(m.discard as u8);
            w.u8(m.data_allowed.bits());
            w.u8(m.durability);
            w.u32(m.group.unwrap_or(u32::MAX));
            w.u8(m.state as u8);
        }
        w.into_bytes()
    }

    fn write_members(&self, dev: &dyn BlockDevice, start_sector: u64, encoded: &[u8]) -> Result<()> {
        if encoded.is_empty() {
            return Ok(());
        }
        let sectors = encoded.len().div_ceil(SECTOR_SIZE);
        let mut buf = encoded.to_vec();
        buf.resize(sectors * SECTOR_SIZE, 0);
        dev.write_at(start_sector, &buf)
    }

    fn read_members(dev: &dyn BlockDevice, start_sector: u64, nr_members: u32) -> Result<Vec<Member>> {
        const MEMBER_ENCODED_LEN: usize = 16 + 8 + 4 + 1 + 1 + 1 + 4 + 1;
        if nr_members == 0 {
            return Ok(Vec::new());
        }
        let total = nr_members as usize * MEMBER_ENCODED_LEN;
        let sectors = total.div_ceil(SECTOR_SIZE);
        let mut buf = vec![0u8; sectors * SECTOR_SIZE];
        dev.read_at(start_sector, &mut buf)?;

        let mut r = Reader::new(&buf);
        let mut members = Vec::with_capacity(nr_members as usize);
        for _ in 0..nr_members {
            let uuid_bytes = r.take(16)?;
            let uuid = Uuid::from_slice(uuid_bytes).map_err(|_| Error::Truncated)?;
            let nbuckets = r.u64()?;
            let bucket_size = r.u32()?;
            let discard = r.u8()? != 0;
            let data_allowed = DataAllowedMask::from_bits_truncate(r.u8()?);
            let durability = r.u8()?;
            let group_raw = r.u32()?;
            let state_raw = r.u8()?;
            let state = match state_raw {
                0 => DeviceState::Rw,
                1 => DeviceState::Ro,
                2 => DeviceState::Failed,
                3 => DeviceState::Spare,
                _ => return Err(Error::CorruptMetadata),
            };
            members.push(Member {
                uuid,
                nbuckets,
                bucket_size,
                discard,
                data_allowed,
                durability,
                group: if group_raw == u32::MAX { None } else { Some(group_raw) },
                state,
            });
        }
        Ok(members)
    }

    fn write_one(&self, dev: &dyn BlockDevice, sector: u64) -> Result<()> {
        let checksum_type = self.options.metadata_checksum_type;
        let mut header = self.header(checksum_type);
        let mut buf = vec![0u8; SECTOR_SIZE];
        header
            .write_to_prefix(&mut buf[..])
            .map_err(|_| Error::InvalidArgument("header too large for one sector"))?;
        // checksum covers everything after the checksum field itself
        let checksum_off = std::mem::offset_of!(SuperblockHeader, uuid_external);
        let checksum = cowfs_types::checksum::compute(checksum_type, &buf[checksum_off..]);
        header.checksum = checksum;
        header
            .write_to_prefix(&mut buf[..])
            .map_err(|_| Error::InvalidArgument("header too large for one sector"))?;
        dev.write_at(sector, &buf)?;
        Ok(())
    }

    /// §4.1 superblock read: primary replica first, falling back to the
    /// next layout offset (ultimately the end-of-device backup) on a bad
    /// magic or checksum, per the failure semantics in §4.1.
    pub fn read(dev: &dyn BlockDevice, layout: &LayoutRecord) -> Result<Self> {
        let mut last_err = Error::Truncated;
        for &offset in layout.offsets() {
            match Self::read_one(dev, offset) {
                Ok(sb) => return Ok(sb),
                Err(e) => {
                    log::warn!("superblock replica at sector {offset} unreadable: {e}");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn read_one(dev: &dyn BlockDevice, sector: u64) -> Result<Self> {
        let mut buf = vec![0u8; SECTOR_SIZE];
        dev.read_at(sector, &mut buf)?;
        let (header, _) =
            SuperblockHeader::read_from_prefix(&buf[..]).map_err(|_| Error::Truncated)?;
        if header.magic != SB_MAGIC {
            return Err(Error::BadMagic);
        }
        let checksum_type = checksum_type_from_u8(header.checksum_type)?;
        let checksum_off = std::mem::offset_of!(SuperblockHeader, uuid_external);
        if !cowfs_types::checksum::verify(checksum_type, &buf[checksum_off..], header.checksum) {
            return Err(Error::BadChecksum);
        }
        let features = FeatureFlags::from_bits_truncate(header.features);
        let unsupported = features & !SUPPORTED_FEATURES;
        if !unsupported.is_empty() {
            return Err(Error::UnknownRequiredFeature(unsupported.bits()));
        }
        let members = Self::read_members(dev, sector + 1, header.nr_members)?;

        Ok(Self {
            uuid_external: Uuid::from_bytes(header.uuid_external),
            uuid_internal: Uuid::from_bytes(header.uuid_internal),
            block_size: header.block_size,
            btree_node_size: header.btree_node_size,
            features,
            seq: header.seq,
            members,
            disk_groups: DiskGroupTree::new(),
            crypt: None,
            journal_buckets: Vec::new(),
            foreground_target: Target::Null,
            background_target: Target::Null,
            promote_target: Target::Null,
            metadata_target: Target::Null,
            options: FsOptions::default(),
        })
    }

    /// §4.1 `add_member`: member UUIDs must be unique; group assignment
    /// may create nested groups.
    pub fn add_member(&mut self, member: Member) -> Result<usize> {
        if self.members.iter().any(|m| m.uuid == member.uuid) {
            return Err(Error::AlreadyExists);
        }
        self.members.push(member);
        self.seq += 1;
        Ok(self.members.len() - 1)
    }

    pub fn remove_member(&mut self, idx: usize) -> Result<()> {
        if idx >= self.members.len() {
            return Err(Error::InvalidArgument("member index out of range"));
        }
        self.members.remove(idx);
        self.seq += 1;
        Ok(())
    }

    pub fn set_state(&mut self, idx: usize, state: crate::member::DeviceState) -> Result<()> {
        let member = self
            .members
            .get_mut(idx)
            .ok_or(Error::InvalidArgument("member index out of range"))?;
        member.state = state;
        self.seq += 1;
        Ok(())
    }

    pub fn resize(&mut self, idx: usize, new_nbuckets: u64) -> Result<()> {
        let member = self
            .members
            .get_mut(idx)
            .ok_or(Error::InvalidArgument("member index out of range"))?;
        member.nbuckets = new_nbuckets;
        self.seq += 1;
        Ok(())
    }

    /// §4.1 `disk_path_find_or_create`.
    pub fn disk_path_find_or_create(&mut self, label: &str) -> u32 {
        self.disk_groups.find_or_create(label)
    }

    /// §4.1 `parse_target`: resolves a string to a device index, a group
    /// index, or null.
    pub fn parse_target(&self, s: &str) -> Target {
        if s.is_empty() {
            return Target::Null;
        }
        if let Some(idx) = self.members.iter().position(|m| m.uuid.to_string() == s) {
            return Target::Dev(idx as u32);
        }
        if let Some(idx) = self.disk_groups.find(s) {
            return Target::Group(idx);
        }
        Target::Null
    }
}

fn checksum_type_from_u8(v: u8) -> Result<ChecksumType> {
    Ok(match v {
        0 => ChecksumType::None,
        1 => ChecksumType::Crc32c,
        2 => ChecksumType::Crc64,
        3 => ChecksumType::Xxh3,
        4 => ChecksumType::Poly1305,
        _ => return Err(Error::InvalidArgument("unknown checksum type byte")),
    })
}

pub fn primary_sector(layout: &LayoutRecord) -> u64 {
    layout.offsets().first().copied().unwrap_or(SB_SECTOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::Member;
    use cowfs_io::MemBlockDevice;

    #[test]
    fn write_read_round_trip() {
        let dev = MemBlockDevice::new(4096);
        let layout = LayoutRecord::default_for_device(4096).unwrap();
        layout.write(&dev).unwrap();

        let mut sb = Superblock::new(Uuid::new_v4(), 4096, 256 * 1024);
        sb.add_member(Member::new(Uuid::new_v4(), 100, 64)).unwrap();
        sb.write(&dev, &layout).unwrap();

        let read_back = Superblock::read(&dev, &layout).unwrap();
        assert_eq!(read_back.uuid_external, sb.uuid_external);
        assert_eq!(read_back.block_size, 4096);
    }

    #[test]
    fn corrupt_primary_falls_back_to_backup() {
        let dev = MemBlockDevice::new(4096);
        let layout = LayoutRecord::default_for_device(4096).unwrap();
        layout.write(&dev).unwrap();

        let sb = Superblock::new(Uuid::new_v4(), 4096, 256 * 1024);
        sb.write(&dev, &layout).unwrap();

        // tear the primary replica
        let mut garbage = [0u8; SECTOR_SIZE];
        garbage[0] = 0xFF;
        dev.write_at(layout.offsets()[0], &garbage).unwrap();

        let read_back = Superblock::read(&dev, &layout).unwrap();
        assert_eq!(read_back.uuid_external, sb.uuid_external);
    }

    #[test]
    fn both_replicas_bad_is_unmountable() {
        let dev = MemBlockDevice::new(4096);
        let layout = LayoutRecord::default_for_device(4096).unwrap();
        layout.write(&dev).unwrap();
        assert!(Superblock::read(&dev, &layout).is_err());
    }

    #[test]
    fn unknown_required_feature_rejected() {
        let dev = MemBlockDevice::new(4096);
        let layout = LayoutRecord::default_for_device(4096).unwrap();
        layout.write(&dev).unwrap();

        let mut sb = Superblock::new(Uuid::new_v4(), 4096, 256 * 1024);
        sb.features = FeatureFlags::from_bits_retain(1 << 63);
        sb.write(&dev, &layout).unwrap();

        assert!(matches!(
            Superblock::read(&dev, &layout),
            Err(Error::UnknownRequiredFeature(_))
        ));
    }
}
