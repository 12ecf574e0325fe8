use std::sync::Arc;

use cowfs_io::BlockDevice;
use cowfs_types::{Error, Result, Target, Uuid};

use crate::layout::LayoutRecord;
use crate::member::{DeviceState, Member};
use crate::superblock::Superblock;

/// A device handle (§4.1 `open`): owns the block device plus its parsed
/// layout and superblock, and is the sole writer of superblock state for
/// this device.
pub struct SuperHandle {
    dev: Arc<dyn BlockDevice>,
    layout: LayoutRecord,
    superblock: Superblock,
}

impl SuperHandle {
    /// Formats a brand-new device: writes a default layout, then an
    /// empty superblock through it.
    pub fn format(dev: Arc<dyn BlockDevice>, uuid: Uuid, block_size: u32, btree_node_size: u32) -> Result<Self> {
        let layout = LayoutRecord::default_for_device(dev.num_sectors())?;
        layout.write(dev.as_ref())?;
        let superblock = Superblock::new(uuid, block_size, btree_node_size);
        superblock.write(dev.as_ref(), &layout)?;
        Ok(Self { dev, layout, superblock })
    }

    /// §4.1 `open`.
    pub fn open(dev: Arc<dyn BlockDevice>) -> Result<Self> {
        let layout = LayoutRecord::read(dev.as_ref())?;
        let superblock = Superblock::read(dev.as_ref(), &layout)?;
        Ok(Self { dev, layout, superblock })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.dev
    }

    /// §4.1 `read_super`.
    pub fn read_super(&mut self) -> Result<&Superblock> {
        self.superblock = Superblock::read(self.dev.as_ref(), &self.layout)?;
        Ok(&self.superblock)
    }

    /// §4.1 `write_super`.
    pub fn write_super(&mut self) -> Result<()> {
        self.superblock.seq += 1;
        self.superblock.write(self.dev.as_ref(), &self.layout)
    }

    pub fn add_member(&mut self, member: Member) -> Result<usize> {
        let idx = self.superblock.add_member(member)?;
        self.write_super()?;
        Ok(idx)
    }

    pub fn remove_member(&mut self, idx: usize) -> Result<()> {
        self.superblock.remove_member(idx)?;
        self.write_super()
    }

    pub fn set_state(&mut self, idx: usize, state: DeviceState) -> Result<()> {
        self.superblock.set_state(idx, state)?;
        self.write_super()
    }

    /// §6.2 `DiskResize`.
    pub fn resize(&mut self, idx: usize, new_nbuckets: u64) -> Result<()> {
        self.superblock.resize(idx, new_nbuckets)?;
        self.write_super()
    }

    pub fn disk_path_find_or_create(&mut self, label: &str) -> Result<u32> {
        let idx = self.superblock.disk_path_find_or_create(label);
        self.write_super()?;
        Ok(idx)
    }

    pub fn parse_target(&self, s: &str) -> Target {
        self.superblock.parse_target(s)
    }
}

/// §6.4 mount helper contract: given a UUID, enumerate candidate device
/// paths, read each superblock, and collect those whose external UUID
/// matches, returning a colon-joined device list for the mount
/// primitive. The enumeration strategy (which paths to probe) is a
/// mount(8)-shim concern outside this crate's scope; callers supply the
/// candidate list.
pub fn resolve_mount_devices(
    candidates: &[(String, Arc<dyn BlockDevice>)],
    uuid: Uuid,
) -> Result<String> {
    let mut matches = Vec::new();
    for (path, dev) in candidates {
        match SuperHandle::open(dev.clone()) {
            Ok(handle) if handle.superblock().uuid_external == uuid => matches.push(path.clone()),
            Ok(_) => {}
            Err(e) => log::debug!("skipping {path}: {e}"),
        }
    }
    if matches.is_empty() {
        return Err(Error::NotFound);
    }
    Ok(matches.join(":"))
}
