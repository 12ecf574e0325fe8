use cowfs_types::{DataAllowedMask, Uuid};

/// §3.2 invariant 7: every device is in exactly one of these states;
/// writes target only `Rw` members in the `data_allowed` mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    Rw = 0,
    Ro = 1,
    Failed = 2,
    Spare = 3,
}

impl DeviceState {
    pub fn accepts_writes(self) -> bool {
        matches!(self, DeviceState::Rw)
    }
}

/// One row of the member table (§3.1 Superblock).
#[derive(Debug, Clone)]
pub struct Member {
    pub uuid: Uuid,
    pub nbuckets: u64,
    pub bucket_size: u32,
    pub discard: bool,
    pub data_allowed: DataAllowedMask,
    pub durability: u8,
    pub group: Option<u32>,
    pub state: DeviceState,
}

impl Member {
    pub fn new(uuid: Uuid, nbuckets: u64, bucket_size: u32) -> Self {
        Self {
            uuid,
            nbuckets,
            bucket_size,
            discard: false,
            data_allowed: DataAllowedMask::default_allowed(),
            durability: 1,
            group: None,
            state: DeviceState::Rw,
        }
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.nbuckets * self.bucket_size as u64
    }
}
