use bitflags::bitflags;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Lifecycle state of one bucket (§3.3). Transitions are driven entirely
/// by `cowfs-alloc`; every other layer only reads this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BucketState {
    Free = 0,
    Dirty = 1,
    Cached = 2,
    Metadata = 3,
    NeedDiscard = 4,
}

impl BucketState {
    pub const fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => BucketState::Free,
            1 => BucketState::Dirty,
            2 => BucketState::Cached,
            3 => BucketState::Metadata,
            4 => BucketState::NeedDiscard,
            _ => return None,
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BucketFlags: u8 {
        const NEED_DISCARD = 1 << 0;
        const NEED_INC_GEN = 1 << 1;
    }
}

/// Data type a bucket is allowed to hold, drawn from the `data_allowed`
/// mask on its member (§3.1, §9 option `data_allowed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    Journal = 0,
    Btree = 1,
    User = 2,
    Cached = 3,
    Parity = 4,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DataAllowedMask: u8 {
        const JOURNAL = 1 << 0;
        const BTREE = 1 << 1;
        const USER = 1 << 2;
        const CACHED = 1 << 3;
        const PARITY = 1 << 4;
    }
}

impl DataAllowedMask {
    /// Default from §9: all types except `cached`.
    pub fn default_allowed() -> Self {
        Self::all() - Self::CACHED
    }

    pub fn allows(self, ty: DataType) -> bool {
        self.contains(match ty {
            DataType::Journal => Self::JOURNAL,
            DataType::Btree => Self::BTREE,
            DataType::User => Self::USER,
            DataType::Cached => Self::CACHED,
            DataType::Parity => Self::PARITY,
        })
    }
}

/// Per-bucket allocator record, the value side of an `alloc` btree key
/// (§3.1 Bucket, §3.2 invariant 4).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct BucketRecord {
    pub gen: u8,
    pub data_type: u8,
    pub state: u8,
    pub flags: u8,
    pub dirty_sectors: u32,
    pub cached_sectors: u32,
    pub read_time: u64,
    pub write_time: u64,
    pub stripe: u32,
    _pad: u32,
}

impl BucketRecord {
    pub fn new(data_type: DataType) -> Self {
        Self {
            gen: 0,
            data_type: data_type as u8,
            state: BucketState::Free as u8,
            flags: 0,
            dirty_sectors: 0,
            cached_sectors: 0,
            read_time: 0,
            write_time: 0,
            stripe: 0,
            _pad: 0,
        }
    }

    pub fn state(&self) -> BucketState {
        BucketState::from_u8(self.state).unwrap_or(BucketState::Free)
    }

    pub fn set_state(&mut self, state: BucketState) {
        self.state = state as u8;
    }

    pub fn flags(&self) -> BucketFlags {
        BucketFlags::from_bits_truncate(self.flags)
    }

    pub fn set_flags(&mut self, flags: BucketFlags) {
        self.flags = flags.bits();
    }

    /// §3.3: generation increments on re-use when unsafe to skip (i.e.
    /// whenever the bucket is invalidated out from under a live pointer).
    pub fn bump_generation(&mut self) {
        self.gen = self.gen.wrapping_add(1);
    }

    /// Reconstructs a record from its raw on-disk fields (used by the
    /// node codec on decode).
    #[allow(clippy::too_many_arguments)]
    pub fn from_fields(
        gen: u8,
        data_type: u8,
        state: u8,
        flags: u8,
        dirty_sectors: u32,
        cached_sectors: u32,
        read_time: u64,
        write_time: u64,
        stripe: u32,
    ) -> Self {
        Self {
            gen,
            data_type,
            state,
            flags,
            dirty_sectors,
            cached_sectors,
            read_time,
            write_time,
            stripe,
            _pad: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_data_allowed_excludes_cached() {
        let mask = DataAllowedMask::default_allowed();
        assert!(mask.allows(DataType::User));
        assert!(mask.allows(DataType::Journal));
        assert!(!mask.allows(DataType::Cached));
    }

    #[test]
    fn bump_generation_wraps() {
        let mut b = BucketRecord::new(DataType::User);
        b.gen = u8::MAX;
        b.bump_generation();
        assert_eq!(b.gen, 0);
    }
}
