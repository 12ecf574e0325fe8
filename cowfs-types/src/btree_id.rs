/// Enumerates the distinct ordered key/value stores named in §3.1. Each
/// identifier names one COW B-tree; per §2's dependency order the
/// `alloc`/`freespace`/`need_discard`/`lru` quartet is only ever mutated
/// from inside the allocator, and `extents`/`inodes`/`dirents` from the
/// extent I/O path and directory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum BtreeId {
    Extents = 0,
    Inodes = 1,
    Dirents = 2,
    Xattrs = 3,
    Alloc = 4,
    Freespace = 5,
    NeedDiscard = 6,
    Lru = 7,
    Reflink = 8,
    Subvolumes = 9,
    Snapshots = 10,
}

impl BtreeId {
    pub const ALL: [BtreeId; 11] = [
        BtreeId::Extents,
        BtreeId::Inodes,
        BtreeId::Dirents,
        BtreeId::Xattrs,
        BtreeId::Alloc,
        BtreeId::Freespace,
        BtreeId::NeedDiscard,
        BtreeId::Lru,
        BtreeId::Reflink,
        BtreeId::Subvolumes,
        BtreeId::Snapshots,
    ];

    pub const fn max_id() -> u8 {
        BtreeId::Snapshots as u8
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => BtreeId::Extents,
            1 => BtreeId::Inodes,
            2 => BtreeId::Dirents,
            3 => BtreeId::Xattrs,
            4 => BtreeId::Alloc,
            5 => BtreeId::Freespace,
            6 => BtreeId::NeedDiscard,
            7 => BtreeId::Lru,
            8 => BtreeId::Reflink,
            9 => BtreeId::Subvolumes,
            10 => BtreeId::Snapshots,
            _ => return None,
        })
    }

    /// Adjacent keys within this tree may be merged on write (invariant 1
    /// in §3.2 carves out the extents tree specifically).
    pub const fn allows_key_merge(self) -> bool {
        matches!(self, BtreeId::Extents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u8() {
        for id in BtreeId::ALL {
            assert_eq!(BtreeId::from_u8(id.as_u8()), Some(id));
        }
        assert_eq!(BtreeId::from_u8(BtreeId::max_id() + 1), None);
    }
}
