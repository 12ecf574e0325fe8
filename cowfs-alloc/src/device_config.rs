//! Per-device allocator configuration. In the full stack this comes
//! from the superblock's member table; `cowfs-alloc` doesn't depend on
//! `cowfs-super` (§2's dependency order has the allocator depend only
//! on the transaction layer), so the caller assembling a [`crate::Allocator`]
//! passes this in directly, read out of the superblock by whichever
//! layer owns both (`cowfs`, the facade crate).

use cowfs_types::{DataAllowedMask, DataType, Target};

#[derive(Debug, Clone, Copy)]
pub struct DeviceConfig {
    pub target: Target,
    pub data_allowed: DataAllowedMask,
    pub discard: bool,
    pub bucket_size_sectors: u64,
    pub nr_buckets: u64,
}

impl DeviceConfig {
    /// Whether this device is eligible for an allocation aimed at
    /// `wanted` (§4.5 "select candidate devices matching target and
    /// allowed data").
    pub fn matches(&self, device: u16, wanted: Target, data_type: DataType) -> bool {
        self.data_allowed.allows(data_type)
            && match wanted {
                Target::Null => true,
                Target::Dev(idx) => idx == device as u32,
                // Disk-group membership lives on the superblock's
                // disk-group tree, which this crate has no access to;
                // callers that need group targeting resolve the group
                // to its member `Target::Dev`s before calling `allocate`.
                Target::Group(_) => false,
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DeviceConfig {
        DeviceConfig {
            target: Target::Null,
            data_allowed: DataAllowedMask::default_allowed(),
            discard: false,
            bucket_size_sectors: 256,
            nr_buckets: 1024,
        }
    }

    #[test]
    fn null_target_matches_any_device() {
        assert!(config().matches(7, Target::Null, DataType::User));
    }

    #[test]
    fn dev_target_matches_only_that_device() {
        assert!(config().matches(2, Target::Dev(2), DataType::User));
        assert!(!config().matches(3, Target::Dev(2), DataType::User));
    }

    #[test]
    fn disallowed_data_type_never_matches() {
        assert!(!config().matches(0, Target::Null, DataType::Cached));
    }
}
