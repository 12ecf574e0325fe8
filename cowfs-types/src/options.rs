//! Enumerated configuration options (§9 "Configuration with enumerated
//! options"). Each option is described once in [`OPTION_TABLE`] — name,
//! kind, scope, and (for enums) its string choices — and the typed
//! [`FsOptions`] struct carries the parsed values through every call,
//! matching §9's "global mutable state is an explicit configuration"
//! note.

use bitflags::bitflags;

use crate::bucket::DataAllowedMask;
use crate::checksum::ChecksumType;
use crate::extent::CompressionType;
use crate::target::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    Unsigned,
    String,
    Enum,
    Function,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionScope: u8 {
        const FORMAT = 1 << 0;
        const MOUNT = 1 << 1;
        const RUNTIME = 1 << 2;
        const INODE = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OptionMeta {
    pub name: &'static str,
    pub kind: OptionKind,
    pub scope: OptionScope,
    pub choices: &'static [&'static str],
}

macro_rules! opt {
    ($name:literal, $kind:expr, $scope:expr) => {
        OptionMeta { name: $name, kind: $kind, scope: $scope, choices: &[] }
    };
    ($name:literal, $kind:expr, $scope:expr, $choices:expr) => {
        OptionMeta { name: $name, kind: $kind, scope: $scope, choices: $choices }
    };
}

pub const OPTION_TABLE: &[OptionMeta] = &[
    opt!("block_size", OptionKind::Unsigned, OptionScope::FORMAT),
    opt!("btree_node_size", OptionKind::Unsigned, OptionScope::FORMAT),
    opt!("metadata_replicas", OptionKind::Unsigned, OptionScope::FORMAT.union(OptionScope::MOUNT)),
    opt!("data_replicas", OptionKind::Unsigned, OptionScope::FORMAT.union(OptionScope::MOUNT).union(OptionScope::INODE)),
    opt!("metadata_checksum_type", OptionKind::Enum, OptionScope::FORMAT.union(OptionScope::MOUNT), &["none", "crc32c", "crc64", "xxh3"]),
    opt!("data_checksum_type", OptionKind::Enum, OptionScope::FORMAT.union(OptionScope::MOUNT).union(OptionScope::INODE), &["none", "crc32c", "crc64", "xxh3"]),
    opt!("compression", OptionKind::Enum, OptionScope::MOUNT.union(OptionScope::INODE), &["none", "lz4", "gzip", "zstd"]),
    opt!("encryption", OptionKind::Enum, OptionScope::FORMAT, &["none", "chacha20_poly1305"]),
    opt!("foreground_target", OptionKind::String, OptionScope::MOUNT.union(OptionScope::INODE)),
    opt!("background_target", OptionKind::String, OptionScope::MOUNT.union(OptionScope::INODE)),
    opt!("promote_target", OptionKind::String, OptionScope::MOUNT.union(OptionScope::INODE)),
    opt!("metadata_target", OptionKind::String, OptionScope::MOUNT),
    opt!("error_action", OptionKind::Enum, OptionScope::MOUNT.union(OptionScope::RUNTIME), &["continue", "remount_ro", "panic"]),
    opt!("gc_reserve_percent", OptionKind::Unsigned, OptionScope::FORMAT.union(OptionScope::MOUNT)),
    opt!("discard", OptionKind::Bool, OptionScope::FORMAT.union(OptionScope::MOUNT)),
    opt!("durability", OptionKind::Unsigned, OptionScope::FORMAT.union(OptionScope::MOUNT)),
    opt!("data_allowed", OptionKind::String, OptionScope::FORMAT.union(OptionScope::MOUNT)),
];

pub fn lookup(name: &str) -> Option<&'static OptionMeta> {
    OPTION_TABLE.iter().find(|o| o.name == name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Continue,
    RemountRo,
    Panic,
}

impl Default for ErrorAction {
    fn default() -> Self {
        ErrorAction::RemountRo
    }
}

/// Resolved filesystem-scoped options (§9). Not every option in
/// [`OPTION_TABLE`] has a home here — `block_size`/`btree_node_size` are
/// format-time-only and live on the superblock once written — but every
/// option that can vary at mount/runtime does.
#[derive(Debug, Clone)]
pub struct FsOptions {
    pub metadata_replicas: u8,
    pub data_replicas: u8,
    pub metadata_checksum_type: ChecksumType,
    pub data_checksum_type: ChecksumType,
    pub compression: CompressionType,
    pub encryption: bool,
    pub foreground_target: Target,
    pub background_target: Target,
    pub promote_target: Target,
    pub metadata_target: Target,
    pub error_action: ErrorAction,
    pub gc_reserve_percent: u8,
    pub data_allowed: DataAllowedMask,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            metadata_replicas: 1,
            data_replicas: 1,
            metadata_checksum_type: ChecksumType::Crc32c,
            data_checksum_type: ChecksumType::Crc32c,
            compression: CompressionType::None,
            encryption: false,
            foreground_target: Target::Null,
            background_target: Target::Null,
            promote_target: Target::Null,
            metadata_target: Target::Null,
            error_action: ErrorAction::RemountRo,
            gc_reserve_percent: 8,
            data_allowed: DataAllowedMask::default_allowed(),
        }
    }
}

/// Per-device format-time options (§3.1 member table fields `discard`,
/// `durability`).
#[derive(Debug, Clone, Copy)]
pub struct DeviceOptions {
    pub discard: bool,
    pub durability: u8,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            discard: false,
            durability: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let opts = FsOptions::default();
        assert_eq!(opts.metadata_replicas, 1);
        assert_eq!(opts.data_replicas, 1);
        assert_eq!(opts.gc_reserve_percent, 8);
        assert!(!opts.data_allowed.allows(crate::bucket::DataType::Cached));
    }

    #[test]
    fn table_lookup() {
        let meta = lookup("compression").unwrap();
        assert_eq!(meta.kind, OptionKind::Enum);
        assert!(meta.choices.contains(&"zstd"));
        assert!(lookup("not_an_option").is_none());
    }
}
