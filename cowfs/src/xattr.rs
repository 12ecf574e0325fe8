//! §6.5: the `bcachefs.`-prefixed xattr option overrides and the
//! recursive `reinherit` walk that reapplies a directory's overrides to
//! everything under it. Overrides are stored as ordinary `xattrs`-tree
//! entries (§3.1) under the verbatim `bcachefs.<option>` name, so a
//! generic `getxattr`/`setxattr`/`listxattr` implementation (not built
//! here — file-handle syscalls are out of scope, per SPEC_FULL.md's
//! Non-goals) would see the same names a real mount exposes.

use cowfs_types::{BtreeId, CompressionType, Key, KeyValue, Position, Result, Target, XattrValue};

use crate::filesystem::Filesystem;

/// The `bcachefs.` prefix every inode option override's xattr name
/// carries verbatim (§6.5).
pub const XATTR_PREFIX: &str = "bcachefs.";

/// Per-inode overrides of the options `OPTION_TABLE` marks `INODE`
/// scope (`data_replicas`, `data_checksum_type`, `compression`,
/// `foreground_target`, `background_target`, `promote_target`). `None`
/// means "inherit the filesystem default" — matching every other
/// bool/enum option's fall-through-to-parent behavior in §6.5.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InodeOptions {
    pub data_replicas: Option<u8>,
    pub compression: Option<CompressionType>,
    pub foreground_target: Option<Target>,
    pub background_target: Option<Target>,
    pub promote_target: Option<Target>,
}

impl InodeOptions {
    fn is_empty(&self) -> bool {
        *self == InodeOptions::default()
    }

    /// Renders non-`None` fields as `(name, value)` pairs under the
    /// `bcachefs.` prefix, the encoding `read_from`/`apply_to` round-trip.
    fn entries(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Some(v) = self.data_replicas {
            out.push((format!("{XATTR_PREFIX}data_replicas"), v.to_string()));
        }
        if let Some(v) = self.compression {
            out.push((format!("{XATTR_PREFIX}compression"), compression_name(v).to_string()));
        }
        if let Some(v) = self.foreground_target {
            out.push((format!("{XATTR_PREFIX}foreground_target"), target_string(v)));
        }
        if let Some(v) = self.background_target {
            out.push((format!("{XATTR_PREFIX}background_target"), target_string(v)));
        }
        if let Some(v) = self.promote_target {
            out.push((format!("{XATTR_PREFIX}promote_target"), target_string(v)));
        }
        out
    }
}

fn compression_name(c: CompressionType) -> &'static str {
    match c {
        CompressionType::None => "none",
        CompressionType::Lz4 => "lz4",
        CompressionType::Gzip => "gzip",
        CompressionType::Zstd => "zstd",
    }
}

fn parse_compression(s: &str) -> Option<CompressionType> {
    Some(match s {
        "none" => CompressionType::None,
        "lz4" => CompressionType::Lz4,
        "gzip" => CompressionType::Gzip,
        "zstd" => CompressionType::Zstd,
        _ => return None,
    })
}

fn target_string(t: Target) -> String {
    match t {
        Target::Null => "null".to_string(),
        Target::Dev(idx) => format!("dev:{idx}"),
        Target::Group(idx) => format!("group:{idx}"),
    }
}

fn parse_target(s: &str) -> Option<Target> {
    if s == "null" {
        return Some(Target::Null);
    }
    let (kind, rest) = s.split_once(':')?;
    let idx: u32 = rest.parse().ok()?;
    match kind {
        "dev" => Some(Target::Dev(idx)),
        "group" => Some(Target::Group(idx)),
        _ => None,
    }
}

/// Reads `inode`'s xattr entries off the `xattrs` tree and decodes
/// whichever ones carry the `bcachefs.` prefix into [`InodeOptions`],
/// ignoring unrecognized option names or unparsable values rather than
/// failing the whole read — the same tolerant-of-one-bad-entry stance
/// `cowfs-journal::replay` takes toward individual corrupt entries.
fn read_inode_options(fs: &Filesystem, inode: u64) -> InodeOptions {
    let tree = fs.engine().tree(BtreeId::Xattrs);
    let mut opts = InodeOptions::default();
    let start = Position::new(inode, 0, 0);
    for key in tree.iter_init(start) {
        if key.position.inode != inode {
            break;
        }
        let KeyValue::Xattr(XattrValue { name, value }) = &key.value else { continue };
        let Some(option) = name.strip_prefix(XATTR_PREFIX) else { continue };
        let Ok(text) = std::str::from_utf8(value) else { continue };
        match option {
            "data_replicas" => opts.data_replicas = text.parse().ok(),
            "compression" => opts.compression = parse_compression(text),
            "foreground_target" => opts.foreground_target = parse_target(text),
            "background_target" => opts.background_target = parse_target(text),
            "promote_target" => opts.promote_target = parse_target(text),
            _ => {}
        }
    }
    opts
}

/// Writes `opts`'s non-`None` fields as xattr entries on `inode`,
/// keyed by a simple name hash so repeated calls overwrite rather than
/// accumulate duplicate entries for the same option name.
fn apply_inode_options(fs: &Filesystem, inode: u64, opts: &InodeOptions) -> Result<()> {
    let tree = fs.engine().tree(BtreeId::Xattrs);
    for (name, value) in opts.entries() {
        let offset = xattr_name_hash(&name);
        tree.update(Key {
            position: Position::new(inode, offset, 0),
            size: 0,
            value: KeyValue::Xattr(XattrValue { name, value: value.into_bytes() }),
        })?;
    }
    Ok(())
}

/// A stable, deterministic slot for a given xattr name within one
/// inode's key range — the same fnv-1a-style mixing
/// `cowfs-alloc::bucket_addr` uses to spread bucket addresses, reused
/// here so two different option names don't collide.
fn xattr_name_hash(name: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    hash
}

/// §6.2 `ReinheritAttrs`: recursively reapplies `dir_inode`'s
/// [`InodeOptions`] to every descendant, the walk bcachefs runs after
/// `setattr` changes a directory's inherited options so existing
/// children pick up the new values instead of only newly created ones.
/// Returns the count of inodes visited (directory included).
pub fn reinherit(fs: &Filesystem, dir_inode: u64) -> Result<u64> {
    let opts = read_inode_options(fs, dir_inode);
    reinherit_walk(fs, dir_inode, &opts)
}

fn reinherit_walk(fs: &Filesystem, dir_inode: u64, opts: &InodeOptions) -> Result<u64> {
    let mut visited = 1u64;
    if !opts.is_empty() {
        apply_inode_options(fs, dir_inode, opts)?;
    }

    let dirents = fs.engine().tree(BtreeId::Dirents);
    let start = Position::new(dir_inode, 0, 0);
    let children: Vec<(u64, bool)> = dirents
        .iter_init(start)
        .take_while(|key| key.position.inode == dir_inode)
        .filter_map(|key| match key.value {
            KeyValue::Dirent(d) => Some((d.target_inode, d.is_dir)),
            _ => None,
        })
        .collect();

    for (child_inode, is_dir) in children {
        if is_dir {
            visited += reinherit_walk(fs, child_inode, opts)?;
        } else {
            apply_inode_options(fs, child_inode, opts)?;
            visited += 1;
        }
    }
    Ok(visited)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cowfs_io::{BlockDevice, MemBlockDevice};
    use cowfs_types::{DirentValue, FsOptions};

    use super::*;

    fn fs() -> Filesystem {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemBlockDevice::new(4096));
        Filesystem::format(vec![(dev, "test0".into())], FsOptions::default(), None).unwrap()
    }

    #[test]
    fn reinherit_propagates_overrides_to_children() {
        let fs = fs();
        let dir_inode = 100u64;
        let child_inode = 101u64;

        let opts = InodeOptions { compression: Some(CompressionType::Zstd), data_replicas: Some(2), ..Default::default() };
        apply_inode_options(&fs, dir_inode, &opts).unwrap();

        fs.engine()
            .tree(BtreeId::Dirents)
            .update(Key {
                position: Position::new(dir_inode, 0, 0),
                size: 0,
                value: KeyValue::Dirent(DirentValue { target_inode: child_inode, name: "leaf".to_string(), is_dir: false }),
            })
            .unwrap();

        let visited = reinherit(&fs, dir_inode).unwrap();
        assert_eq!(visited, 2);

        let child_opts = read_inode_options(&fs, child_inode);
        assert_eq!(child_opts.compression, Some(CompressionType::Zstd));
        assert_eq!(child_opts.data_replicas, Some(2));
    }

    #[test]
    fn empty_overrides_are_not_written() {
        let fs = fs();
        let visited = reinherit(&fs, 42).unwrap();
        assert_eq!(visited, 1);
        assert!(read_inode_options(&fs, 42).is_empty());
    }
}
