//! §6.3's bulk operations (`format`, `fsck`, `migrate`) layered on top
//! of [`Filesystem`] and [`crate::control_plane::ControlPlane`] — the
//! driver logic the CLI's subcommands call into, kept separate from
//! `cowfs-cli` itself so it's testable without a process boundary, the
//! same split the teacher keeps between its library crate and its
//! `bin/` entry points.

use std::sync::Arc;

use cowfs_io::BlockDevice;
use cowfs_types::{BtreeId, Error, FsOptions, KeyValue, Position, Result};

use crate::filesystem::Filesystem;

/// §6.3 `format`: a thin wrapper over [`Filesystem::format`] so the CLI
/// and integration tests share one call path instead of the CLI talking
/// to `Filesystem` directly.
pub fn run_format(devices: Vec<(Arc<dyn BlockDevice>, String)>, options: FsOptions, encryption_key: Option<[u8; cowfs_extent::EXTENT_KEY_LEN]>) -> Result<Filesystem> {
    Filesystem::format(devices, options, encryption_key)
}

/// One fsck finding: an invariant violation plus enough context to
/// report it the way §7's propagation policy requires (`btree_id`,
/// `Position`).
#[derive(Debug, Clone)]
pub struct FsckError {
    pub btree_id: BtreeId,
    pub position: Position,
    pub detail: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct FsckReport {
    pub keys_checked: u64,
    pub errors: Vec<FsckError>,
}

impl FsckReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// §6.3 `fsck`: walks `alloc` and cross-checks invariant 3/§8.1
/// invariant 4 ("freespace consistency") — every `free` bucket has
/// exactly one matching `freespace` key and vice versa, every
/// `need_discard` bucket has exactly one matching `need_discard` key.
/// This is a read-only check; repair policy ({auto-yes, auto-no, ask}
/// from §7) is a CLI-level concern layered on top of the report, not
/// performed here.
pub fn run_fsck(fs: &Filesystem) -> Result<FsckReport> {
    let mut report = FsckReport::default();
    let alloc = fs.engine().tree(BtreeId::Alloc);
    let freespace = fs.engine().tree(BtreeId::Freespace);
    let need_discard = fs.engine().tree(BtreeId::NeedDiscard);

    for key in alloc.iter_init(Position::POS_MIN) {
        report.keys_checked += 1;
        let KeyValue::AllocBucket(record) = &key.value else {
            report.errors.push(FsckError { btree_id: BtreeId::Alloc, position: key.position, detail: "alloc tree holds a non-AllocBucket key" });
            continue;
        };
        match record.state() {
            cowfs_types::BucketState::Free => {
                let has_freespace = freespace.iter_init(key.position).take_while(|k| k.position.inode == key.position.inode).any(|k| matches!(&k.value, KeyValue::FreeSpace(v) if v.bucket_offset == key.position.offset));
                if !has_freespace {
                    report.errors.push(FsckError { btree_id: BtreeId::Alloc, position: key.position, detail: "free bucket has no matching freespace key" });
                }
            }
            cowfs_types::BucketState::NeedDiscard => {
                if need_discard.lookup(key.position).is_none() {
                    report.errors.push(FsckError { btree_id: BtreeId::Alloc, position: key.position, detail: "need_discard bucket has no matching need_discard key" });
                }
            }
            _ => {}
        }
    }

    for key in freespace.iter_init(Position::POS_MIN) {
        report.keys_checked += 1;
        let KeyValue::FreeSpace(value) = &key.value else { continue };
        let addr = cowfs_alloc::BucketAddr::new(value.device, value.bucket_offset);
        match alloc.lookup(addr.alloc_position()) {
            Some(k) => {
                let KeyValue::AllocBucket(record) = &k.value else {
                    report.errors.push(FsckError { btree_id: BtreeId::Freespace, position: key.position, detail: "freespace key's alloc entry has wrong key type" });
                    continue;
                };
                if !matches!(record.state(), cowfs_types::BucketState::Free) {
                    report.errors.push(FsckError { btree_id: BtreeId::Freespace, position: key.position, detail: "freespace key references a non-free bucket" });
                }
            }
            None => report.errors.push(FsckError { btree_id: BtreeId::Freespace, position: key.position, detail: "freespace key with no matching alloc record" }),
        }
    }

    Ok(report)
}

/// §6.3 `migrate`: relocates an existing device's data onto a
/// replacement device by target, the `Data(Migrate, ..)` control-plane
/// operation driven over the whole key space. Not yet implemented —
/// see [`crate::control_plane::ControlPlane::data`]'s doc comment for
/// why (no extent mover is wired into `cowfs-alloc` yet).
pub fn run_migrate(_fs: &Filesystem, _from_idx: u16, _to_idx: u16) -> Result<()> {
    Err(Error::NotImplemented("migrate"))
}

#[cfg(test)]
mod tests {
    use cowfs_io::MemBlockDevice;
    use cowfs_types::FsOptions as Opts;

    use super::*;

    #[test]
    fn fresh_format_passes_fsck() {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemBlockDevice::new(4096));
        let fs = run_format(vec![(dev, "test0".into())], Opts::default(), None).unwrap();
        let report = run_fsck(&fs).unwrap();
        assert!(report.is_clean(), "unexpected fsck errors: {:?}", report.errors);
        assert!(report.keys_checked > 0);
    }

    #[test]
    fn migrate_is_not_yet_implemented() {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemBlockDevice::new(4096));
        let fs = run_format(vec![(dev, "test0".into())], Opts::default(), None).unwrap();
        assert!(matches!(run_migrate(&fs, 0, 0), Err(Error::NotImplemented(_))));
    }
}
