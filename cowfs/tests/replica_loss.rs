//! §8.2 scenario 3 (partial): format two devices with `data_replicas=2`,
//! write data, corrupt one replica's on-disk bytes directly, and
//! confirm the read still succeeds and returns the original content —
//! §4.6 "Read"'s per-replica retry. Degrading a whole *device* (rather
//! than one replica's bytes) and driving `data rereplicate` afterward
//! isn't exercised here: `ControlPlane::data`'s `Rereplicate` op has no
//! mover behind it yet (see DESIGN.md's "copygc/migrate/scrub have no
//! mover" entry), so only the read-side half of this scenario is
//! currently testable end to end.

use std::sync::Arc;

use cowfs::Filesystem;
use cowfs_io::{BlockDevice, MemBlockDevice};
use cowfs_types::{BtreeId, FsOptions, KeyValue, Position};

#[test]
fn read_survives_one_corrupted_replica() {
    let devices = vec![
        (Arc::new(MemBlockDevice::new(4096)) as Arc<dyn BlockDevice>, "test0".to_string()),
        (Arc::new(MemBlockDevice::new(4096)) as Arc<dyn BlockDevice>, "test1".to_string()),
    ];
    let mut options = FsOptions::default();
    options.data_replicas = 2;

    let fs = Filesystem::format(devices, options, None).unwrap();
    let inode = 5u64;
    let payload = b"redundant filesystem bytes";
    fs.write(inode, 0, payload).unwrap();

    let key = fs.engine().tree(BtreeId::Extents).lookup(Position::new(inode, 0, 0)).unwrap();
    let KeyValue::Extent(value) = &key.value else { panic!("wrong key type") };
    assert!(value.pointers.len() >= 2, "expected at least 2 replicas, got {}", value.pointers.len());

    let bad_pointer = &value.pointers[0];
    let dev = fs.devices().get(bad_pointer.device).unwrap();
    dev.write_at(bad_pointer.offset, &[0xFFu8; 512]).unwrap();

    let back = fs.read(inode, 0, payload.len() as u64).unwrap();
    assert_eq!(back, payload);
}
