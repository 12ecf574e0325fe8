//! §8.2 scenario 2: write 1 MiB of a fixed byte value, read it back, and
//! confirm the inode's recorded size matches.

use std::sync::Arc;

use cowfs::Filesystem;
use cowfs_io::{BlockDevice, MemBlockDevice};
use cowfs_types::{BtreeId, FsOptions, KeyValue, Position};

#[test]
fn one_mebibyte_round_trips_and_updates_inode_size() {
    let dev: Arc<dyn BlockDevice> = Arc::new(MemBlockDevice::new(1 << 16));
    let fs = Filesystem::format(vec![(dev, "test0".into())], FsOptions::default(), None).unwrap();

    const LEN: usize = 1 << 20;
    let data = vec![0xA5u8; LEN];
    let inode = 1u64;
    fs.write(inode, 0, &data).unwrap();

    let back = fs.read(inode, 0, LEN as u64).unwrap();
    assert_eq!(back, data);

    let key = fs.engine().tree(BtreeId::Inodes).lookup(Position::new(inode, 0, 0)).unwrap();
    let KeyValue::Inode(inode_value) = key.value else { panic!("wrong key type") };
    assert_eq!(inode_value.size, LEN as u64);
}
