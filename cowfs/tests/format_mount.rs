//! §8.2 scenario 1: format a device, mount it back, and confirm usage
//! reporting sees the same capacity with nothing user-written yet.

use std::sync::Arc;

use cowfs::Filesystem;
use cowfs_io::{BlockDevice, MemBlockDevice};
use cowfs_types::FsOptions;

#[test]
fn format_then_mount_reports_stable_capacity_with_no_user_usage() {
    let dev: Arc<dyn BlockDevice> = Arc::new(MemBlockDevice::new(8192));

    let formatted_usage = {
        let fs = Filesystem::format(vec![(dev.clone(), "test0".into())], FsOptions::default(), None).unwrap();
        fs.fs_usage().unwrap()
    };

    let fs = Filesystem::mount(vec![(dev, "test0".into())], FsOptions::default(), None).unwrap();
    let mounted_usage = fs.fs_usage().unwrap();

    assert_eq!(formatted_usage.total_buckets, mounted_usage.total_buckets);
    assert_eq!(formatted_usage.used_buckets, mounted_usage.used_buckets);
    // Only the head/tail metadata reservation is used; no user data has
    // been written.
    assert!(mounted_usage.used_buckets < mounted_usage.total_buckets);
}
