//! The transaction layer (§4.3): groups multiple B-tree updates into
//! one atomic, crash-safe step with optimistic concurrency, on top of
//! the B-tree engine and journal crates built below it per the
//! dependency order in §2.

pub mod arena;
pub mod retry;
pub mod txn;
pub mod update;

pub use arena::Arena;
pub use retry::{run_txn, run_txn_seq, MAX_ATTEMPTS};
pub use txn::Transaction;
pub use update::StagedUpdate;

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_btree::BtreeEngine;
    use cowfs_io::MemBlockDevice;
    use cowfs_journal::{Journal, JournalRegion};
    use cowfs_types::{BtreeId, ChecksumType, DeviceSet, InodeValue, Key, KeyValue, Position};
    use std::sync::Arc;

    fn rig() -> (BtreeEngine, Journal, DeviceSet) {
        let engine = BtreeEngine::new(16);
        let journal = Journal::new(vec![JournalRegion { device: 0, start_sector: 0, nr_sectors: 400 }], ChecksumType::Crc32c);
        let mut devices = DeviceSet::new();
        devices.insert(0, Arc::new(MemBlockDevice::new(1024)));
        (engine, journal, devices)
    }

    fn key(offset: u64) -> Key {
        Key { position: Position::new(1, offset, 0), size: 0, value: KeyValue::Inode(InodeValue::default()) }
    }

    #[test]
    fn commit_is_visible_to_later_lookups() {
        let (engine, journal, devices) = rig();
        let mut txn = Transaction::begin(&engine, &journal, &devices);
        txn.update(BtreeId::Inodes, key(1));
        let seq = txn.commit().unwrap();
        assert!(seq > 0);
        assert!(engine.tree(BtreeId::Inodes).lookup(Position::new(1, 1, 0)).is_some());
    }

    #[test]
    fn stale_snapshot_forces_optimistic_conflict_restart() {
        let (engine, journal, devices) = rig();
        let mut txn = Transaction::begin(&engine, &journal, &devices);
        txn.update(BtreeId::Inodes, key(1));

        // A concurrent writer commits the same position first.
        engine.tree(BtreeId::Inodes).update(key(1)).unwrap();

        let err = txn.commit().unwrap_err();
        assert!(matches!(
            err,
            cowfs_types::Error::TransactionRestart(cowfs_types::RestartReason::OptimisticReadConflict)
        ));
    }

    #[test]
    fn out_of_order_updates_restart_on_lock_ordering() {
        let (engine, journal, devices) = rig();
        let mut txn = Transaction::begin(&engine, &journal, &devices);
        txn.update(BtreeId::Inodes, key(10));
        txn.update(BtreeId::Inodes, key(1));
        let err = txn.commit().unwrap_err();
        assert!(matches!(
            err,
            cowfs_types::Error::TransactionRestart(cowfs_types::RestartReason::LockOrdering)
        ));
    }

    #[test]
    fn precommit_hook_can_stage_further_updates() {
        let (engine, journal, devices) = rig();
        let mut txn = Transaction::begin(&engine, &journal, &devices);
        txn.update(BtreeId::Inodes, key(1));
        txn.add_precommit_hook(|updates| {
            updates.push(StagedUpdate { btree_id: BtreeId::Inodes, old_snapshot: None, new_key: key(2) });
            Ok(())
        });
        txn.commit().unwrap();
        assert!(engine.tree(BtreeId::Inodes).lookup(Position::new(1, 2, 0)).is_some());
    }
}
