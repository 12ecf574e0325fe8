//! The fixed wrapper transaction restarts are transparent behind (§4.3
//! step 6 / §4.3 closing paragraph: "restart is transparent to callers
//! above a fixed wrapper; callers not holding external resources must
//! be prepared to re-execute the entire transaction body").

use cowfs_btree::BtreeEngine;
use cowfs_journal::Journal;
use cowfs_types::{DeviceSet, Error, Result};

/// Upper bound on restart attempts before giving up and surfacing the
/// last restart reason. §4.3 doesn't name a specific bound; this
/// matches the small fixed retry counts used for optimistic-concurrency
/// loops across the pack's storage-engine examples.
pub const MAX_ATTEMPTS: u32 = 8;

/// Runs `body` against a fresh [`crate::Transaction`] each attempt,
/// committing on success and re-invoking `body` from scratch on any
/// [`Error::TransactionRestart`]. `body` stages updates (and registers
/// precommit hooks) via the `&mut Transaction` it's given and returns
/// whatever value the caller wants back; that value is discarded and
/// recomputed on restart exactly like the staged updates are.
pub fn run_txn<F, T>(engine: &BtreeEngine, journal: &Journal, devices: &DeviceSet, body: F) -> Result<T>
where
    F: FnMut(&mut crate::Transaction) -> Result<T>,
{
    run_txn_seq(engine, journal, devices, body).map(|(value, _seq)| value)
}

/// Same retry contract as [`run_txn`], but also hands back the journal
/// sequence the winning attempt committed at — callers that need to
/// stamp a durability watermark (e.g. the allocator's invalidate path)
/// would otherwise have no way to learn it, since `body`'s return value
/// is built before the commit happens.
pub fn run_txn_seq<F, T>(engine: &BtreeEngine, journal: &Journal, devices: &DeviceSet, mut body: F) -> Result<(T, u64)>
where
    F: FnMut(&mut crate::Transaction) -> Result<T>,
{
    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        let mut txn = crate::Transaction::begin(engine, journal, devices);
        let outcome = body(&mut txn).and_then(|value| txn.commit().map(|seq| (value, seq)));
        match outcome {
            Ok(result) => return Ok(result),
            Err(e) if e.is_restart() => {
                log::debug!("transaction restart on attempt {attempt}: {e}");
                last_err = Some(e);
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_io::MemBlockDevice;
    use cowfs_journal::JournalRegion;
    use cowfs_types::{ChecksumType, InodeValue, Key, KeyValue, Position};
    use std::sync::Arc;

    fn rig() -> (BtreeEngine, Journal, DeviceSet) {
        let engine = BtreeEngine::new(16);
        let journal = Journal::new(vec![JournalRegion { device: 0, start_sector: 0, nr_sectors: 400 }], ChecksumType::Crc32c);
        let mut devices = DeviceSet::new();
        devices.insert(0, Arc::new(MemBlockDevice::new(1024)));
        (engine, journal, devices)
    }

    #[test]
    fn committed_body_runs_exactly_once() {
        let (engine, journal, devices) = rig();
        let mut runs = 0;
        run_txn(&engine, &journal, &devices, |txn| {
            runs += 1;
            txn.update(
                cowfs_types::BtreeId::Inodes,
                Key { position: Position::new(1, 1, 0), size: 0, value: KeyValue::Inode(InodeValue::default()) },
            );
            Ok(())
        })
        .unwrap();
        assert_eq!(runs, 1);
        assert!(engine.tree(cowfs_types::BtreeId::Inodes).lookup(Position::new(1, 1, 0)).is_some());
    }

    #[test]
    fn non_restart_error_propagates_without_retry() {
        let (engine, journal, devices) = rig();
        let mut runs = 0;
        let result: Result<()> = run_txn(&engine, &journal, &devices, |_txn| {
            runs += 1;
            Err(Error::NotFound)
        });
        assert!(matches!(result, Err(Error::NotFound)));
        assert_eq!(runs, 1);
    }
}
