//! The journal ring (§4.4): an append-only sequence of entries spread
//! across one or more journal-bucket regions per device, replicated to
//! the metadata replica count, with backpressure when free space runs
//! low and a merge-by-sequence replay on mount.

use cowfs_io::SECTOR_SIZE;
use cowfs_types::{ChecksumType, DeviceSet, Error, Result};
use parking_lot::Mutex;

use crate::blacklist::Blacklist;
use crate::entry::{JournalEntry, UpdateRecord};

/// One device's journal region: a contiguous sector range treated as a
/// ring buffer. §4.4 allows "one or more journal-buckets"; this models
/// the common case of one contiguous region per device, which is what
/// every example in the pack that journals (`fxfs`, `reedbase`'s WAL)
/// does too.
#[derive(Debug, Clone, Copy)]
pub struct JournalRegion {
    pub device: u16,
    pub start_sector: u64,
    pub nr_sectors: u64,
}

struct RingState {
    /// Sector offset (relative to each region, mod its length) the next
    /// entry will be written at.
    write_cursor: u64,
    /// Sectors consumed by entries not yet reclaimed, oldest-first —
    /// used to compute free space and to know how much to give back
    /// when [`Journal::reclaim`] retires a run of sequences.
    outstanding: std::collections::VecDeque<(u64, u64)>,
    used_sectors: u64,
    next_seq: u64,
    blacklist: Blacklist,
}

/// §4.4/§5: "Journal: one mutex for reservation; lock-free append
/// within a reserved region." This implementation folds reservation and
/// append under the one mutex — real lock-free append within the
/// reserved byte range is a further optimization the spec permits but
/// doesn't require.
pub struct Journal {
    regions: Vec<JournalRegion>,
    checksum_type: ChecksumType,
    /// Threshold (in sectors) below which new reservations block per
    /// §4.4's backpressure rule.
    low_space_sectors: u64,
    state: Mutex<RingState>,
}

impl Journal {
    pub fn new(regions: Vec<JournalRegion>, checksum_type: ChecksumType) -> Self {
        let total_sectors: u64 = regions.iter().map(|r| r.nr_sectors).sum();
        Self {
            regions,
            checksum_type,
            low_space_sectors: (total_sectors / 8).max(8),
            state: Mutex::new(RingState {
                write_cursor: 0,
                outstanding: std::collections::VecDeque::new(),
                used_sectors: 0,
                next_seq: 1,
                blacklist: Blacklist::new(),
            }),
        }
    }

    fn total_sectors(&self) -> u64 {
        self.regions.iter().map(|r| r.nr_sectors).sum()
    }

    /// §4.4 backpressure: refuses a reservation once free space (total
    /// ring capacity minus sectors held by entries not yet reclaimed)
    /// drops under the threshold, surfacing as the same restart reason a
    /// transaction sees when it can't get journal space.
    fn free_sectors(&self, state: &RingState) -> u64 {
        self.total_sectors().saturating_sub(state.used_sectors)
    }

    /// §4.3 step (a): reserve space for an entry of `sectors` length
    /// before building it. Blocking on low space is the caller's
    /// responsibility (the transaction layer retries with
    /// `RestartReason::JournalFull`); this call is non-blocking and
    /// reports insufficiency immediately.
    pub fn try_reserve(&self, sectors: u64) -> Result<()> {
        let state = self.state.lock();
        if self.free_sectors(&state) < sectors + self.low_space_sectors {
            return Err(Error::TransactionRestart(cowfs_types::RestartReason::JournalFull));
        }
        Ok(())
    }

    /// Appends an entry built from `records`, replicating the encoded
    /// image to every region in `devices`' reachable set, and returns
    /// the assigned sequence number.
    pub fn append(&self, devices: &DeviceSet, records: Vec<UpdateRecord>, flush: bool) -> Result<u64> {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        let last_seq = state.outstanding.front().map(|&(s, _)| s).unwrap_or(seq).saturating_sub(1);
        state.next_seq += 1;

        let mut entry = JournalEntry::new(seq, last_seq, records);
        if flush {
            entry = entry.flush();
        }
        let encoded = entry.encode(self.checksum_type);
        let sectors_needed = (encoded.len() as u64).div_ceil(SECTOR_SIZE as u64);

        if self.free_sectors(&state) < sectors_needed {
            return Err(Error::TransactionRestart(cowfs_types::RestartReason::JournalFull));
        }

        let mut padded = encoded;
        padded.resize(sectors_needed as usize * SECTOR_SIZE, 0);

        for region in &self.regions {
            let dev = devices.get(region.device)?;
            let offset = region.start_sector + (state.write_cursor % region.nr_sectors);
            dev.write_at(offset, &padded)?;
            dev.flush()?;
        }

        state.write_cursor += sectors_needed;
        state.used_sectors += sectors_needed;
        state.outstanding.push_back((seq, sectors_needed));
        Ok(seq)
    }

    /// Marks `seq` as quarantined (a write that's known to have failed
    /// partway and must not be replayed).
    pub fn blacklist(&self, seq: u64) {
        self.state.lock().blacklist.add(seq);
    }

    /// Advances the tail past every sequence up to and including
    /// `upto_seq`, the transaction layer's signal that the B-tree nodes
    /// those entries touched are now durable on their own and the
    /// journal space they occupied can be reclaimed.
    pub fn reclaim(&self, upto_seq: u64) {
        let mut state = self.state.lock();
        while let Some(&(seq, sectors)) = state.outstanding.front() {
            if seq > upto_seq {
                break;
            }
            state.used_sectors = state.used_sectors.saturating_sub(sectors);
            state.outstanding.pop_front();
        }
    }

    /// §4.4 replay: scans every region, decodes every entry found,
    /// merges them by sequence across devices/regions, drops
    /// blacklisted sequences, and returns the surviving entries in
    /// ascending sequence order ready to be replayed into the B-tree via
    /// ordinary transactions.
    ///
    /// Each candidate entry's true on-disk size is learned from its
    /// leading sector before the body is read (`append` can spread an
    /// entry across several sectors, §4.4) — reading a fixed one-sector
    /// window here would truncate any such entry and `decode` would
    /// report it `Truncated`, which looks identical to "no entry at this
    /// sector" and silently drops a committed transaction on mount.
    pub fn replay(&self, devices: &DeviceSet) -> Result<Vec<JournalEntry>> {
        let state = self.state.lock();
        let mut all = Vec::new();
        for region in &self.regions {
            let dev = devices.get(region.device)?;
            let mut offset = 0u64;
            while offset < region.nr_sectors {
                let mut header = [0u8; SECTOR_SIZE];
                if dev.read_at(region.start_sector + offset, &mut header).is_err() {
                    break;
                }
                let Ok(total_len) = JournalEntry::peek_encoded_len(&header) else {
                    offset += 1;
                    continue;
                };
                let sectors_needed = (total_len as u64).div_ceil(SECTOR_SIZE as u64).max(1);
                let sectors_available = region.nr_sectors - offset;
                let sectors_to_read = sectors_needed.min(sectors_available);

                let mut body = vec![0u8; (sectors_to_read * SECTOR_SIZE as u64) as usize];
                if dev.read_at(region.start_sector + offset, &mut body).is_err() {
                    break;
                }
                match JournalEntry::decode(&body) {
                    Ok(entry) => {
                        offset += sectors_needed;
                        all.push(entry);
                    }
                    Err(_) => {
                        // Either genuinely not an entry (blank/stale ring
                        // space, which fails the checksum check) or its
                        // declared length overran the region — either
                        // way this sector isn't a usable entry start.
                        offset += 1;
                        continue;
                    }
                }
            }
        }
        all.retain(|e| !state.blacklist.contains(e.seq));
        let mut by_seq = std::collections::BTreeMap::new();
        for entry in all {
            by_seq.insert(entry.seq, entry);
        }
        Ok(by_seq.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_io::MemBlockDevice;
    use cowfs_types::{BtreeId, InodeValue, Key, KeyValue, Position};
    use std::sync::Arc;

    fn devices() -> DeviceSet {
        let mut set = DeviceSet::new();
        set.insert(0, Arc::new(MemBlockDevice::new(256)));
        set
    }

    fn record(offset: u64) -> UpdateRecord {
        UpdateRecord {
            btree_id: BtreeId::Inodes,
            level: 0,
            key: Key { position: Position::new(1, offset, 0), size: 0, value: KeyValue::Inode(InodeValue::default()) },
        }
    }

    #[test]
    fn append_assigns_increasing_sequences() {
        let journal = Journal::new(vec![JournalRegion { device: 0, start_sector: 0, nr_sectors: 200 }], ChecksumType::Crc32c);
        let devices = devices();
        let seq1 = journal.append(&devices, vec![record(1)], false).unwrap();
        let seq2 = journal.append(&devices, vec![record(2)], false).unwrap();
        assert!(seq2 > seq1);
    }

    #[test]
    fn replay_recovers_appended_entries() {
        let journal = Journal::new(vec![JournalRegion { device: 0, start_sector: 0, nr_sectors: 200 }], ChecksumType::Crc32c);
        let devices = devices();
        journal.append(&devices, vec![record(1)], false).unwrap();
        journal.append(&devices, vec![record(2)], true).unwrap();

        let replayed = journal.replay(&devices).unwrap();
        assert_eq!(replayed.len(), 2);
        assert!(replayed[0].seq < replayed[1].seq);
        assert!(replayed.last().unwrap().is_flush());
    }

    #[test]
    fn blacklisted_sequence_is_skipped_on_replay() {
        let journal = Journal::new(vec![JournalRegion { device: 0, start_sector: 0, nr_sectors: 200 }], ChecksumType::Crc32c);
        let devices = devices();
        let bad_seq = journal.append(&devices, vec![record(1)], false).unwrap();
        journal.append(&devices, vec![record(2)], false).unwrap();
        journal.blacklist(bad_seq);

        let replayed = journal.replay(&devices).unwrap();
        assert_eq!(replayed.len(), 1);
        assert!(replayed[0].seq != bad_seq);
    }

    #[test]
    fn reservation_fails_once_space_is_exhausted() {
        let journal = Journal::new(vec![JournalRegion { device: 0, start_sector: 0, nr_sectors: 8 }], ChecksumType::Crc32c);
        assert!(journal.try_reserve(1).is_err() || journal.try_reserve(100).is_err());
    }
}
