//! A single journal entry (§4.4, §6.1 "Journal entry header"): a
//! fixed header followed by packed update records, each tagging which
//! B-tree and level the key belongs to.

use cowfs_types::{checksum, BtreeId, ChecksumType, Error, Key, Reader, Result, Writer};

pub const ENTRY_MAGIC: [u8; 8] = *b"cowfjrnl";

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        /// §4.4: "a 'flush' entry marks a durability barrier."
        const FLUSH = 1 << 0;
    }
}

/// One update within an entry: the key plus which tree/level it targets
/// (§6.1: "each record tags `(btree_id, level, size)`" — `size` is
/// carried on `key` itself).
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    pub btree_id: BtreeId,
    pub level: u16,
    pub key: Key,
}

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub seq: u64,
    pub last_seq: u64,
    pub flags: EntryFlags,
    pub records: Vec<UpdateRecord>,
}

impl JournalEntry {
    pub fn new(seq: u64, last_seq: u64, records: Vec<UpdateRecord>) -> Self {
        Self { seq, last_seq, flags: EntryFlags::empty(), records }
    }

    pub fn flush(mut self) -> Self {
        self.flags |= EntryFlags::FLUSH;
        self
    }

    pub fn is_flush(&self) -> bool {
        self.flags.contains(EntryFlags::FLUSH)
    }

    /// Encodes the entry with a trailing checksum over everything after
    /// the checksum field itself, the same convention `cowfs-super` uses
    /// for its header.
    pub fn encode(&self, checksum_type: ChecksumType) -> Vec<u8> {
        let mut w = Writer::new();
        w.bytes(&ENTRY_MAGIC);
        w.u64(self.seq);
        w.u64(self.last_seq);
        w.u32(1); // version
        w.u32(self.flags.bits());
        w.u32(self.records.len() as u32);
        for record in &self.records {
            w.u8(record.btree_id as u8);
            w.u16(record.level);
            w.key(&record.key);
        }
        let body = w.into_bytes();
        let sum = checksum::compute(checksum_type, &body);

        let mut out = Writer::new();
        out.u8(checksum_type as u8);
        out.u64(sum);
        out.bytes(&body);
        out.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut outer = Reader::new(buf);
        let checksum_type_byte = outer.u8()?;
        let expected_sum = outer.u64()?;
        let body = outer.bytes()?;

        let checksum_type = checksum_type_from_u8(checksum_type_byte);
        if !checksum::verify(checksum_type, &body, expected_sum) {
            return Err(Error::ChecksumMismatch);
        }

        let mut r = Reader::new(&body);
        let magic = r.take(8)?;
        if magic != &ENTRY_MAGIC[..] {
            return Err(Error::BadMagic);
        }
        let seq = r.u64()?;
        let last_seq = r.u64()?;
        let _version = r.u32()?;
        let flags = EntryFlags::from_bits_truncate(r.u32()?);
        let nr_records = r.u32()?;
        let mut records = Vec::with_capacity(nr_records as usize);
        for _ in 0..nr_records {
            let btree_id = BtreeId::from_u8(r.u8()?).ok_or(Error::CorruptMetadata)?;
            let level = r.u16()?;
            let key = r.key()?;
            records.push(UpdateRecord { btree_id, level, key });
        }
        Ok(Self { seq, last_seq, flags, records })
    }

    /// Reads just the fixed 13-byte outer header (checksum type, checksum,
    /// body length) from a candidate entry's leading sector to learn how
    /// many bytes the full entry occupies on disk, without decoding the
    /// body itself. `append` can write an entry across several sectors
    /// (`encoded.len().div_ceil(SECTOR_SIZE)`), so replay must size its
    /// read from this before calling [`JournalEntry::decode`] — reading a
    /// fixed one-sector window truncates any entry whose body doesn't fit
    /// in it.
    pub fn peek_encoded_len(header_sector: &[u8]) -> Result<usize> {
        let mut r = Reader::new(header_sector);
        let _checksum_type = r.u8()?;
        let _sum = r.u64()?;
        let body_len = r.u32()? as usize;
        Ok(1 + 8 + 4 + body_len)
    }
}

fn checksum_type_from_u8(v: u8) -> ChecksumType {
    use ChecksumType::*;
    match v {
        0 => None,
        1 => Crc32c,
        2 => Crc64,
        3 => Xxh3,
        _ => Poly1305,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_types::{InodeValue, KeyValue, Position};

    fn sample_entry(seq: u64) -> JournalEntry {
        let record = UpdateRecord {
            btree_id: BtreeId::Inodes,
            level: 0,
            key: Key { position: Position::new(1, 0, 0), size: 0, value: KeyValue::Inode(InodeValue::default()) },
        };
        JournalEntry::new(seq, seq.saturating_sub(1), vec![record])
    }

    #[test]
    fn round_trips() {
        let entry = sample_entry(5);
        let encoded = entry.encode(ChecksumType::Crc32c);
        let decoded = JournalEntry::decode(&encoded).unwrap();
        assert_eq!(decoded.seq, 5);
        assert_eq!(decoded.records.len(), 1);
        assert!(!decoded.is_flush());
    }

    #[test]
    fn flush_flag_round_trips() {
        let entry = sample_entry(1).flush();
        let decoded = JournalEntry::decode(&entry.encode(ChecksumType::Crc32c)).unwrap();
        assert!(decoded.is_flush());
    }

    #[test]
    fn corrupted_body_fails_checksum() {
        let entry = sample_entry(1);
        let mut encoded = entry.encode(ChecksumType::Crc32c);
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(matches!(JournalEntry::decode(&encoded), Err(Error::ChecksumMismatch)));
    }
}
