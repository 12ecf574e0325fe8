//! The persisted set of journal sequences quarantined after a failed
//! write (§4.4, glossary "Blacklist"). Stored as a sorted run-length
//! list of `[start, end)` ranges — sequences are assigned densely, so a
//! quarantined run is almost always contiguous, and RLE keeps the
//! superblock trailing section this rides in small.

use cowfs_types::{Reader, Result, Writer};

#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    /// Sorted, non-overlapping `[start, end)` ranges.
    ranges: Vec<(u64, u64)>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, seq: u64) {
        self.add_range(seq, seq + 1);
    }

    pub fn add_range(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        let idx = self.ranges.partition_point(|&(s, _)| s < start);
        self.ranges.insert(idx, (start, end));
        self.coalesce();
    }

    fn coalesce(&mut self) {
        self.ranges.sort_unstable_by_key(|&(s, _)| s);
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(self.ranges.len());
        for &(s, e) in &self.ranges {
            if let Some(last) = merged.last_mut() {
                if s <= last.1 {
                    last.1 = last.1.max(e);
                    continue;
                }
            }
            merged.push((s, e));
        }
        self.ranges = merged;
    }

    pub fn contains(&self, seq: u64) -> bool {
        let idx = self.ranges.partition_point(|&(s, _)| s <= seq);
        idx > 0 && self.ranges[idx - 1].1 > seq
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(self.ranges.len() as u32);
        for &(s, e) in &self.ranges {
            w.u64(s);
            w.u64(e);
        }
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let count = r.u32()?;
        let mut ranges = Vec::with_capacity(count as usize);
        for _ in 0..count {
            ranges.push((r.u64()?, r.u64()?));
        }
        Ok(Self { ranges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_reflects_added_ranges() {
        let mut bl = Blacklist::new();
        bl.add_range(10, 15);
        assert!(bl.contains(10));
        assert!(bl.contains(14));
        assert!(!bl.contains(15));
        assert!(!bl.contains(9));
    }

    #[test]
    fn adjacent_ranges_coalesce() {
        let mut bl = Blacklist::new();
        bl.add_range(0, 5);
        bl.add_range(5, 10);
        let encoded = bl.encode();
        let decoded = Blacklist::decode(&encoded).unwrap();
        assert!(decoded.contains(0));
        assert!(decoded.contains(9));
        assert_eq!(decoded.ranges.len(), 1);
    }

    #[test]
    fn round_trips_through_encoding() {
        let mut bl = Blacklist::new();
        bl.add(3);
        bl.add(100);
        let decoded = Blacklist::decode(&bl.encode()).unwrap();
        assert!(decoded.contains(3));
        assert!(decoded.contains(100));
        assert!(!decoded.contains(4));
    }
}
