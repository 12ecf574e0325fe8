use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::checksum::ChecksumType;

/// Integer contribution of a device to an extent's redundancy
/// requirement (glossary "Durability"). A plain replica usually
/// contributes 1; a parity shard of an erasure-coded stripe contributes
/// less than 1 of "real" data but is rounded up to 1 here since the
/// model only needs integer arithmetic for invariant 5's `>= nr_required`
/// check.
pub type Durability = u8;

/// One on-disk location backing an extent (§3.1).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ExtentPointer {
    pub device: u16,
    pub durability: u8,
    pub cached: u8,
    pub offset: u64,
    pub generation: u8,
    pub checksum_type: u8,
    _pad: [u8; 2],
    pub checksum: u64,
}

impl ExtentPointer {
    pub fn new(device: u16, offset: u64, generation: u8, durability: Durability) -> Self {
        Self {
            device,
            durability,
            cached: 0,
            offset,
            generation,
            checksum_type: ChecksumType::Crc32c as u8,
            _pad: [0; 2],
            checksum: 0,
        }
    }

    pub fn with_checksum(mut self, ty: ChecksumType, value: u64) -> Self {
        self.checksum_type = ty as u8;
        self.checksum = value;
        self
    }
}

/// Back-reference from an extent pointer to the erasure-coded stripe it
/// is a shard of (§4.6).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ErasureStripePtr {
    pub stripe_id: u64,
    pub shard_idx: u8,
    _pad: [u8; 7],
}

impl ErasureStripePtr {
    pub fn new(stripe_id: u64, shard_idx: u8) -> Self {
        Self { stripe_id, shard_idx, _pad: [0; 7] }
    }
}

/// The value half of an `extents` key: everything needed to read the
/// bytes back (§3.1 "Extent pointer set").
#[derive(Debug, Clone)]
pub struct ExtentValue {
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub compression: CompressionType,
    pub nr_required: u8,
    pub pointers: Vec<ExtentPointer>,
    pub stripe: Option<ErasureStripePtr>,
}

impl ExtentValue {
    /// §3.2 invariant 6 / §8.1 invariant 5: sum of durabilities of *live*
    /// (non-errored) pointers must be >= `nr_required`.
    pub fn live_durability(&self, errored: &[bool]) -> u32 {
        self.pointers
            .iter()
            .zip(errored.iter().chain(std::iter::repeat(&false)))
            .filter(|(_, err)| !**err)
            .map(|(p, _)| p.durability as u32)
            .sum()
    }

    pub fn is_degraded(&self, errored: &[bool]) -> bool {
        self.live_durability(errored) < self.nr_required as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    None = 0,
    Lz4 = 1,
    Gzip = 2,
    Zstd = 3,
}

impl Default for CompressionType {
    fn default() -> Self {
        CompressionType::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(durability: u8) -> ExtentPointer {
        ExtentPointer::new(0, 0, 0, durability)
    }

    #[test]
    fn degraded_when_below_required() {
        let value = ExtentValue {
            compressed_size: 4096,
            uncompressed_size: 4096,
            compression: CompressionType::None,
            nr_required: 2,
            pointers: vec![ptr(1), ptr(1)],
            stripe: None,
        };
        assert!(!value.is_degraded(&[false, false]));
        assert!(value.is_degraded(&[true, false]));
    }
}
