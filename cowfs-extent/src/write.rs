//! The write path (§4.6 "Write"): align, compress, allocate replicas,
//! encrypt, checksum, submit, commit.

use cowfs_alloc::Allocator;
use cowfs_btree::BtreeEngine;
use cowfs_journal::Journal;
use cowfs_txn::run_txn;
use cowfs_types::{
    BtreeId, ChecksumType, CompressionType, DeviceSet, ErasureStripePtr, ExtentPointer, ExtentValue, InodeValue, Key, KeyValue, Position, Result, Target,
};

use crate::align;
use crate::compress;
use crate::crypt::{self, EXTENT_KEY_LEN};
use crate::replica;

/// What one `write_extent` call produced: the physical (post-compress/
/// post-encrypt) bytes it wrote, the pointer it wrote them at, and
/// (when this shard belongs to a stripe) the stripe back-reference — a
/// stripe's parity computation needs the physical bytes of every data
/// shard, which is why this is returned rather than discarded once the
/// device write succeeds.
pub struct WrittenExtent {
    pub inode: u64,
    pub offset: u64,
    pub physical_bytes: Vec<u8>,
    pub pointer: ExtentPointer,
    pub stripe: Option<ErasureStripePtr>,
    /// The algorithm actually used, which may be [`CompressionType::None`]
    /// even when a real algorithm was requested — `compress::compress`
    /// falls back on expansion, and a caller recording anything else
    /// would make the bytes undecodable.
    pub compression: CompressionType,
}

/// One replica of one extent, start to finish: compress `plaintext`,
/// draw a bucket from `alloc`, encrypt with the nonce derived from the
/// allocated generation, checksum, and write. Shared by
/// [`ExtentIo::write`] and [`crate::stripe::StripeRegistry::write_stripe`]
/// so a striped shard goes through exactly the same pipeline an
/// ordinary extent does.
#[allow(clippy::too_many_arguments)]
pub fn write_extent(
    engine: &BtreeEngine,
    journal: &Journal,
    devices: &DeviceSet,
    alloc: &Allocator,
    encryption_key: Option<&[u8; EXTENT_KEY_LEN]>,
    compression: CompressionType,
    checksum_type: ChecksumType,
    inode: u64,
    offset: u64,
    plaintext: &[u8],
    stripe: Option<ErasureStripePtr>,
) -> Result<WrittenExtent> {
    let (compressed, used_compression) = compress::compress(plaintext, compression);
    let pointer = alloc.allocate(engine, journal, devices, offset, Target::Null, 1)?;
    let physical = match encryption_key {
        Some(key) => crypt::encrypt(key, inode, offset, pointer.generation, &compressed)?,
        None => compressed,
    };
    let pointer = replica::write_pointer(devices, pointer, &physical, checksum_type)?;
    Ok(WrittenExtent { inode, offset, physical_bytes: physical, pointer, stripe, compression: used_compression })
}

/// Per-filesystem write-path configuration and the single extent write
/// operation (§4.6 "Write"); read lives in [`crate::read::ExtentIo`]
/// impl block in `read.rs` — same type, split across files the way
/// `cowfs-btree::Btree`'s iterator methods live in `iter.rs` apart from
/// `node.rs`.
pub struct ExtentIo {
    pub compression: CompressionType,
    pub checksum_type: ChecksumType,
    pub encryption_key: Option<[u8; EXTENT_KEY_LEN]>,
    pub replicas: u8,
    pub promote_target: Target,
}

impl ExtentIo {
    pub fn new(compression: CompressionType, checksum_type: ChecksumType, encryption_key: Option<[u8; EXTENT_KEY_LEN]>, replicas: u8) -> Self {
        Self { compression, checksum_type, encryption_key, replicas: replicas.max(1), promote_target: Target::Null }
    }

    /// §4.6 `Write(inode, offset, buffer, options)`.
    pub fn write(&self, engine: &BtreeEngine, journal: &Journal, devices: &DeviceSet, alloc: &Allocator, inode: u64, offset: u64, data: &[u8]) -> Result<()> {
        let (aligned_start, aligned_end) = align::aligned_range(offset, data.len() as u64);
        let aligned_len = (aligned_end - aligned_start) as usize;

        // Step 1: read-modify-write of partial head/tail blocks. A hole
        // (no prior extent) reads back as zeros, same as any sparse
        // read.
        let mut buf = self.read(engine, devices, inode, aligned_start, aligned_len as u64).unwrap_or_else(|_| vec![0u8; aligned_len]);
        if buf.len() != aligned_len {
            buf.resize(aligned_len, 0);
        }
        let rel = (offset - aligned_start) as usize;
        buf[rel..rel + data.len()].copy_from_slice(data);

        // Steps 2-6: one replica through the shared pipeline, plus
        // `replicas - 1` more independent passes through the same
        // pipeline. Each replica is re-encrypted rather than copying the
        // first replica's ciphertext: the nonce is derived from the
        // allocated bucket's own generation (crate::crypt::nonce_for),
        // and each replica draws its own bucket, so only a fresh
        // encrypt-per-replica keeps every pointer's stored generation
        // consistent with the bytes actually sitting behind it.
        let first = write_extent(
            engine,
            journal,
            devices,
            alloc,
            self.encryption_key.as_ref(),
            self.compression,
            self.checksum_type,
            inode,
            aligned_start,
            &buf,
            None,
        )?;
        let mut pointers = vec![first.pointer];
        let mut compressed_size = first.physical_bytes.len() as u32;
        for _ in 1..self.replicas {
            let extra = write_extent(
                engine,
                journal,
                devices,
                alloc,
                self.encryption_key.as_ref(),
                self.compression,
                self.checksum_type,
                inode,
                aligned_start,
                &buf,
                None,
            )?;
            compressed_size = compressed_size.max(extra.physical_bytes.len() as u32);
            pointers.push(extra.pointer);
        }

        // Step 7: one transaction inserts the extent key and updates
        // the inode.
        run_txn(engine, journal, devices, |txn| {
            let value = ExtentValue {
                compressed_size,
                uncompressed_size: aligned_len as u32,
                compression: first.compression,
                nr_required: pointers.len() as u8,
                pointers: pointers.clone(),
                stripe: None,
            };
            txn.update(BtreeId::Extents, Key { position: Position::new(inode, aligned_start, 0), size: aligned_len as u64, value: KeyValue::Extent(value) });

            let inode_tree = engine.tree(BtreeId::Inodes);
            let inode_position = Position::new(inode, 0, 0);
            let mut inode_value = match inode_tree.lookup(inode_position) {
                Some(Key { value: KeyValue::Inode(v), .. }) => v,
                _ => InodeValue::default(),
            };
            inode_value.size = inode_value.size.max(offset + data.len() as u64);
            txn.update(BtreeId::Inodes, Key { position: inode_position, size: 0, value: KeyValue::Inode(inode_value) });
            Ok(())
        })?;

        Ok(())
    }
}
