//! A small hand-rolled binary cursor plus `Key` encode/decode, shared by
//! every crate that needs to put a key on the wire: `cowfs-btree` (node
//! images) and `cowfs-journal` (update records) both build on this
//! rather than each growing their own copy, since a journaled update
//! record and a node's bset entry are the same `Key` either way.

use crate::bucket::BucketRecord;
use crate::extent::{CompressionType, ErasureStripePtr, ExtentPointer, ExtentValue};
use crate::key::{
    DirentValue, FreeSpaceValue, InodeValue, LruValue, NeedDiscardValue, ReflinkValue,
    ReplicasValue, SnapshotValue, SubvolumeValue, XattrValue,
};
use crate::{ChecksumType, Error, Key, KeyType, KeyValue, Position, Result};

pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    pub fn bytes(&mut self, b: &[u8]) {
        self.u32(b.len() as u32);
        self.buf.extend_from_slice(b);
    }
    pub fn string(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }
    pub fn position(&mut self, p: Position) {
        self.u64(p.inode);
        self.u64(p.offset);
        self.u32(p.snapshot);
    }
    pub fn pointer(&mut self, p: &ExtentPointer) {
        self.u16(p.device);
        self.u8(p.durability);
        self.u8(p.cached);
        self.u64(p.offset);
        self.u8(p.generation);
        self.u8(p.checksum_type);
        self.u64(p.checksum);
    }
    pub fn key(&mut self, key: &Key) {
        encode_key(self, key);
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
    pub fn position_in_buf(&self) -> usize {
        self.pos
    }
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
    pub fn u8(&mut self) -> Result<u8> {
        let v = *self.buf.get(self.pos).ok_or(Error::Truncated)?;
        self.pos += 1;
        Ok(v)
    }
    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }
    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(Error::Truncated)?;
        let b = self.buf.get(self.pos..end).ok_or(Error::Truncated)?;
        self.pos = end;
        Ok(b)
    }
    pub fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
    pub fn string(&mut self) -> Result<String> {
        String::from_utf8(self.bytes()?).map_err(|_| Error::CorruptMetadata)
    }
    pub fn position(&mut self) -> Result<Position> {
        let inode = self.u64()?;
        let offset = self.u64()?;
        let snapshot = self.u32()?;
        Ok(Position::new(inode, offset, snapshot))
    }
    pub fn pointer(&mut self) -> Result<ExtentPointer> {
        let device = self.u16()?;
        let durability = self.u8()?;
        let cached = self.u8()?;
        let offset = self.u64()?;
        let generation = self.u8()?;
        let checksum_type = self.u8()?;
        let checksum = self.u64()?;
        let mut p = ExtentPointer::new(device, offset, generation, durability)
            .with_checksum(checksum_type_from_u8(checksum_type), checksum);
        p.cached = cached;
        Ok(p)
    }
    pub fn key(&mut self) -> Result<Key> {
        decode_key(self)
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

fn compression_from_u8(v: u8) -> CompressionType {
    use CompressionType::*;
    match v {
        1 => Lz4,
        2 => Gzip,
        3 => Zstd,
        _ => None,
    }
}

fn key_type_from_u8(v: u8) -> Result<KeyType> {
    Ok(match v {
        0 => KeyType::Inode,
        1 => KeyType::Dirent,
        2 => KeyType::Extent,
        3 => KeyType::AllocBucket,
        4 => KeyType::FreeSpace,
        5 => KeyType::NeedDiscard,
        6 => KeyType::Lru,
        7 => KeyType::Replicas,
        8 => KeyType::Snapshot,
        9 => KeyType::Subvolume,
        10 => KeyType::Xattr,
        11 => KeyType::Reflink,
        _ => return Err(Error::CorruptMetadata),
    })
}

fn encode_key(w: &mut Writer, key: &Key) {
    w.position(key.position);
    w.u64(key.size);
    w.u8(key.key_type() as u8);
    match &key.value {
        KeyValue::Inode(v) => {
            w.u32(v.uid);
            w.u32(v.gid);
            w.u16(v.mode);
            w.u64(v.size);
            w.u64(v.atime);
            w.u64(v.ctime);
            w.u64(v.mtime);
            w.u32(v.nlink);
            w.u32(v.bi_flags);
        }
        KeyValue::Dirent(v) => {
            w.u64(v.target_inode);
            w.string(&v.name);
            w.u8(v.is_dir as u8);
        }
        KeyValue::Extent(v) => encode_extent_value(w, v),
        KeyValue::AllocBucket(v) => {
            w.u8(v.gen);
            w.u8(v.data_type);
            w.u8(v.state);
            w.u8(v.flags);
            w.u32(v.dirty_sectors);
            w.u32(v.cached_sectors);
            w.u64(v.read_time);
            w.u64(v.write_time);
            w.u32(v.stripe);
        }
        KeyValue::FreeSpace(v) => {
            w.u16(v.device);
            w.u64(v.bucket_offset);
            w.u8(v.generation);
        }
        KeyValue::NeedDiscard(v) => {
            w.u16(v.device);
            w.u64(v.bucket_offset);
        }
        KeyValue::Lru(v) => {
            w.u16(v.device);
            w.u64(v.bucket_offset);
        }
        KeyValue::Replicas(v) => {
            w.u8(v.nr_required);
            w.u8(v.nr_devices);
        }
        KeyValue::Snapshot(v) => {
            w.u32(v.parent);
            w.u32(v.subvolume);
        }
        KeyValue::Subvolume(v) => {
            w.u64(v.root_inode);
            w.u32(v.snapshot);
            w.u8(v.readonly as u8);
        }
        KeyValue::Xattr(v) => {
            w.string(&v.name);
            w.bytes(&v.value);
        }
        KeyValue::Reflink(v) => {
            w.u32(v.refcount);
            match &v.extent {
                Some(e) => {
                    w.u8(1);
                    encode_extent_value(w, e);
                }
                None => w.u8(0),
            }
        }
    }
}

fn encode_extent_value(w: &mut Writer, v: &ExtentValue) {
    w.u32(v.compressed_size);
    w.u32(v.uncompressed_size);
    w.u8(v.compression as u8);
    w.u8(v.nr_required);
    w.u32(v.pointers.len() as u32);
    for p in &v.pointers {
        w.pointer(p);
    }
    match &v.stripe {
        Some(s) => {
            w.u8(1);
            w.u64(s.stripe_id);
            w.u8(s.shard_idx);
        }
        None => w.u8(0),
    }
}

fn decode_extent_value(r: &mut Reader) -> Result<ExtentValue> {
    let compressed_size = r.u32()?;
    let uncompressed_size = r.u32()?;
    let compression = compression_from_u8(r.u8()?);
    let nr_required = r.u8()?;
    let nptr = r.u32()?;
    let mut pointers = Vec::with_capacity(nptr as usize);
    for _ in 0..nptr {
        pointers.push(r.pointer()?);
    }
    let stripe = if r.u8()? == 1 {
        Some(ErasureStripePtr::new(r.u64()?, r.u8()?))
    } else {
        None
    };
    Ok(ExtentValue { compressed_size, uncompressed_size, compression, nr_required, pointers, stripe })
}

fn decode_key(r: &mut Reader) -> Result<Key> {
    let position = r.position()?;
    let size = r.u64()?;
    let key_type = key_type_from_u8(r.u8()?)?;
    let value = match key_type {
        KeyType::Inode => KeyValue::Inode(InodeValue {
            uid: r.u32()?,
            gid: r.u32()?,
            mode: r.u16()?,
            size: r.u64()?,
            atime: r.u64()?,
            ctime: r.u64()?,
            mtime: r.u64()?,
            nlink: r.u32()?,
            bi_flags: r.u32()?,
        }),
        KeyType::Dirent => KeyValue::Dirent(DirentValue { target_inode: r.u64()?, name: r.string()?, is_dir: r.u8()? != 0 }),
        KeyType::Extent => KeyValue::Extent(decode_extent_value(r)?),
        KeyType::AllocBucket => {
            let gen = r.u8()?;
            let data_type = r.u8()?;
            let state = r.u8()?;
            let flags = r.u8()?;
            let dirty_sectors = r.u32()?;
            let cached_sectors = r.u32()?;
            let read_time = r.u64()?;
            let write_time = r.u64()?;
            let stripe = r.u32()?;
            KeyValue::AllocBucket(BucketRecord::from_fields(
                gen, data_type, state, flags, dirty_sectors, cached_sectors, read_time, write_time, stripe,
            ))
        }
        KeyType::FreeSpace => KeyValue::FreeSpace(FreeSpaceValue { device: r.u16()?, bucket_offset: r.u64()?, generation: r.u8()? }),
        KeyType::NeedDiscard => KeyValue::NeedDiscard(NeedDiscardValue { device: r.u16()?, bucket_offset: r.u64()? }),
        KeyType::Lru => KeyValue::Lru(LruValue { device: r.u16()?, bucket_offset: r.u64()? }),
        KeyType::Replicas => KeyValue::Replicas(ReplicasValue { nr_required: r.u8()?, nr_devices: r.u8()? }),
        KeyType::Snapshot => KeyValue::Snapshot(SnapshotValue { parent: r.u32()?, subvolume: r.u32()? }),
        KeyType::Subvolume => KeyValue::Subvolume(SubvolumeValue { root_inode: r.u64()?, snapshot: r.u32()?, readonly: r.u8()? != 0 }),
        KeyType::Xattr => KeyValue::Xattr(XattrValue { name: r.string()?, value: r.bytes()? }),
        KeyType::Reflink => {
            let refcount = r.u32()?;
            let extent = if r.u8()? == 1 { Some(decode_extent_value(r)?) } else { None };
            KeyValue::Reflink(ReflinkValue { refcount, extent })
        }
    };
    Ok(Key { position, size, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_key_round_trips() {
        let key = Key { position: Position::new(1, 0, 0), size: 0, value: KeyValue::Inode(InodeValue { size: 77, ..Default::default() }) };
        let mut w = Writer::new();
        w.key(&key);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = r.key().unwrap();
        match decoded.value {
            KeyValue::Inode(v) => assert_eq!(v.size, 77),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn truncated_key_errors() {
        let key = Key { position: Position::new(1, 0, 0), size: 0, value: KeyValue::Xattr(XattrValue { name: "user.x".into(), value: vec![1, 2, 3] }) };
        let mut w = Writer::new();
        w.key(&key);
        let mut bytes = w.into_bytes();
        bytes.truncate(bytes.len() - 2);
        let mut r = Reader::new(&bytes);
        assert!(r.key().is_err());
    }
}
