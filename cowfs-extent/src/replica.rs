//! Low-level single-replica I/O: writing checksummed physical bytes to
//! one device sector range and reading them back with verification.
//! [`crate::write`]/[`crate::read`]/[`crate::stripe`] all go through
//! this rather than touching [`cowfs_io::BlockDevice`] directly, so the
//! sector-padding and checksum steps live in exactly one place.

use cowfs_io::SECTOR_SIZE;
use cowfs_types::{checksum, ChecksumType, DeviceSet, Error, ExtentPointer, Result};

/// Pads `bytes` up to a whole number of sectors with zeros — devices
/// only accept sector-multiple buffers, but a compressed/encrypted
/// extent's real length almost never lands on one.
fn pad_to_sector(bytes: &[u8]) -> Vec<u8> {
    let padded_len = bytes.len().div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
    let mut buf = vec![0u8; padded_len];
    buf[..bytes.len()].copy_from_slice(bytes);
    buf
}

/// Writes `bytes` (the physical, post-compress/encrypt representation)
/// to the device/offset `pointer` names, checksumming it with `ty` and
/// returning the pointer updated with that checksum.
pub fn write_pointer(devices: &DeviceSet, pointer: ExtentPointer, bytes: &[u8], ty: ChecksumType) -> Result<ExtentPointer> {
    let sum = checksum::compute(ty, bytes);
    let device = devices.get(pointer.device)?;
    let padded = pad_to_sector(bytes);
    device.write_at(pointer.offset, &padded)?;
    Ok(pointer.with_checksum(ty, sum))
}

/// Reads back the physical bytes at `pointer`, truncated to
/// `physical_len`, and verifies the checksum recorded on the pointer.
/// `Err(Error::ChecksumMismatch)` signals the caller should try another
/// replica rather than a hard failure.
pub fn read_pointer(devices: &DeviceSet, pointer: &ExtentPointer, physical_len: usize) -> Result<Vec<u8>> {
    let device = devices.get(pointer.device)?;
    let padded_len = physical_len.div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
    let mut buf = vec![0u8; padded_len];
    device.read_at(pointer.offset, &mut buf)?;
    buf.truncate(physical_len);
    let ty = checksum_type_from_pointer(pointer);
    if !checksum::verify(ty, &buf, pointer.checksum) {
        return Err(Error::ChecksumMismatch);
    }
    Ok(buf)
}

fn checksum_type_from_pointer(pointer: &ExtentPointer) -> ChecksumType {
    match pointer.checksum_type {
        0 => ChecksumType::None,
        1 => ChecksumType::Crc32c,
        2 => ChecksumType::Crc64,
        3 => ChecksumType::Xxh3,
        _ => ChecksumType::Poly1305,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_io::MemBlockDevice;
    use std::sync::Arc;

    fn devices() -> DeviceSet {
        let mut set = DeviceSet::new();
        set.insert(0, Arc::new(MemBlockDevice::new(4096)));
        set
    }

    #[test]
    fn write_then_read_round_trips() {
        let devices = devices();
        let pointer = ExtentPointer::new(0, 0, 0, 1);
        let written = write_pointer(&devices, pointer, b"hello world", ChecksumType::Crc32c).unwrap();
        let back = read_pointer(&devices, &written, b"hello world".len()).unwrap();
        assert_eq!(back, b"hello world");
    }

    #[test]
    fn corrupted_bytes_fail_checksum() {
        let devices = devices();
        let pointer = ExtentPointer::new(0, 0, 0, 1);
        let written = write_pointer(&devices, pointer, b"hello world", ChecksumType::Crc32c).unwrap();
        devices.get(0).unwrap().write_at(0, &[0u8; 512]).unwrap();
        assert!(matches!(read_pointer(&devices, &written, b"hello world".len()), Err(Error::ChecksumMismatch)));
    }
}
