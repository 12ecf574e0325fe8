//! Extent compression (§4.6 write step 2): "try configured algorithm;
//! fall back to uncompressed if expansion." Each algorithm is one of the
//! crates named in §4.6's concrete algorithm choices.

use cowfs_types::{CompressionType, Error, Result};

/// Compresses `data` with `requested`, falling back to
/// [`CompressionType::None`] if the result would be larger than the
/// input — returns the algorithm actually used alongside the bytes,
/// since a caller must record what it needs to decompress with later.
pub fn compress(data: &[u8], requested: CompressionType) -> (Vec<u8>, CompressionType) {
    let compressed = match requested {
        CompressionType::None => return (data.to_vec(), CompressionType::None),
        CompressionType::Lz4 => lz4_flex::compress(data),
        CompressionType::Gzip => gzip_compress(data),
        CompressionType::Zstd => zstd::encode_all(data, 0).unwrap_or_else(|_| data.to_vec()),
    };
    if compressed.len() >= data.len() {
        (data.to_vec(), CompressionType::None)
    } else {
        (compressed, requested)
    }
}

pub fn decompress(data: &[u8], compression: CompressionType, uncompressed_size: u32) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4 => lz4_flex::decompress(data, uncompressed_size as usize).map_err(|_| Error::CorruptMetadata),
        CompressionType::Gzip => gzip_decompress(data),
        CompressionType::Zstd => zstd::decode_all(data).map_err(|_| Error::CorruptMetadata),
    }
}

fn gzip_compress(data: &[u8]) -> Vec<u8> {
    use std::io::Write;
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    if encoder.write_all(data).is_err() {
        return data.to_vec();
    }
    encoder.finish().unwrap_or_else(|_| data.to_vec())
}

fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read;
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(data).read_to_end(&mut out).map_err(|_| Error::CorruptMetadata)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lz4_round_trips_compressible_data() {
        let data = vec![7u8; 4096];
        let (compressed, used) = compress(&data, CompressionType::Lz4);
        assert_eq!(used, CompressionType::Lz4);
        assert!(compressed.len() < data.len());
        let back = decompress(&compressed, used, data.len() as u32).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn zstd_round_trips() {
        let data = b"the quick brown fox the quick brown fox the quick brown fox".repeat(20);
        let (compressed, used) = compress(&data, CompressionType::Zstd);
        assert_eq!(used, CompressionType::Zstd);
        let back = decompress(&compressed, used, data.len() as u32).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn gzip_round_trips() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec();
        let (compressed, used) = compress(&data, CompressionType::Gzip);
        assert_eq!(used, CompressionType::Gzip);
        let back = decompress(&compressed, used, data.len() as u32).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn incompressible_small_input_falls_back_to_none() {
        let data = vec![1, 2, 3, 4];
        let (compressed, used) = compress(&data, CompressionType::Lz4);
        assert_eq!(used, CompressionType::None);
        assert_eq!(compressed, data);
    }
}
