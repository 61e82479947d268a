use std::sync::Arc;

use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    None,
    Lz4,
}

pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn compression_type(&self) -> CompressionType;
}

pub struct NoCompression;

impl Compressor for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn compression_type(&self) -> CompressionType {
        CompressionType::None
    }
}

/// Stored payloads use the size-prepended framing so decompression does
/// not need the original length carried out of band.
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        decompress_size_prepended(data).map_err(|e| Error::Decompression(e.to_string()))
    }

    fn compression_type(&self) -> CompressionType {
        CompressionType::Lz4
    }
}

pub fn get_compressor(compression_type: CompressionType) -> Arc<dyn Compressor> {
    match compression_type {
        CompressionType::None => Arc::new(NoCompression),
        CompressionType::Lz4 => Arc::new(Lz4Compressor),
    }
}

/// Convenience function to compress data with a specific compression type
pub fn compress(data: &[u8], compression_type: CompressionType) -> Result<Vec<u8>> {
    let compressor = get_compressor(compression_type);
    compressor.compress(data)
}

/// Convenience function to decompress data with a specific compression type
pub fn decompress(data: &[u8], compression_type: CompressionType) -> Result<Vec<u8>> {
    let compressor = get_compressor(compression_type);
    compressor.decompress(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_compression() {
        let compressor = NoCompression;
        let data = b"Hello, World!";

        let compressed = compressor.compress(data).unwrap();
        assert_eq!(compressed, data);

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_lz4_compression() {
        let compressor = Lz4Compressor;
        let data = b"Hello, World! ".repeat(100);

        let compressed = compressor.compress(&data).unwrap();
        assert!(compressed.len() < data.len());

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_lz4_rejects_garbage() {
        let compressor = Lz4Compressor;
        let err = compressor.decompress(&[0xFF, 0xFF, 0xFF, 0xFF, 0x00]).unwrap_err();
        assert!(matches!(err, Error::Decompression(_)));
    }

    #[test]
    fn test_convenience_round_trip() {
        let data = b"payload ".repeat(64);
        let compressed = compress(&data, CompressionType::Lz4).unwrap();
        let restored = decompress(&compressed, CompressionType::Lz4).unwrap();
        assert_eq!(restored, data);
    }
}
