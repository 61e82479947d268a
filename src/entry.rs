use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::compression::{compress, decompress, CompressionType};
use crate::error::Result;

pub const ENTRY_VERSION: u32 = 1;

/// Stored envelope for one cache value. The payload is the serde_json
/// encoding of the caller's value, lz4-compressed when it crossed the
/// configured threshold at write time. Timestamps are wall-clock unix
/// milliseconds so TTL survives process and host boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub payload: Vec<u8>,
    pub created_at_ms: u64,
    pub ttl_ms: Option<u64>,
    pub version: u32,
    pub compressed: bool,
}

impl CacheEntry {
    /// Build an entry from already-serialized value bytes, compressing
    /// when the payload exceeds `compression_threshold`.
    pub fn seal(value_bytes: Vec<u8>, ttl: Option<Duration>, compression_threshold: usize) -> Result<Self> {
        let compressed = value_bytes.len() > compression_threshold;
        let payload = if compressed {
            compress(&value_bytes, CompressionType::Lz4)?
        } else {
            value_bytes
        };
        Ok(Self {
            payload,
            created_at_ms: now_ms(),
            // TTLs past the representable range clamp instead of wrapping.
            ttl_ms: ttl.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
            version: ENTRY_VERSION,
            compressed,
        })
    }

    /// Recover the serialized value bytes, decompressing when flagged.
    pub fn unseal(self) -> Result<Vec<u8>> {
        if self.compressed {
            decompress(&self.payload, CompressionType::Lz4)
        } else {
            Ok(self.payload)
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.ttl_ms {
            Some(ttl) => now_ms.saturating_sub(self.created_at_ms) >= ttl,
            None => false,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (entry, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(entry)
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
