//! Entry Codec
//!
//! Serializes values for the shared tier and estimates their footprint in the
//! local tier. Shared-tier payloads are JSON behind a one-byte envelope header
//! naming the compression algorithm, so readers never need to know the
//! writer's namespace policy.
//!
//! ```text
//! ┌────────┬─────────────────────────────┐
//! │ header │ body                        │
//! │ 1 byte │ JSON or LZ4-compressed JSON │
//! └────────┴─────────────────────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionAlgorithm {
    /// No compression
    #[default]
    None,
    /// LZ4 - fast compression
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// Envelope header byte
    pub fn header(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
        }
    }

    /// Parse an envelope header byte
    pub fn from_header(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(CompressionAlgorithm::None),
            1 => Some(CompressionAlgorithm::Lz4),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for shared-tier compression
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Minimum size to compress (smaller payloads are stored uncompressed)
    pub min_size_bytes: usize,
    /// LZ4 high-compression level
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: 1024,
            level: 4,
        }
    }
}

// =============================================================================
// LZ4 Compressor
// =============================================================================

/// LZ4 block compressor (size-prefixed blocks)
#[derive(Debug, Clone)]
pub struct Lz4Compressor {
    level: i32,
}

impl Lz4Compressor {
    /// Create with custom compression level
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }

    /// Compress data
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }

    /// Decompress data
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::with_level(CompressionConfig::default().level)
    }
}

// =============================================================================
// Entry Codec
// =============================================================================

/// An encoded value ready for the shared tier
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Envelope bytes (header + body)
    pub bytes: Bytes,
    /// Local-tier footprint estimate
    pub approx_size: u64,
    /// Algorithm recorded in the header
    pub algorithm: CompressionAlgorithm,
}

/// Serializer/deserializer for cached values
#[derive(Debug, Clone, Default)]
pub struct EntryCodec {
    config: CompressionConfig,
    lz4: Lz4Compressor,
}

impl EntryCodec {
    /// Create with custom config
    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            lz4: Lz4Compressor::with_level(config.level),
            config,
        }
    }

    /// Encode a value. `compress` comes from the namespace strategy.
    ///
    /// LZ4 is only applied above `min_size_bytes` and only kept when it
    /// actually shrinks the payload; a compression error falls back to plain
    /// JSON.
    pub fn encode<T: Serialize>(&self, key: &str, value: &T, compress: bool) -> Result<Encoded> {
        let json = serde_json::to_vec(value)?;
        let approx_size = Self::estimate_size(key, json.len());

        let mut algorithm = CompressionAlgorithm::None;
        let mut body = None;
        if compress && json.len() >= self.config.min_size_bytes {
            match self.lz4.compress(&json) {
                Ok(compressed) if compressed.len() < json.len() => {
                    algorithm = CompressionAlgorithm::Lz4;
                    body = Some(compressed);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Compression failed for {}, storing uncompressed: {}", key, e),
            }
        }
        let body = body.unwrap_or(json);

        let mut buf = BytesMut::with_capacity(body.len() + 1);
        buf.put_u8(algorithm.header());
        buf.put_slice(&body);

        Ok(Encoded {
            bytes: buf.freeze(),
            approx_size,
            algorithm,
        })
    }

    /// Decode envelope bytes back into a value
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        self.decode_sized(bytes).map(|(value, _)| value)
    }

    /// Decode, also returning the uncompressed JSON length
    pub fn decode_sized<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<(T, usize)> {
        let (&header, body) = bytes
            .split_first()
            .ok_or_else(|| Error::Serialization("empty payload".into()))?;

        match CompressionAlgorithm::from_header(header) {
            Some(CompressionAlgorithm::None) => Ok((serde_json::from_slice(body)?, body.len())),
            Some(CompressionAlgorithm::Lz4) => {
                let json = self.lz4.decompress(body)?;
                Ok((serde_json::from_slice(&json)?, json.len()))
            }
            None => Err(Error::Serialization(format!(
                "unknown envelope header 0x{:02x}",
                header
            ))),
        }
    }

    /// Local-tier footprint: serialized length plus key length
    #[inline]
    pub fn estimate_size(key: &str, serialized_len: usize) -> u64 {
        (key.len() + serialized_len) as u64
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}
