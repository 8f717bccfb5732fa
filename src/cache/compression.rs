//! Cache Compression Support
//!
//! LZ4 payload compression gated by a size threshold, with automatic fallback
//! to raw storage on failure.
//!
//! # Example
//!
//! ```
//! use sitelens::cache::compression::{CompressionCodec, CompressionConfig};
//!
//! let codec = CompressionCodec::with_config(CompressionConfig {
//!     threshold_bytes: 16,
//!     ..Default::default()
//! });
//!
//! let data = b"Hello, this is test data that should compress well! Hello, this is test data!";
//! let encoded = codec.encode(data, None);
//!
//! let decoded = codec.decode(&encoded.payload, encoded.compressed).unwrap();
//! assert_eq!(decoded.as_ref(), data);
//! ```
//!
//! The `compressed` flag stored with each entry is the only signal used to
//! decide whether to decompress. Payload bytes are never inspected.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::DEFAULT_COMPRESSION_THRESHOLD;
use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionAlgorithm {
    /// No compression
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
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for compression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress by default (a strategy may override per call)
    pub enabled: bool,
    /// Payloads strictly larger than this are compressed
    pub threshold_bytes: u64,
    /// LZ4 high-compression level
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD,
            level: 4,
        }
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

// =============================================================================
// LZ4 Compressor
// =============================================================================

/// LZ4 compressor (fast compression)
pub struct Lz4Compressor {
    level: i32,
}

impl Lz4Compressor {
    /// Create new LZ4 compressor with default settings
    pub fn new() -> Self {
        Self { level: 4 }
    }

    /// Create with custom compression level
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
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

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Compression Codec
// =============================================================================

/// Result of encoding a payload for storage
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Bytes to store
    pub payload: Bytes,
    /// Whether `payload` is compressed
    pub compressed: bool,
    /// Size before compression
    pub original_size: u64,
}

impl Encoded {
    fn raw(data: &[u8]) -> Self {
        Self {
            payload: Bytes::copy_from_slice(data),
            compressed: false,
            original_size: data.len() as u64,
        }
    }

    /// Bytes saved by compression
    pub fn bytes_saved(&self) -> u64 {
        self.original_size.saturating_sub(self.payload.len() as u64)
    }
}

/// Compressor in use, with the level it was built at if it is the built-in one
struct Backend {
    compressor: Arc<dyn Compressor>,
    builtin_level: Option<i32>,
}

impl Backend {
    fn lz4(level: i32) -> Self {
        Self {
            compressor: Arc::new(Lz4Compressor::with_level(level)),
            builtin_level: Some(level),
        }
    }
}

/// Threshold-gated codec with fallback to raw storage
pub struct CompressionCodec {
    config: RwLock<CompressionConfig>,
    backend: RwLock<Backend>,
}

impl CompressionCodec {
    /// Create a codec with default config
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            backend: RwLock::new(Backend::lz4(config.level)),
            config: RwLock::new(config),
        }
    }

    /// Create with a custom compressor implementation
    ///
    /// A custom compressor ignores `config.level`.
    pub fn with_compressor(config: CompressionConfig, compressor: Arc<dyn Compressor>) -> Self {
        Self {
            config: RwLock::new(config),
            backend: RwLock::new(Backend {
                compressor,
                builtin_level: None,
            }),
        }
    }

    fn compressor(&self) -> Arc<dyn Compressor> {
        Arc::clone(&self.backend.read().compressor)
    }

    /// Whether a payload of `size` bytes crosses the threshold
    pub fn should_compress(&self, size: u64) -> bool {
        size > self.config.read().threshold_bytes
    }

    /// Encode a payload for storage
    ///
    /// `enabled` overrides the configured default for this call. Falls back to
    /// raw bytes when compression fails or does not shrink the payload.
    pub fn encode(&self, data: &[u8], enabled: Option<bool>) -> Encoded {
        let enabled = enabled.unwrap_or_else(|| self.config.read().enabled);
        if !enabled || !self.should_compress(data.len() as u64) {
            return Encoded::raw(data);
        }

        let compressor = self.compressor();
        match compressor.compress(data) {
            Ok(compressed) if compressed.len() < data.len() => Encoded {
                payload: Bytes::from(compressed),
                compressed: true,
                original_size: data.len() as u64,
            },
            Ok(_) => Encoded::raw(data),
            Err(e) => {
                tracing::warn!(
                    algorithm = %compressor.algorithm(),
                    error = %e,
                    "Compression failed, storing uncompressed"
                );
                Encoded::raw(data)
            }
        }
    }

    /// Decode a stored payload using its `compressed` flag
    pub fn decode(&self, payload: &Bytes, compressed: bool) -> Result<Bytes> {
        if !compressed {
            return Ok(payload.clone());
        }
        let decompressed = self.compressor().decompress(payload)?;
        Ok(Bytes::from(decompressed))
    }

    /// Replace the configuration
    ///
    /// The built-in LZ4 compressor is rebuilt when the level changes. LZ4
    /// blocks decode the same at any level, so entries already stored stay
    /// readable.
    pub fn set_config(&self, config: CompressionConfig) {
        {
            let mut backend = self.backend.write();
            if backend.builtin_level.is_some_and(|level| level != config.level) {
                tracing::debug!(level = config.level, "Rebuilding LZ4 compressor");
                *backend = Backend::lz4(config.level);
            }
        }
        *self.config.write() = config;
    }

    /// Get a copy of the configuration
    pub fn config(&self) -> CompressionConfig {
        self.config.read().clone()
    }

    /// Level of the built-in compressor, `None` for a custom one
    pub fn level(&self) -> Option<i32> {
        self.backend.read().builtin_level
    }
}

impl Default for CompressionCodec {
    fn default() -> Self {
        Self::new()
    }
}
