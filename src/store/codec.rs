// src/store/codec.rs

//! Blob codecs
//!
//! Object files hold the canonical bytes encoded by the store's codec. The
//! content hash is always computed over the decoded bytes, so the codec
//! never affects addressing. The codec is chosen when a store is created
//! and recorded in `store.json`.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;

/// Frame magic every zstd frame starts with
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Default zstd compression level
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Encodes blobs on write and decodes them on read
pub trait BlobCodec: fmt::Debug + Send + Sync {
    fn kind(&self) -> CompressionKind;
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, StoreError>;
    fn decode(&self, stored: &[u8]) -> Result<Vec<u8>, StoreError>;

    /// Wrap a reader over a stored object so it yields decoded bytes
    fn reader<'a>(&self, stored: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>, StoreError>;
}

/// Codec selection as recorded in configuration and `store.json`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    None,
    Zstd,
}

impl CompressionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "zstd" => Ok(Self::Zstd),
            other => Err(format!("unknown compression: {other}")),
        }
    }
}

/// Identity codec
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl BlobCodec for NoCompression {
    fn kind(&self) -> CompressionKind {
        CompressionKind::None
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        Ok(data.to_vec())
    }

    fn decode(&self, stored: &[u8]) -> Result<Vec<u8>, StoreError> {
        Ok(stored.to_vec())
    }

    fn reader<'a>(&self, stored: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>, StoreError> {
        Ok(stored)
    }
}

/// Zstandard codec at a fixed level
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    pub fn level(&self) -> i32 {
        self.level
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(DEFAULT_ZSTD_LEVEL)
    }
}

impl BlobCodec for ZstdCodec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Zstd
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        zstd::encode_all(data, self.level).map_err(|e| StoreError::Codec(format!("zstd encode: {e}")))
    }

    fn decode(&self, stored: &[u8]) -> Result<Vec<u8>, StoreError> {
        if !stored.starts_with(&ZSTD_MAGIC) {
            return Err(StoreError::Codec("object is not a zstd frame".to_string()));
        }
        zstd::decode_all(stored).map_err(|e| StoreError::Codec(format!("zstd decode: {e}")))
    }

    fn reader<'a>(&self, stored: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>, StoreError> {
        let decoder = zstd::stream::read::Decoder::new(stored)
            .map_err(|e| StoreError::Codec(format!("zstd decoder: {e}")))?;
        Ok(Box::new(decoder))
    }
}

/// Build the codec for a compression kind
pub fn codec_for(kind: CompressionKind, zstd_level: i32) -> Arc<dyn BlobCodec> {
    match kind {
        CompressionKind::None => Arc::new(NoCompression),
        CompressionKind::Zstd => Arc::new(ZstdCodec::new(zstd_level)),
    }
}
