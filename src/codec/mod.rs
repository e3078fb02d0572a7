//! Serialization strategies and optional compression (C1).
//!
//! Encoding is fixed for the lifetime of a `Cache`: `serializer` and
//! `compress` are recorded at configuration time and stamped into
//! snapshots (§4.1). Mixing strategies across a warm-boot load is rejected.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json encode failed: {0}")]
    JsonEncode(#[source] serde_json::Error),
    #[error("json decode failed: {0}")]
    JsonDecode(#[source] serde_json::Error),
    #[error("binary encode failed: {0}")]
    BinaryEncode(#[source] bincode::Error),
    #[error("binary decode failed: {0}")]
    BinaryDecode(#[source] bincode::Error),
    #[error("fast-json encode failed: {0}")]
    FastJsonEncode(String),
    #[error("fast-json decode failed: {0}")]
    FastJsonDecode(String),
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),
    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
}

/// Selectable serialization strategy, persisted as a stable identifier in
/// snapshots (§4.1, §9 "Polymorphic serializer").
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Serializer {
    Json,
    Binary,
    FastJson,
}

impl Default for Serializer {
    fn default() -> Self {
        Serializer::Json
    }
}

impl std::fmt::Display for Serializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Serializer::Json => "json",
            Serializer::Binary => "binary",
            Serializer::FastJson => "fast-json",
        };
        f.write_str(s)
    }
}

/// Fixed-for-lifetime codec: a serialization strategy plus an optional
/// deflate compression step.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    pub serializer: Serializer,
    pub compress: bool,
}

impl Codec {
    pub fn new(serializer: Serializer, compress: bool) -> Self {
        Self {
            serializer,
            compress,
        }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let raw = match self.serializer {
            Serializer::Json => {
                serde_json::to_vec(value).map_err(CodecError::JsonEncode)?
            }
            Serializer::Binary => {
                bincode::serialize(value).map_err(CodecError::BinaryEncode)?
            }
            Serializer::FastJson => sonic_rs::to_vec(value)
                .map_err(|e| CodecError::FastJsonEncode(e.to_string()))?,
        };

        if self.compress {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&raw).map_err(CodecError::Compress)?;
            encoder.finish().map_err(CodecError::Compress)
        } else {
            Ok(raw)
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let raw = if self.compress {
            let mut decoder = DeflateDecoder::new(bytes);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(CodecError::Decompress)?;
            out
        } else {
            bytes.to_vec()
        };

        match self.serializer {
            Serializer::Json => {
                serde_json::from_slice(&raw).map_err(CodecError::JsonDecode)
            }
            Serializer::Binary => {
                bincode::deserialize(&raw).map_err(CodecError::BinaryDecode)
            }
            Serializer::FastJson => sonic_rs::from_slice(&raw)
                .map_err(|e| CodecError::FastJsonDecode(e.to_string())),
        }
    }
}
