use crate::error::SyncError;
use crate::message::{RawPayload, SyncMessage};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::io::{Read, Write};
use thiserror::Error;

const BZIP2_MAGIC: &[u8] = b"BZh";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    #[default]
    Bzip2,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("compression: {0}")]
    Compression(std::io::Error),
    #[error("decompression: {0}")]
    Decompression(std::io::Error),
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("expected a base64 string under {0:?}")]
    NotAString(String),
}

impl From<CodecError> for SyncError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Compression(_) => SyncError::CompressionFailed(err.to_string()),
            other => SyncError::EncodingFailed(other.to_string()),
        }
    }
}

/// Frames typed messages as `{ kind_key: base64(body) }`, where the body is
/// JSON optionally wrapped in a bzip2 stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Codec {
    compression: Compression,
    level: u32,
}

impl Default for Codec {
    fn default() -> Self {
        Self { compression: Compression::Bzip2, level: 9 }
    }
}

impl Codec {
    pub fn new(compression: Compression, level: u32) -> Self {
        Self { compression, level: level.clamp(1, 9) }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn encode<T: SyncMessage>(&self, message: &T) -> Result<RawPayload, CodecError> {
        let json = serde_json::to_vec(message)?;
        let body = match self.compression {
            Compression::None => json,
            Compression::Bzip2 => {
                let mut encoder =
                    BzEncoder::new(Vec::new(), bzip2::Compression::new(self.level));
                encoder.write_all(&json).map_err(CodecError::Compression)?;
                encoder.finish().map_err(CodecError::Compression)?
            }
        };
        let mut payload = RawPayload::new();
        payload.insert(T::kind_key(), JsonValue::String(BASE64_STANDARD.encode(body)));
        Ok(payload)
    }

    /// Decodes the entry stored under `key`. Compressed and plain bodies are
    /// both accepted regardless of this codec's own compression setting.
    pub fn decode_entry<T: SyncMessage>(key: &str, value: &JsonValue) -> Result<T, CodecError> {
        let text = value.as_str().ok_or_else(|| CodecError::NotAString(key.to_owned()))?;
        let bytes = BASE64_STANDARD.decode(text)?;
        let json = if bytes.starts_with(BZIP2_MAGIC) {
            let mut decoder = BzDecoder::new(bytes.as_slice());
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed).map_err(CodecError::Decompression)?;
            decompressed
        } else {
            bytes
        };
        Ok(serde_json::from_slice(&json)?)
    }
}
