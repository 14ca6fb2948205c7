//! Base64 transport of image bytes.

use crate::error::{Result, SdError};
use base64::{engine::general_purpose, Engine as _};
use std::fs;
use std::io;
use std::path::PathBuf;

/// Where the bytes of an outgoing image come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// An image file on disk, e.g. a render saved by the host.
    File(PathBuf),
    /// Encoded image bytes (PNG) held in memory.
    Bytes(Vec<u8>),
    /// Already base64 encoded; sent as is.
    Base64(String),
}

impl ImageSource {
    pub fn to_base64(&self) -> Result<String> {
        match self {
            ImageSource::File(path) => {
                let bytes = fs::read(path).map_err(|e| {
                    SdError::Io(io::Error::new(
                        e.kind(),
                        format!("couldn't read image {}: {}", path.display(), e),
                    ))
                })?;
                Ok(encode_base64(&bytes))
            }
            ImageSource::Bytes(bytes) => Ok(encode_base64(bytes)),
            ImageSource::Base64(data) => Ok(data.clone()),
        }
    }
}

pub fn encode_base64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

/// Drops a leading `data:<mime>;base64,` prefix if there is one.
pub fn strip_data_uri(data: &str) -> &str {
    let trimmed = data.trim();
    if trimmed.starts_with("data:") {
        if let Some(idx) = trimmed.find(";base64,") {
            return &trimmed[idx + ";base64,".len()..];
        }
    }
    trimmed
}

/// Decodes a server image, tolerating a data-URI prefix and missing padding.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let payload = strip_data_uri(data);
    let mut padded = payload.to_string();
    let remainder = padded.len() % 4;
    if remainder != 0 {
        padded.push_str(&"=".repeat(4 - remainder));
    }
    general_purpose::STANDARD
        .decode(padded.as_bytes())
        .map_err(|e| SdError::Decode(format!("invalid base64 image: {}", e)))
}

// 1x1 transparent PNG.
#[cfg(test)]
pub(crate) const SAMPLE_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];
