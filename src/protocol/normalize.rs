//! Normalization of raw transport payloads.
//!
//! Some driver bridges deliver a read buffer as its decimal rendering
//! (`"13,123,34,..."`) instead of the bytes themselves. Everything entering the
//! receive buffer passes through [`normalize`] first so the decoder only ever
//! sees the real byte stream.

use once_cell::sync::Lazy;
use regex::Regex;

static BYTE_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(,\d+)*$").expect("byte list pattern is valid"));

/// A payload as handed over by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawChunk {
    /// Text, possibly a stringified byte list.
    Text(String),
    /// Bytes straight from the driver.
    Bytes(Vec<u8>),
    /// The string form of some other driver object.
    Object(String),
}

impl From<&str> for RawChunk {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<&[u8]> for RawChunk {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

/// A payload after normalization: the bytes of the device's text stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Text(Vec<u8>),
}

impl Normalized {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(bytes) => bytes,
        }
    }
}

/// Convert any [`RawChunk`] into text bytes.
///
/// Byte chunks are taken as-is. Text and object chunks that look like a
/// comma-separated list of byte values are converted back into those bytes.
pub fn normalize(chunk: RawChunk) -> Normalized {
    match chunk {
        RawChunk::Bytes(bytes) => Normalized::Text(bytes),
        RawChunk::Text(text) | RawChunk::Object(text) => {
            Normalized::Text(decode_byte_list(&text).unwrap_or_else(|| text.into_bytes()))
        }
    }
}

/// Parse `"13,123,125"` into `[13, 123, 125]`.
///
/// Returns `None` when the text is not a byte list or a value exceeds 255.
pub fn decode_byte_list(text: &str) -> Option<Vec<u8>> {
    if !BYTE_LIST.is_match(text) {
        return None;
    }
    text.split(',').map(|value| value.parse::<u8>().ok()).collect()
}
