//! On-disk text encoding detection and faithful re-encoding.
//!
//! Four families are recognized: plain UTF-8, UTF-8 with a byte-order mark,
//! UTF-16LE and UTF-16BE. Detection looks only at bytes, never at any
//! in-memory representation, so a runtime file saved as UTF-16 by an
//! external tool gets its mirror written as UTF-16 too.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Bytes inspected by the NUL-density heuristic.
pub const NUL_SAMPLE_BYTES: usize = 4096;

/// More NUL bytes than this within the sample means "probably UTF-16LE".
pub const NUL_THRESHOLD: usize = 50;

const BOM_UTF8: [u8; 3] = [0xEF, 0xBB, 0xBF];
const BOM_UTF16_LE: [u8; 2] = [0xFF, 0xFE];
const BOM_UTF16_BE: [u8; 2] = [0xFE, 0xFF];

/// Encoding family of a file on disk.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEncoding {
    /// UTF-8 without a byte-order mark.
    Utf8,
    /// UTF-8 prefixed with `EF BB BF`.
    Utf8Bom,
    /// UTF-16 little-endian (`FF FE` when written by us).
    Utf16Le,
    /// UTF-16 big-endian (`FE FF`).
    Utf16Be,
}

impl FileEncoding {
    /// Short label used in log lines and audit records.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf8",
            Self::Utf8Bom => "utf8bom",
            Self::Utf16Le => "utf16le",
            Self::Utf16Be => "utf16be",
        }
    }
}

impl std::fmt::Display for FileEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors from [`decode`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("UTF-16 payload has odd byte length {len}")]
    OddLength { len: usize },

    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("invalid UTF-16: {0}")]
    InvalidUtf16(#[from] std::string::FromUtf16Error),
}

/// Text recovered from disk together with the family it was stored in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Decoded {
    pub encoding: FileEncoding,
    pub text: String,
}

/// Sniff the encoding family of raw file bytes.
pub fn detect(bytes: &[u8]) -> FileEncoding {
    if bytes.starts_with(&BOM_UTF16_LE) {
        return FileEncoding::Utf16Le;
    }
    if bytes.starts_with(&BOM_UTF16_BE) {
        return FileEncoding::Utf16Be;
    }
    if bytes.starts_with(&BOM_UTF8) {
        return FileEncoding::Utf8Bom;
    }

    let sample = &bytes[..bytes.len().min(NUL_SAMPLE_BYTES)];
    let nul_count = sample.iter().filter(|b| **b == 0).count();
    if nul_count > NUL_THRESHOLD {
        return FileEncoding::Utf16Le;
    }

    FileEncoding::Utf8
}

/// Detect the encoding of a file on disk.
///
/// An unreadable file is reported as plain UTF-8 so that a mirror can still
/// be produced for a runtime file that vanished between save and read.
pub async fn detect_file(path: &Path) -> FileEncoding {
    match tokio::fs::read(path).await {
        Ok(bytes) => detect(&bytes),
        Err(e) => {
            tracing::debug!("Encoding probe failed for {}: {e}", path.display());
            FileEncoding::Utf8
        }
    }
}

/// Encode `text` in the given family, byte-order mark included.
pub fn encode(text: &str, encoding: FileEncoding) -> Vec<u8> {
    match encoding {
        FileEncoding::Utf8 => text.as_bytes().to_vec(),
        FileEncoding::Utf8Bom => {
            let mut out = Vec::with_capacity(BOM_UTF8.len() + text.len());
            out.extend_from_slice(&BOM_UTF8);
            out.extend_from_slice(text.as_bytes());
            out
        }
        FileEncoding::Utf16Le => {
            let mut out = BOM_UTF16_LE.to_vec();
            out.extend(utf16_le_bytes(text));
            out
        }
        FileEncoding::Utf16Be => {
            let mut out = BOM_UTF16_BE.to_vec();
            out.extend(swap_utf16_byte_order(&utf16_le_bytes(text)));
            out
        }
    }
}

/// Decode raw file bytes, stripping any byte-order mark.
pub fn decode(bytes: &[u8]) -> std::result::Result<Decoded, DecodeError> {
    let encoding = detect(bytes);
    let text = match encoding {
        FileEncoding::Utf8 => String::from_utf8(bytes.to_vec())?,
        FileEncoding::Utf8Bom => String::from_utf8(bytes[BOM_UTF8.len()..].to_vec())?,
        FileEncoding::Utf16Le => {
            let body = bytes.strip_prefix(&BOM_UTF16_LE).unwrap_or(bytes);
            decode_utf16(body, u16::from_le_bytes)?
        }
        FileEncoding::Utf16Be => decode_utf16(&bytes[BOM_UTF16_BE.len()..], u16::from_be_bytes)?,
    };
    Ok(Decoded { encoding, text })
}

fn utf16_le_bytes(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Swap each adjacent byte pair, turning UTF-16LE bytes into UTF-16BE.
fn swap_utf16_byte_order(le: &[u8]) -> Vec<u8> {
    le.chunks_exact(2).flat_map(|pair| [pair[1], pair[0]]).collect()
}

fn decode_utf16(
    body: &[u8],
    unit: fn([u8; 2]) -> u16,
) -> std::result::Result<String, DecodeError> {
    if body.len() % 2 != 0 {
        return Err(DecodeError::OddLength { len: body.len() });
    }
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    Ok(String::from_utf16(&units)?)
}

#[cfg(test)]
mod codec_property_tests;
