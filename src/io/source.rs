//! Where the CSV bytes come from.
//!
//! The engine reads either a file on disk or an in-memory buffer. Inline
//! payloads arrive as strings that are either raw CSV text or base64; URLs are
//! recognised but not fetched.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{DoeError, Result};

#[derive(Debug, Clone)]
pub enum CsvSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl CsvSource {
    /// Build a source from an inline payload string (see [`decode_payload`]).
    pub fn from_payload(payload: &str) -> Result<Self> {
        decode_payload(payload).map(CsvSource::Bytes)
    }

    pub fn describe(&self) -> String {
        match self {
            CsvSource::Path(p) => p.display().to_string(),
            CsvSource::Bytes(b) => format!("<inline, {} bytes>", b.len()),
        }
    }

    pub(crate) fn reader(&self) -> Result<Box<dyn Read + '_>> {
        match self {
            CsvSource::Path(path) => {
                let file = File::open(path).map_err(|e| DoeError::io_at("Failed to open CSV", path, e))?;
                Ok(Box::new(file))
            }
            CsvSource::Bytes(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
        }
    }
}

/// Turn an inline payload into CSV bytes.
///
/// - `http...` → rejected (remote inputs are not fetched)
/// - `data:...;base64,<body>` → the body, base64-decoded
/// - text containing both `,` and a newline → raw CSV
/// - anything else → standard base64
///
/// Base64 may be wrapped over several lines.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    let trimmed = payload.trim();
    if trimmed.starts_with("http") {
        return Err(DoeError::Input(
            "URL data input is not supported; send base64-encoded or raw CSV".to_string(),
        ));
    }
    if let Some(uri) = trimmed.strip_prefix("data:") {
        let body = uri
            .split_once(',')
            .map(|(_, b)| b)
            .ok_or_else(|| DoeError::Input("data URI has no `,` before its payload".to_string()))?;
        return decode_base64(body);
    }
    if trimmed.contains(',') && trimmed.contains('\n') {
        return Ok(payload.as_bytes().to_vec());
    }
    decode_base64(trimmed)
}

fn decode_base64(body: &str) -> Result<Vec<u8>> {
    // Base64 is commonly wrapped at 76 columns.
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| DoeError::Input(format!("invalid base64 data: {e}")))
}
