//! Report payload compression.
//!
//! Raw report documents are stored zstd-compressed in `reportdata`. The
//! store never inspects payload bytes; decompression only happens when a
//! caller asks for the raw document.

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Compress a raw report body.
pub fn compress(body: &[u8], level: i32) -> Result<Vec<u8>> {
    Ok(zstd::encode_all(body, level)?)
}

/// Decompress a stored payload back into the raw report body.
pub fn decompress(payload: &[u8]) -> Result<Vec<u8>> {
    Ok(zstd::decode_all(payload)?)
}

/// Hex SHA-256 of a payload, used to identify stored bytes in listings.
pub fn digest(payload: &[u8]) -> String {
    format!("{:x}", Sha256::digest(payload))
}
