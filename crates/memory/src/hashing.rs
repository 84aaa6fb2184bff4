//! Content hashing for deduplication.
//!
//! Two texts that differ only in surrounding whitespace, internal whitespace
//! runs or letter case hash identically.

use sha2::{Digest, Sha256};

/// Trim, collapse whitespace runs to a single space, and case-fold.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lowercase hex SHA-256 of the normalized text.
pub fn content_hash(text: &str) -> String {
    sha256_hex(normalize(text).as_bytes())
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
