//! Whitespace-insensitive content digests.
//!
//! Anchors survive reformatting because every whitespace character is
//! removed before hashing; any other edit changes the digest.

use sha2::{Digest, Sha256};

/// SHA-256 of `raw` with all whitespace removed, as lowercase hex.
#[must_use]
pub fn content_digest(raw: &str) -> String {
    let normalized = raw.chars().filter(|ch| !ch.is_whitespace()).collect::<String>();
    sha256_hex(normalized.as_bytes())
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Digest of an ordered list of fields. Each field is length-prefixed so
/// `("a|b", "c")` and `("a", "b|c")` never collide.
#[must_use]
pub fn fingerprint(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(u64::try_from(field.len()).unwrap_or(u64::MAX).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}
