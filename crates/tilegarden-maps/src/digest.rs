// Content hashing for certificates and template fingerprints.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Computes the SHA-256 hash of the input bytes as a lowercase hex string.
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Content hash of a value's canonical (RFC 8785) JSON form.
///
/// Stable for identical content regardless of field order; changes
/// whenever any field, however nested, changes.
pub(crate) fn content_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = serde_jcs::to_string(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}
