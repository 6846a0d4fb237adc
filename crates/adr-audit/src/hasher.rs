// hasher.rs — SHA-256 hashing utilities.
//
// All hashes in the action log are SHA-256, hex-encoded (64 lowercase
// characters). The chain link is H(payload || previous_hash).

use sha2::{Digest, Sha256};

/// Hash arbitrary bytes, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash a UTF-8 string.
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Compute a chain link: the hash of an entry payload followed by the
/// previous entry's hash. The first entry links to the empty string.
pub fn chain_hash(payload: &[u8], previous_hash: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.update(previous_hash.unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}
