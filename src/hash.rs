//! Content digests for the audit trail.

use sha2::{Digest as _, Sha256};

/// Hex encoded SHA-256 of a byte buffer.
pub type Digest = String;

/// Compute the SHA-256 digest of `content`, returning 64 lowercase hex chars.
pub fn digest(content: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
