use sha2::{Digest, Sha256};

/// One-way digest used for room password gating: SHA-256 of the plaintext
/// as a lowercase hex string (64 chars).
///
/// Verification is plain equality of digests — this gates room entry, it is
/// not a secrecy boundary (the plaintext transits to the client anyway), so
/// no salt or slow KDF is involved.
pub fn digest(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}
