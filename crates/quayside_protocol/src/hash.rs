//! Content hashing helpers.
//!
//! All file hashes on the desk are SHA-256 over the raw source bytes,
//! rendered hex-lowercase. The same digest feeds the per-contract version
//! chain (`previous_hash`) and the persist log's frame chain.

use sha2::{Digest, Sha256};

/// SHA-256 of `bytes`, hex-lowercase.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Raw SHA-256 digest of `prev || payload`, for hash-chain links.
pub fn chain_digest(prev: &[u8], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev);
    hasher.update(payload);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(sha256_hex(b"abc").len(), 64);
    }

    #[test]
    fn test_chain_digest_depends_on_prev() {
        let a = chain_digest(b"", b"payload");
        let b = chain_digest(&a, b"payload");
        assert_ne!(a, b);
        assert_eq!(a, chain_digest(b"", b"payload"));
    }
}
