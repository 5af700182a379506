//! SHA-256 content hashing for long-term memory fingerprints.
//!
//! Implements the `ContentHasher` trait from `steward-core` using the
//! `sha2` crate (RustCrypto ecosystem).

use sha2::{Digest, Sha256};

use steward_core::memory::ContentHasher;

/// Version tag written in front of every SHA-256 fingerprint.
pub const SHA256_VERSION_TAG: &str = "v1";

/// SHA-256 implementation of `ContentHasher`.
///
/// Computes lowercase hex-encoded SHA-256 digests of content strings.
#[derive(Debug, Clone, Copy)]
pub struct Sha256ContentHasher;

impl Sha256ContentHasher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Sha256ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHasher for Sha256ContentHasher {
    fn compute_hash(&self, content: &str) -> String {
        let digest = Sha256::digest(content.as_bytes());
        format!("{:x}", digest)
    }

    fn version_tag(&self) -> &str {
        SHA256_VERSION_TAG
    }
}
