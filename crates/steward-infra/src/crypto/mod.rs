//! Cryptographic operations for Steward.
//!
//! - `hash`: SHA-256 content hashing for long-term memory fingerprints

pub mod hash;
