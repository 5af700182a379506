//! Infrastructure layer for Steward.
//!
//! Contains implementations of the ports defined in `steward-core`: SQLite
//! storage for long-term memory and the retry queue, a file-per-operation
//! retry store, short-term caches (in-process and Redis), SHA-256 content
//! hashing and the configuration loader.

pub mod cache;
pub mod config;
pub mod crypto;
pub mod filesystem;
pub mod sqlite;
