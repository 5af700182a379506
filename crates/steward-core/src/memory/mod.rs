//! Tiered memory for downstream analysis.
//!
//! - short-term: TTL key/value cache ([`ShortTermBackend`])
//! - long-term: deduplicated, capped insight store ([`LongTermBackend`])
//! - episodic: bounded per-namespace history kept in process
//!
//! [`MemoryManager`] composes the tiers and degrades to "skipped" whenever a
//! backend is missing or failing. [`AiContext`] is the only read surface
//! handed to AI consumers.

pub mod backend;
pub mod context;
pub mod episodic;
pub mod fingerprint;
pub mod manager;
pub mod summarize;

pub use backend::{LongTermBackend, ShortTermBackend};
pub use context::{AiContext, EpisodicDigest, InsightDigest};
pub use episodic::EpisodicLog;
pub use fingerprint::{ContentHasher, canonical_json, fingerprint};
pub use manager::MemoryManager;
pub use summarize::Summarizer;
