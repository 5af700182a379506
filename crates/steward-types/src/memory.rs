//! Memory types for Steward.
//!
//! Three tiers share one conceptual shape (namespace, key, JSON value,
//! provenance): short-term entries expire via TTL, long-term entries are
//! deduplicated by fingerprint and evicted FIFO per namespace, and episodic
//! entries form a bounded per-namespace history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Memory type used for curated insights in long-term storage.
pub const INSIGHT_MEMORY_TYPE: &str = "insight";

/// A curated long-term memory as stored by a long-term backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermEntry {
    pub namespace: String,
    pub memory_type: String,
    /// Logical key supplied by the caller.
    pub key: String,
    /// Unique storage key: `{key}_{fingerprint-hex}`.
    pub storage_key: String,
    /// Versioned content fingerprint, e.g. `v1:<sha256-hex>`.
    pub fingerprint: String,
    pub value: Value,
    /// Analysis that produced this memory, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_analysis: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a long-term write. Long-term writes never fail the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LongTermWrite {
    /// A new record was written.
    Stored,
    /// An identical value already exists in the namespace.
    Duplicate,
    /// The value embeds a denylisted raw-payload field.
    Rejected,
    /// The backend is unavailable or failed; nothing was written.
    Skipped,
}

/// One entry of a namespace's episodic history.
///
/// Inputs and outputs are summarized before storage; raw payloads are never
/// retained here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicEntry {
    pub timestamp: DateTime<Utc>,
    /// Kind of task or analysis that produced the entry.
    pub kind: String,
    pub input_summary: Map<String, Value>,
    pub output_summary: Map<String, Value>,
    pub insights: Vec<String>,
    pub input_keys: Vec<String>,
    pub output_keys: Vec<String>,
}

/// Availability of the external memory backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryHealth {
    pub short_term: bool,
    pub long_term: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_term_write_serde() {
        let json = serde_json::to_string(&LongTermWrite::Duplicate).unwrap();
        assert_eq!(json, "\"duplicate\"");
    }

    #[test]
    fn test_long_term_entry_omits_missing_source() {
        let entry = LongTermEntry {
            namespace: "client-a".to_string(),
            memory_type: INSIGHT_MEMORY_TYPE.to_string(),
            key: "pricing".to_string(),
            storage_key: "pricing_abc".to_string(),
            fingerprint: "v1:abc".to_string(),
            value: serde_json::json!({"trend": "up"}),
            source_analysis: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("source_analysis").is_none());
        assert_eq!(json["memory_type"], "insight");
    }
}
