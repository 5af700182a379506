//! Payload summarization and raw-payload detection.
//!
//! Summaries keep the shape of a payload without its bulk: nested arrays and
//! objects collapse to a size description and long strings are truncated.
//! Denylisted fields (raw, unprocessed payloads) never survive
//! summarization.

use serde_json::{Map, Value};
use steward_types::config::MemoryConfig;

/// Field name used when summarizing a non-object value.
const SCALAR_FIELD: &str = "value";

#[derive(Debug, Clone)]
pub struct Summarizer {
    max_chars: usize,
    denylist: Vec<String>,
}

impl Summarizer {
    pub fn new(max_chars: usize, denylist: Vec<String>) -> Self {
        Self {
            max_chars,
            denylist,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.summary_max_chars, config.raw_payload_denylist.clone())
    }

    pub fn is_denylisted(&self, field: &str) -> bool {
        self.denylist.iter().any(|name| name == field)
    }

    /// Whether `value` embeds a denylisted field at any depth.
    pub fn contains_denylisted(&self, value: &Value) -> bool {
        match value {
            Value::Object(map) => map
                .iter()
                .any(|(key, inner)| self.is_denylisted(key) || self.contains_denylisted(inner)),
            Value::Array(items) => items.iter().any(|item| self.contains_denylisted(item)),
            _ => false,
        }
    }

    /// One-level summary of a payload.
    ///
    /// Objects are summarized field by field with denylisted fields dropped.
    /// Any other value is summarized under a single `"value"` field.
    pub fn summarize(&self, value: &Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map
                .iter()
                .filter(|(key, _)| !self.is_denylisted(key))
                .map(|(key, inner)| (key.clone(), self.summarize_field(inner)))
                .collect(),
            Value::Null => Map::new(),
            other => {
                let mut summary = Map::new();
                summary.insert(SCALAR_FIELD.to_string(), self.summarize_field(other));
                summary
            }
        }
    }

    /// Top-level field names that survive summarization.
    pub fn field_names(&self, value: &Value) -> Vec<String> {
        match value {
            Value::Object(map) => map
                .keys()
                .filter(|key| !self.is_denylisted(key))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    fn summarize_field(&self, value: &Value) -> Value {
        match value {
            Value::Array(items) => Value::String(format!("List with {} items", items.len())),
            Value::Object(map) => Value::String(format!("Dict with {} keys", map.len())),
            Value::String(text) if text.chars().count() > self.max_chars => {
                let truncated: String = text.chars().take(self.max_chars).collect();
                Value::String(format!("{truncated}..."))
            }
            other => other.clone(),
        }
    }
}

impl Default for Summarizer {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}
