//! Versioned content fingerprints for long-term deduplication.
//!
//! A fingerprint is `{version}:{hex}` where the hash is taken over the
//! canonical JSON form of a value: object keys sorted at every depth, no
//! insignificant whitespace. Two values that differ only in key order share a
//! fingerprint.

use serde_json::Value;

/// Abstraction over content hashing.
///
/// Defined here so memory code can fingerprint values without coupling to a
/// specific algorithm. The `Sha256ContentHasher` adapter lives in
/// steward-infra.
pub trait ContentHasher: Send + Sync {
    /// Compute a hex-encoded hash of the given content.
    fn compute_hash(&self, content: &str) -> String;

    /// Version prefix identifying the algorithm, e.g. `"v1"`.
    fn version_tag(&self) -> &str;
}

/// Canonical JSON serialization with recursively sorted object keys.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Fingerprint a value: `{version_tag}:{hash(canonical_json(value))}`.
pub fn fingerprint(hasher: &dyn ContentHasher, value: &Value) -> String {
    format!(
        "{}:{}",
        hasher.version_tag(),
        hasher.compute_hash(&canonical_json(value))
    )
}

/// The hash part of a fingerprint (everything after the version prefix).
pub fn fingerprint_digest(fingerprint: &str) -> &str {
    fingerprint
        .split_once(':')
        .map_or(fingerprint, |(_, digest)| digest)
}
