//! Content hashing for cache keys and config identity.
//!
//! [`stable_json_hash`] canonicalizes a JSON value by recursively sorting all
//! object keys before serialization, so structurally equal values always hash
//! identically regardless of field declaration or insertion order. Used for
//! the LLM response cache, embedding identity, and pipeline-config hashes.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 of raw bytes, hex-encoded.
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Hash of the canonical (recursively key-sorted) JSON form of a value.
pub fn stable_json_hash<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_value(value).expect("value must serialize to JSON");
    let canonical = canonicalize(json);
    let text = serde_json::to_string(&canonical).expect("canonical JSON must serialize");
    sha256_hex(text.as_bytes())
}

/// Rebuild a JSON value with every object's keys in sorted order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
