//! Canonical JSON: object keys sorted recursively, no insignificant whitespace.
//!
//! Used wherever a hash or a signature is computed over structured data, so
//! the result does not depend on field insertion order.

use serde_json::{Map, Value};

/// Return `value` with every object's keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compact canonical serialization of `value`.
pub fn to_canonical_string(value: &Value) -> String {
    // Value serialization cannot fail: keys are strings and floats are finite.
    canonicalize(value).to_string()
}
