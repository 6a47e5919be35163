//! Canonical JSON hashing for config and dataset-spec deduplication.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value with sorted object keys and nulls stripped, so
/// equal specs hash equally regardless of field order or explicit nulls.
pub fn canonical_json(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, _)| k)
                    .collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(key).expect("string encodes"));
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }
    let mut out = String::new();
    write(value, &mut out);
    out
}

/// Stable 16-hex-char hash of a JSON value under canonical encoding.
pub fn stable_hash(value: &Value) -> String {
    let canonical = canonical_json(value);
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_the_hash() {
        let a = json!({"b": 1, "a": [1, 2], "c": {"y": 2, "x": 1}});
        let b = json!({"c": {"x": 1, "y": 2}, "a": [1, 2], "b": 1});
        assert_eq!(stable_hash(&a), stable_hash(&b));
    }

    #[test]
    fn nulls_are_stripped() {
        let a = json!({"a": 1, "b": null});
        let b = json!({"a": 1});
        assert_eq!(stable_hash(&a), stable_hash(&b));
    }

    #[test]
    fn different_values_hash_differently() {
        assert_ne!(stable_hash(&json!({"a": 1})), stable_hash(&json!({"a": 2})));
    }
}
