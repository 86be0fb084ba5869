use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::errors::SyncError;
use crate::types::ContentHash;

/// SHA-256 hex digest of `value`'s canonical JSON form.
///
/// Object keys are sorted and every array is treated as an unordered multiset,
/// so reordering list entries never changes the digest.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<ContentHash, SyncError> {
    let value = serde_json::to_value(value)?;
    let canonical = canonical_text(&canonicalize(value));
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, value);
            }
            Value::Object(sorted)
        }
        Value::Array(items) => {
            let mut items: Vec<(String, Value)> = items
                .into_iter()
                .map(canonicalize)
                .map(|item| (canonical_text(&item), item))
                .collect();
            items.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Array(items.into_iter().map(|(_, item)| item).collect())
        }
        other => other,
    }
}

fn canonical_text(value: &Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn digest_ignores_key_and_array_order() {
        let a = json!({"b": 1, "a": [{"y": 2, "x": 1}, {"x": 3}]});
        let b = json!({"a": [{"x": 3}, {"x": 1, "y": 2}], "b": 1});
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn digest_tracks_value_changes() {
        let a = json!({"status": "Authorised"});
        let b = json!({"status": "Cancelled"});
        assert_ne!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
        assert_eq!(content_hash(&a).unwrap().len(), 64);
    }

    #[test]
    fn nested_arrays_are_unordered_too() {
        let a = json!([[1, 2], [3]]);
        let b = json!([[3], [2, 1]]);
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }
}
