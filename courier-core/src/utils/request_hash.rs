//! Fingerprint of a request body for the idempotency ledger.

use fast32::base64::RFC4648_NOPAD;
use ring::digest::{SHA256, digest};
use serde_json::Value;

/// SHA-256 over the canonical JSON form of `body`, base64 without padding.
///
/// Canonical means object keys sorted at every depth, so two bodies that
/// differ only in key order hash the same.
pub fn request_hash(body: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(body, &mut canonical);
    RFC4648_NOPAD.encode(digest(&SHA256, canonical.as_bytes()).as_ref())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": null}});
        let b = json!({"a": {"x": null, "y": [1, 2]}, "b": 1});
        assert_eq!(request_hash(&a), request_hash(&b));
    }

    #[test]
    fn test_different_bodies_differ() {
        assert_ne!(
            request_hash(&json!({"limit": 1})),
            request_hash(&json!({"limit": 2}))
        );
        assert_ne!(request_hash(&json!([1, 2])), request_hash(&json!([2, 1])));
    }

    #[test]
    fn test_hash_is_unpadded_base64_of_sha256() {
        let hash = request_hash(&json!({}));
        // 32 bytes -> 43 base64 characters without padding
        assert_eq!(hash.len(), 43);
        assert!(!hash.ends_with('='));
    }
}
