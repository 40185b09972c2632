//! Chart content signatures
//!
//! Computes a stable content address for a chart's data payload. Two charts
//! with equal data always hash to the same signature, independent of key
//! insertion order and of the report or topic the chart appears in.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the content signature for a chart data payload.
///
/// **Algorithm:**
/// 1. Rewrite the structure with all object keys sorted recursively
///    (arrays keep their order, scalars pass through unchanged)
/// 2. Serialize to canonical compact JSON
/// 3. SHA-256, hex-encoded
///
/// Absent input normalizes to the empty object before hashing, so callers
/// never need to special-case charts without data.
pub fn chart_signature(chart_data: Option<&Value>) -> String {
    let mut canonical = String::new();
    match chart_data {
        Some(value) => write_canonical(value, &mut canonical),
        None => canonical.push_str("{}"),
    }

    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

/// Serialize a value to canonical JSON with recursively sorted object keys
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(key, _)| *key);

            out.push('{');
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json handles the string escaping
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(item, out);
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
    fn signature_is_a_sha256_hex_digest() {
        let sig = chart_signature(Some(&json!({"labels": ["Q1", "Q2"]})));
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_insertion_order_does_not_affect_signature() {
        let mut a = serde_json::Map::new();
        a.insert("type".to_string(), json!("bar"));
        a.insert("data".to_string(), json!({"labels": ["Q1"], "values": [42]}));

        let mut b = serde_json::Map::new();
        b.insert("data".to_string(), json!({"values": [42], "labels": ["Q1"]}));
        b.insert("type".to_string(), json!("bar"));

        assert_eq!(
            chart_signature(Some(&Value::Object(a))),
            chart_signature(Some(&Value::Object(b)))
        );
    }

    #[test]
    fn nested_key_order_is_canonicalized() {
        let a = json!({"outer": {"b": 1, "a": 2}});
        let b = json!({"outer": {"a": 2, "b": 1}});

        assert_eq!(chart_signature(Some(&a)), chart_signature(Some(&b)));
    }

    #[test]
    fn leaf_value_change_changes_signature() {
        let a = json!({"data": {"values": [1, 2, 3]}});
        let b = json!({"data": {"values": [1, 2, 4]}});

        assert_ne!(chart_signature(Some(&a)), chart_signature(Some(&b)));
    }

    #[test]
    fn array_order_is_significant() {
        let a = json!({"values": [1, 2]});
        let b = json!({"values": [2, 1]});

        assert_ne!(chart_signature(Some(&a)), chart_signature(Some(&b)));
    }

    #[test]
    fn absent_data_normalizes_to_empty_object() {
        assert_eq!(chart_signature(None), chart_signature(Some(&json!({}))));
    }

    #[test]
    fn agrees_with_sha256_of_canonical_text() {
        // Hash-algorithm agreement: the digest of the empty payload is the
        // digest of its canonical serialization.
        let expected = format!("{:x}", Sha256::digest(b"{}"));
        assert_eq!(chart_signature(None), expected);
    }

    #[test]
    fn string_keys_and_values_are_escaped() {
        let a = json!({"la\"bel": "va\nlue"});
        let b = json!({"la\"bel": "va\nlue"});

        assert_eq!(chart_signature(Some(&a)), chart_signature(Some(&b)));
        assert_ne!(chart_signature(Some(&a)), chart_signature(Some(&json!({}))));
    }
}
