//! Canonical JSON
//!
//! Deterministic serialization of JSON value trees. Object keys are
//! emitted in sorted order, arrays keep their order, and primitives use
//! the compact JSON encoding. Two logically equal trees always produce
//! the same bytes, regardless of how their maps were populated or how a
//! storage backend reordered them.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Canonicalize a value tree into bytes.
pub fn canonicalize(value: &Value) -> Vec<u8> {
    canonical_string(value).into_bytes()
}

/// Canonicalize a value tree into a string.
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(&mut out, value);
    out
}

/// Canonicalize any serializable value by first lowering it to a JSON tree.
pub fn canonicalize_serializable<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let tree = serde_json::to_value(value)?;
    Ok(canonicalize(&tree))
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_key(out, key);
                out.push(':');
                write_canonical(out, field);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        // Display on a primitive Value is its compact JSON encoding
        primitive => out.push_str(&primitive.to_string()),
    }
}

pub(crate) fn write_key(out: &mut String, key: &str) {
    out.push_str(&Value::from(key).to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn test_object_keys_are_sorted() {
        let value = json!({"zebra": "last", "apple": "first", "middle": 2});
        assert_eq!(
            canonical_string(&value),
            r#"{"apple":"first","middle":2,"zebra":"last"}"#
        );
    }

    #[test]
    fn test_array_order_is_preserved() {
        let value = json!([3, 1, 2, {"b": true, "a": null}]);
        assert_eq!(canonical_string(&value), r#"[3,1,2,{"a":null,"b":true}]"#);
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let mut first = Map::new();
        first.insert("z".to_string(), json!(3));
        first.insert("a".to_string(), json!(1));
        first.insert("nested".to_string(), json!({"y": [1, 2], "b": "x"}));

        let mut second = Map::new();
        second.insert("nested".to_string(), json!({"b": "x", "y": [1, 2]}));
        second.insert("a".to_string(), json!(1));
        second.insert("z".to_string(), json!(3));

        assert_eq!(
            canonicalize(&Value::Object(first)),
            canonicalize(&Value::Object(second))
        );
    }

    #[test]
    fn test_primitives_use_minimal_encoding() {
        assert_eq!(canonical_string(&json!(null)), "null");
        assert_eq!(canonical_string(&json!(false)), "false");
        assert_eq!(canonical_string(&json!(42)), "42");
        assert_eq!(canonical_string(&json!(-1.5)), "-1.5");
        assert_eq!(canonical_string(&json!("a \"quoted\"\n")), r#""a \"quoted\"\n""#);
    }

    #[test]
    fn test_deep_nesting() {
        let mut value = json!("leaf");
        for i in 0..64 {
            let mut map = Map::new();
            map.insert(format!("k{}", i), Value::Array(vec![value]));
            value = Value::Object(map);
        }
        let out = canonical_string(&value);
        assert!(out.starts_with(r#"{"k63":[{"k62":"#));
        assert!(out.contains(r#""leaf""#));
    }

    #[test]
    fn test_canonicalize_serializable() {
        #[derive(Serialize)]
        struct Proof {
            zeta: u32,
            alpha: &'static str,
        }

        let bytes = canonicalize_serializable(&Proof { zeta: 1, alpha: "a" }).unwrap();
        assert_eq!(bytes, br#"{"alpha":"a","zeta":1}"#.to_vec());
    }
}
