//! Canonical JSON
//!
//! Deterministic serialization for everything that gets hashed or signed:
//! object keys in lexicographic order, compact separators, recursive.
//! Two semantically equal payloads always canonicalize to identical bytes.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors from canonicalization
#[derive(Error, Debug)]
pub enum CanonError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Canonicalize an already-parsed JSON value.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Serialize any value to its canonical JSON string.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let value = serde_json::to_value(value)?;
    Ok(canonical_json(&value))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Object keys are strings; serde_json escaping is canonical here.
                out.push_str(&serde_json::to_string(key).expect("string key serializes"));
                out.push(':');
                write_canonical(&map[*key], out);
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
        scalar => {
            out.push_str(&serde_json::to_string(scalar).expect("scalar serializes"));
        }
    }
}
