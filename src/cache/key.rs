//! Deterministic cache keys.
//!
//! ```text
//! key = operation ":" hex(SHA256(operation "\n" canonical_json(params)))
//! ```
//!
//! Canonical JSON sorts object keys at every depth and has no insignificant
//! whitespace, so the same parameter set always produces the same key
//! regardless of the order the client sent the fields in.

use serde_json::Value;
use sha2::{Digest, Sha256};

pub fn cache_key(operation: &str, params: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(params, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical.as_bytes());

    format!("{}:{:x}", operation, hasher.finalize())
}

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
                write_canonical(&map[key.as_str()], out);
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
