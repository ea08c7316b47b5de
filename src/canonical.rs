//! Canonical JSON form for change hashing.
//!
//! Two records that differ only in key order or in the `$text` wrapper the
//! XML parser adds around attributed elements must hash identically. The
//! canonical form strips those representation artifacts, and `serialize`
//! renders it with sorted keys and no insignificant whitespace so equal
//! forms produce equal bytes.

use serde_json::Value;

/// Key under which element text is stored when attributes forced the
/// element to parse as an object.
pub const TEXT_KEY: &str = "$text";

/// Reduce a value to canonical form.
///
/// A single-entry `{"$text": v}` object collapses to the normalized `v`;
/// other objects keep their entries with each value normalized recursively.
/// Arrays normalize element-wise and keep their order. Scalars pass through
/// unchanged. Normalizing an already canonical value is a no-op.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(inner) = map.get(TEXT_KEY) {
                    return normalize(inner);
                }
            }
            Value::Object(map.iter().map(|(k, v)| (k.clone(), normalize(v))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        scalar => scalar.clone(),
    }
}

/// Serialize a value to its deterministic text representation.
///
/// Object keys are emitted in sorted order regardless of the underlying map
/// order; strings keep non-ASCII characters unescaped.
pub fn serialize(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, val);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
