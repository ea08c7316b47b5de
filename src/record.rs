//! Parsed feed records.
//!
//! A record is the JSON form of one feed item element. Field lookups go
//! through accessors that tolerate the shapes XML parsing produces: plain
//! text, `{"$text": ...}` wrappers around attributed elements, and arrays
//! where an element name repeated.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::TEXT_KEY;

/// One feed item, held as its parsed JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Value);

impl Record {
    pub fn new(value: Value) -> Self {
        Record(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Raw field lookup. `None` when the record is not an object or the
    /// field is absent.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.as_object()?.get(name)
    }

    /// Field as trimmed text, `None` when absent or blank.
    ///
    /// Unwraps `$text` wrappers, renders numbers and booleans, and takes the
    /// first element when the field parsed as an array.
    pub fn text(&self, name: &str) -> Option<String> {
        scalar_text(self.field(name)?)
    }

    /// First field among `names` that holds non-blank text, in order.
    pub fn text_any(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| self.text(name))
    }

    /// Child entries of a container field, flattened to a list.
    ///
    /// `children("attributes", "attribute")` returns every `attribute` value
    /// under the `attributes` field whether the feed produced one or many.
    pub fn children(&self, field: &str, child: &str) -> Vec<&Value> {
        match self.field(field).and_then(|v| v.get(child)) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single) => vec![single],
            None => Vec::new(),
        }
    }

    /// Derive the batch/snapshot key for this record.
    ///
    /// Uses the key field when it holds usable text, otherwise falls back to
    /// the record's position in the feed.
    pub fn key(&self, key_field: Option<&str>, index: usize) -> String {
        key_field
            .and_then(|field| self.text(field))
            .unwrap_or_else(|| index.to_string())
    }
}

/// Render a JSON value as trimmed scalar text, `None` when nothing usable
/// is there.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => map.get(TEXT_KEY).and_then(scalar_text),
        Value::Array(items) => items.first().and_then(scalar_text),
        Value::Null => None,
    }
}
