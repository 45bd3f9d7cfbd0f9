//! Entries as handed out by the event store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::StreamId;

/// Free-form key/value payload of one entry.
pub type Fields = serde_json::Map<String, Value>;

/// One entry of a physical stream, untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    pub id: StreamId,
    pub fields: Fields,
}

impl RawEntry {
    #[must_use]
    pub fn new(id: impl Into<StreamId>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Field rendered as text.
    ///
    /// Strings come back as-is, numbers and booleans are stringified,
    /// anything else (including empty strings) counts as absent.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<String> {
        text_of(self.fields.get(name)?)
    }

    /// First present field among `names`, rendered as text.
    #[must_use]
    pub fn first_text(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| self.text(name))
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Entries read from one stream in a single call, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamBatch {
    pub key: String,
    pub entries: Vec<RawEntry>,
}
