//! Entity drafts: the partially-built record carried across turns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::normalize::normalize_value;
use crate::schema::FieldSchema;

/// Field name → normalized value. Absent values are empty strings.
///
/// A draft built through [`EntityDraft::empty`] or [`EntityDraft::from_values`]
/// holds exactly one entry per schema field, never more and never fewer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityDraft {
    fields: BTreeMap<String, String>,
}

impl EntityDraft {
    /// A draft with every schema field present and empty.
    pub fn empty(schema: &FieldSchema) -> Self {
        Self {
            fields: schema.names().map(|n| (n.to_owned(), String::new())).collect(),
        }
    }

    /// Build a draft from raw JSON values, normalizing each known field.
    ///
    /// Keys outside the schema are dropped.
    pub fn from_values(schema: &FieldSchema, values: &Map<String, Value>) -> Self {
        let mut draft = Self::empty(schema);
        for field in schema.fields() {
            if let Some(raw) = values.get(&field.name) {
                draft
                    .fields
                    .insert(field.name.clone(), normalize_value(field.kind, raw));
            }
        }
        draft
    }

    /// Re-normalize a stored draft against `schema`.
    ///
    /// Restores the key invariant after deserializing state written by an
    /// older schema: unknown keys are dropped, missing keys are added empty.
    pub fn conform(&self, schema: &FieldSchema) -> Self {
        let values: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Self::from_values(schema, &values)
    }

    /// Value of `name`, or `""` when absent or unknown.
    pub fn get(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or_default()
    }

    /// Whether `name` holds a non-empty value.
    pub fn is_present(&self, name: &str) -> bool {
        !self.get(name).is_empty()
    }

    /// Set a field that already exists in the draft. Unknown names are ignored.
    pub fn set(&mut self, name: &str, value: String) {
        if let Some(slot) = self.fields.get_mut(name) {
            *slot = value;
        }
    }

    /// Iterate `(name, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether every field is empty.
    pub fn is_blank(&self) -> bool {
        self.fields.values().all(String::is_empty)
    }

    /// Render as a JSON object (used for `prefill` in replies).
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

/// Ordered merge of the three draft sources.
///
/// For each field the first non-empty value wins, in this order:
/// `parsed` (this turn's completion output), then `prefill` (sent by the
/// caller), then `session` (stored from earlier turns).
pub fn merge(
    schema: &FieldSchema,
    session: &EntityDraft,
    prefill: &EntityDraft,
    parsed: &EntityDraft,
) -> EntityDraft {
    let mut merged = EntityDraft::empty(schema);
    for name in schema.names() {
        let winner = [parsed, prefill, session]
            .into_iter()
            .map(|d| d.get(name))
            .find(|v| !v.is_empty())
            .unwrap_or_default();
        merged.set(name, winner.to_owned());
    }
    merged
}
