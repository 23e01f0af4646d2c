//! Schema-constrained maps.
//!
//! A [`StrictMap`] only accepts keys declared in its [`Schema`], and only
//! values whose kind matches the declared kind exactly. Nothing is coerced:
//! an integer written to a text field is rejected, not stringified.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Timestamp,
    List,
    Map,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Timestamp => "timestamp",
            FieldKind::List => "list",
            FieldKind::Map => "map",
        }
    }
}

/// A typed value stored in a [`StrictMap`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Map(Map<String, Value>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Integer(_) => FieldKind::Integer,
            FieldValue::Timestamp(_) => FieldKind::Timestamp,
            FieldValue::List(_) => FieldKind::List,
            FieldValue::Map(_) => FieldKind::Map,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map<String, Value>> {
        match self {
            FieldValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// JSON representation used in index documents.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Timestamp(ts) => Value::String(ts.to_rfc3339()),
            FieldValue::List(items) => Value::Array(items.clone()),
            FieldValue::Map(map) => Value::Object(map.clone()),
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl From<Vec<Value>> for FieldValue {
    fn from(value: Vec<Value>) -> Self {
        FieldValue::List(value)
    }
}

impl From<Map<String, Value>> for FieldValue {
    fn from(value: Map<String, Value>) -> Self {
        FieldValue::Map(value)
    }
}

/// Fixed mapping of key to declared kind.
#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [(&'static str, FieldKind)],
}

impl Schema {
    pub fn kind_of(&self, key: &str) -> Option<FieldKind> {
        self.fields
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, kind)| *kind)
    }
}

/// Schema of `NormalizedItem::meta`.
pub static META_SCHEMA: Schema = Schema {
    name: "meta",
    fields: &[
        ("processing_started", FieldKind::Timestamp),
        ("processing_finished", FieldKind::Timestamp),
        ("source", FieldKind::Text),
        ("rights", FieldKind::Text),
        ("original_object_id", FieldKind::Text),
        ("original_object_urls", FieldKind::Map),
        ("object_types", FieldKind::List),
    ],
};

/// Schema of `NormalizedItem::combined_data`.
pub static COMBINED_SCHEMA: Schema = Schema {
    name: "combined_data",
    fields: &[
        ("title", FieldKind::Text),
        ("description", FieldKind::Text),
        ("date", FieldKind::Timestamp),
        ("date_granularity", FieldKind::Integer),
        ("authors", FieldKind::List),
        ("media_urls", FieldKind::List),
        ("all_text", FieldKind::Text),
    ],
};

/// A map constrained by a [`Schema`].
#[derive(Debug, Clone)]
pub struct StrictMap {
    schema: &'static Schema,
    values: BTreeMap<&'static str, FieldValue>,
}

impl StrictMap {
    pub fn new(schema: &'static Schema) -> Self {
        Self {
            schema,
            values: BTreeMap::new(),
        }
    }

    /// Set a key, rejecting undeclared keys and mismatched kinds.
    pub fn set(&mut self, key: &str, value: impl Into<FieldValue>) -> Result<()> {
        let value = value.into();
        let (name, expected) = self
            .schema
            .fields
            .iter()
            .find(|(name, _)| *name == key)
            .copied()
            .ok_or_else(|| AppError::SchemaKey {
                schema: self.schema.name,
                key: key.to_string(),
            })?;

        if value.kind() != expected {
            return Err(AppError::SchemaType {
                schema: self.schema.name,
                key: key.to_string(),
                expected: expected.as_str(),
                actual: value.kind().as_str(),
            });
        }

        self.values.insert(name, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.values.get(key)
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_text)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.values.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    /// Copy the set keys into a JSON object.
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.iter()
            .map(|(k, v)| (k.to_string(), v.to_json()))
            .collect()
    }
}

impl Serialize for StrictMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (key, value) in &self.values {
            map.serialize_entry(key, &value.to_json())?;
        }
        map.end()
    }
}
