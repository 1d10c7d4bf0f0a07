use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::firestore::model::Timestamp;
use crate::firestore::value::{ArrayValue, MapValue};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FirestoreValue {
    kind: ValueKind,
}

/// Placeholders resolved by the backend at write time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum SentinelValue {
    ServerTimestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ValueKind {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Timestamp(Timestamp),
    String(String),
    /// Canonical path of the referenced document.
    Reference(String),
    Array(ArrayValue),
    Map(MapValue),
    Sentinel(SentinelValue),
}

impl FirestoreValue {
    pub fn null() -> Self {
        Self {
            kind: ValueKind::Null,
        }
    }

    pub fn from_bool(value: bool) -> Self {
        Self {
            kind: ValueKind::Boolean(value),
        }
    }

    pub fn from_integer(value: i64) -> Self {
        Self {
            kind: ValueKind::Integer(value),
        }
    }

    pub fn from_double(value: f64) -> Self {
        Self {
            kind: ValueKind::Double(value),
        }
    }

    pub fn from_timestamp(value: Timestamp) -> Self {
        Self {
            kind: ValueKind::Timestamp(value),
        }
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::String(value.into()),
        }
    }

    pub fn from_reference(path: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::Reference(path.into()),
        }
    }

    pub fn from_array(values: Vec<FirestoreValue>) -> Self {
        Self {
            kind: ValueKind::Array(ArrayValue::new(values)),
        }
    }

    pub fn from_map(map: BTreeMap<String, FirestoreValue>) -> Self {
        Self {
            kind: ValueKind::Map(MapValue::new(map)),
        }
    }

    /// Sentinel that the backend replaces with the commit time of the write.
    pub fn server_timestamp() -> Self {
        Self {
            kind: ValueKind::Sentinel(SentinelValue::ServerTimestamp),
        }
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ValueKind::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            ValueKind::Boolean(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.kind {
            ValueKind::Integer(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self.kind {
            ValueKind::Double(value) => Some(value),
            ValueKind::Integer(value) => Some(value as f64),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self.kind {
            ValueKind::Timestamp(value) => Some(value),
            _ => None,
        }
    }

    /// Path of the referenced document when this value is a reference.
    pub fn as_reference(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::Reference(path) => Some(path),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FirestoreValue]> {
        match &self.kind {
            ValueKind::Array(array) => Some(array.values()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, FirestoreValue>> {
        match &self.kind {
            ValueKind::Map(map) => Some(map.fields()),
            _ => None,
        }
    }

    pub fn is_server_timestamp(&self) -> bool {
        matches!(
            self.kind,
            ValueKind::Sentinel(SentinelValue::ServerTimestamp)
        )
    }

    /// Plain JSON projection: timestamps become RFC3339 strings and references their path.
    pub fn to_json(&self) -> JsonValue {
        match &self.kind {
            ValueKind::Null => JsonValue::Null,
            ValueKind::Boolean(value) => json!(value),
            ValueKind::Integer(value) => json!(value),
            ValueKind::Double(value) => json!(value),
            ValueKind::Timestamp(value) => json!(value.to_rfc3339()),
            ValueKind::String(value) => json!(value),
            ValueKind::Reference(path) => json!(path),
            ValueKind::Array(array) => {
                JsonValue::Array(array.values().iter().map(FirestoreValue::to_json).collect())
            }
            ValueKind::Map(map) => JsonValue::Object(
                map.fields()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            ValueKind::Sentinel(SentinelValue::ServerTimestamp) => json!("<serverTimestamp>"),
        }
    }
}

impl From<&str> for FirestoreValue {
    fn from(value: &str) -> Self {
        Self::from_string(value)
    }
}

impl From<String> for FirestoreValue {
    fn from(value: String) -> Self {
        Self::from_string(value)
    }
}

impl From<bool> for FirestoreValue {
    fn from(value: bool) -> Self {
        Self::from_bool(value)
    }
}

impl From<i64> for FirestoreValue {
    fn from(value: i64) -> Self {
        Self::from_integer(value)
    }
}

impl From<f64> for FirestoreValue {
    fn from(value: f64) -> Self {
        Self::from_double(value)
    }
}

impl From<Timestamp> for FirestoreValue {
    fn from(value: Timestamp) -> Self {
        Self::from_timestamp(value)
    }
}

impl<T> From<Vec<T>> for FirestoreValue
where
    T: Into<FirestoreValue>,
{
    fn from(values: Vec<T>) -> Self {
        Self::from_array(values.into_iter().map(Into::into).collect())
    }
}

impl<T> From<Option<T>> for FirestoreValue
where
    T: Into<FirestoreValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_else(Self::null)
    }
}
