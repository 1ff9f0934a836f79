//! Field values stored in documents.
//!
//! The model mirrors the Firestore value types. Several of them (timestamps,
//! references, geo points, bytes) have no native JSON form; see
//! [`crate::artifact`] for how they are written to disk.
//!
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// A document's fields, keyed by field name.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    /// Point in time with nanosecond precision.
    Timestamp(DateTime<Utc>),
    String(String),
    Bytes(Vec<u8>),
    /// Path of another document, relative to the database root (`Users/u1`),
    /// or `/` followed by the full resource name when it points into another
    /// database.
    Reference(String),
    GeoPoint {
        latitude: f64,
        longitude: f64,
    },
    Array(Vec<FieldValue>),
    Map(FieldMap),
}

impl FieldValue {
    /// Short name of the value's type, used in log and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::Timestamp(_) => "timestamp",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Reference(_) => "reference",
            Self::GeoPoint { .. } => "geopoint",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }

    /// True for values that are written to an artifact as plain JSON.
    pub fn is_json_native(&self) -> bool {
        match self {
            Self::Null | Self::Boolean(_) | Self::Integer(_) | Self::String(_) => true,
            Self::Double(value) => value.is_finite(),
            Self::Array(values) => values.iter().all(Self::is_json_native),
            Self::Map(fields) => fields.values().all(Self::is_json_native),
            Self::Timestamp(_) | Self::Bytes(_) | Self::Reference(_) | Self::GeoPoint { .. } => {
                false
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&FieldMap> {
        match self {
            Self::Map(fields) => Some(fields),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(values: Vec<FieldValue>) -> Self {
        Self::Array(values)
    }
}

impl From<FieldMap> for FieldValue {
    fn from(fields: FieldMap) -> Self {
        Self::Map(fields)
    }
}

impl<T: Into<Self>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Builds a `FieldMap` from `(key, value)` pairs.
///
/// ```
/// use firemirror::value::{FieldValue, field_map};
/// let fields = field_map([("name", FieldValue::from("Ada")), ("age", 36i64.into())]);
/// assert_eq!(fields.len(), 2);
/// ```
pub fn field_map<K, V, I>(pairs: I) -> FieldMap
where
    K: Into<String>,
    V: Into<FieldValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
