//! Document artifacts: the JSON file written for each document.
//!
//! JSON-native values (null, booleans, integers, finite doubles, strings,
//! arrays, maps) are written as plain JSON. Values JSON cannot express are
//! written as a tagged wrapper:
//!
//! ```json
//! { "__type__": "timestamp", "value": "2024-05-01T12:00:00.123456789Z" }
//! ```
//!
//! | tag         | value                                     |
//! |-------------|-------------------------------------------|
//! | `timestamp` | RFC 3339 string, UTC, up to nanoseconds    |
//! | `geopoint`  | `{"latitude": f64, "longitude": f64}`     |
//! | `reference` | document path string                      |
//! | `bytes`     | standard base64 string                    |
//! | `double`    | `"NaN"`, `"Infinity"` or `"-Infinity"`    |
//! | `map`       | a user map that itself has a `__type__` key |
//!
//! The `map` tag keeps the convention unambiguous: any JSON object below the
//! top level that has a `__type__` key is a wrapper, because user maps with
//! such a key are always wrapped. The top-level object is the field map itself
//! and is never a wrapper.
//!
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use snafu::prelude::*;

use crate::{
    MAX_NESTING_DEPTH, TYPE_TAG_KEY, TYPE_VALUE_KEY,
    error::{ArtifactError, JsonSnafu},
    value::{FieldMap, FieldValue},
};

/// Output layout of artifact files.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactFormat {
    /// No whitespace.
    #[default]
    Compact,
    /// Indented by two spaces, one value per line.
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
enum ValueTag {
    Timestamp,
    Geopoint,
    Reference,
    Bytes,
    Double,
    Map,
}

/// Serializes a document's fields.
pub fn to_artifact(fields: &FieldMap, format: ArtifactFormat) -> Result<Vec<u8>, ArtifactError> {
    let mut root = Map::new();
    for (key, value) in fields {
        let encoded = encode_value(value, 1).map_err(|reason| ArtifactError::Unrepresentable {
            field: key.clone(),
            reason,
        })?;
        root.insert(key.clone(), encoded);
    }
    let root = Value::Object(root);
    match format {
        ArtifactFormat::Compact => serde_json::to_vec(&root),
        ArtifactFormat::Pretty => serde_json::to_vec_pretty(&root),
    }
    .context(JsonSnafu)
}

/// Parses an artifact back into a document's fields.
pub fn from_artifact(bytes: &[u8]) -> Result<FieldMap, ArtifactError> {
    let root: Value = serde_json::from_slice(bytes).context(JsonSnafu)?;
    let Value::Object(root) = root else {
        return Err(ArtifactError::NotAnObject);
    };
    let mut fields = FieldMap::new();
    for (key, value) in root {
        let decoded = decode_value(value).map_err(|reason| ArtifactError::InvalidField {
            field: key.clone(),
            reason,
        })?;
        fields.insert(key, decoded);
    }
    Ok(fields)
}

// `depth` is the JSON nesting level the encoded value will sit at.
fn encode_value(value: &FieldValue, depth: usize) -> Result<Value, String> {
    if depth > MAX_NESTING_DEPTH {
        return Err(format!(
            "value is nested deeper than {MAX_NESTING_DEPTH} levels"
        ));
    }
    let encoded = match value {
        FieldValue::Null => Value::Null,
        FieldValue::Boolean(flag) => Value::Bool(*flag),
        FieldValue::Integer(number) => Value::from(*number),
        FieldValue::Double(number) if number.is_finite() => Value::from(*number),
        FieldValue::Double(number) => tagged(ValueTag::Double, Value::from(non_finite_name(*number))),
        FieldValue::String(text) => Value::String(text.clone()),
        FieldValue::Timestamp(at) => tagged(
            ValueTag::Timestamp,
            Value::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        ),
        FieldValue::Bytes(data) => tagged(ValueTag::Bytes, Value::String(BASE64.encode(data))),
        FieldValue::Reference(path) => tagged(ValueTag::Reference, Value::String(path.clone())),
        FieldValue::GeoPoint {
            latitude,
            longitude,
        } => {
            if depth + 1 > MAX_NESTING_DEPTH {
                return Err(format!(
                    "value is nested deeper than {MAX_NESTING_DEPTH} levels"
                ));
            }
            if !latitude.is_finite() || !longitude.is_finite() {
                return Err("geopoint coordinates must be finite".to_string());
            }
            tagged(
                ValueTag::Geopoint,
                serde_json::json!({ "latitude": latitude, "longitude": longitude }),
            )
        }
        FieldValue::Array(values) => Value::Array(
            values
                .iter()
                .map(|item| encode_value(item, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        FieldValue::Map(fields) if fields.contains_key(TYPE_TAG_KEY) => {
            tagged(ValueTag::Map, encode_map(fields, depth + 1)?)
        }
        FieldValue::Map(fields) => encode_map(fields, depth)?,
    };
    Ok(encoded)
}

fn encode_map(fields: &FieldMap, depth: usize) -> Result<Value, String> {
    let mut out = Map::new();
    for (key, value) in fields {
        out.insert(key.clone(), encode_value(value, depth + 1)?);
    }
    Ok(Value::Object(out))
}

fn tagged(tag: ValueTag, value: Value) -> Value {
    let mut out = Map::new();
    out.insert(TYPE_TAG_KEY.to_string(), Value::String(tag.to_string()));
    out.insert(TYPE_VALUE_KEY.to_string(), value);
    Value::Object(out)
}

fn non_finite_name(number: f64) -> &'static str {
    if number.is_nan() {
        "NaN"
    } else if number.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn decode_value(value: Value) -> Result<FieldValue, String> {
    let decoded = match value {
        Value::Null => FieldValue::Null,
        Value::Bool(flag) => FieldValue::Boolean(flag),
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                FieldValue::Integer(integer)
            } else if number.is_u64() {
                return Err(format!("integer {number} exceeds the 64-bit signed range"));
            } else {
                FieldValue::Double(number.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(text) => FieldValue::String(text),
        Value::Array(values) => FieldValue::Array(
            values
                .into_iter()
                .map(decode_value)
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(object) if object.contains_key(TYPE_TAG_KEY) => decode_tagged(object)?,
        Value::Object(object) => FieldValue::Map(decode_map(object)?),
    };
    Ok(decoded)
}

fn decode_map(object: Map<String, Value>) -> Result<FieldMap, String> {
    object
        .into_iter()
        .map(|(key, value)| decode_value(value).map(|decoded| (key, decoded)))
        .collect()
}

fn decode_tagged(mut object: Map<String, Value>) -> Result<FieldValue, String> {
    let tag = object
        .remove(TYPE_TAG_KEY)
        .and_then(|tag| tag.as_str().map(str::to_string))
        .ok_or_else(|| format!("{TYPE_TAG_KEY} must be a string"))?;
    let tag =
        ValueTag::from_str(&tag).map_err(|_| format!("unknown {TYPE_TAG_KEY} tag '{tag}'"))?;
    let payload = object
        .remove(TYPE_VALUE_KEY)
        .ok_or_else(|| format!("{tag} wrapper has no '{TYPE_VALUE_KEY}'"))?;
    if let Some(extra) = object.keys().next() {
        return Err(format!("{tag} wrapper has unexpected key '{extra}'"));
    }

    let decoded = match (tag, payload) {
        (ValueTag::Timestamp, Value::String(text)) => DateTime::parse_from_rfc3339(&text)
            .map(|at| FieldValue::Timestamp(at.with_timezone(&Utc)))
            .map_err(|err| format!("invalid timestamp '{text}': {err}"))?,
        (ValueTag::Reference, Value::String(path)) => FieldValue::Reference(path),
        (ValueTag::Bytes, Value::String(text)) => BASE64
            .decode(text.as_bytes())
            .map(FieldValue::Bytes)
            .map_err(|err| format!("invalid base64: {err}"))?,
        (ValueTag::Double, Value::String(text)) => match text.as_str() {
            "NaN" => FieldValue::Double(f64::NAN),
            "Infinity" => FieldValue::Double(f64::INFINITY),
            "-Infinity" => FieldValue::Double(f64::NEG_INFINITY),
            other => return Err(format!("invalid double '{other}'")),
        },
        (ValueTag::Double, Value::Number(number)) => {
            FieldValue::Double(number.as_f64().unwrap_or(f64::NAN))
        }
        (ValueTag::Geopoint, Value::Object(point)) => {
            let coordinate = |name: &str| {
                point
                    .get(name)
                    .and_then(Value::as_f64)
                    .ok_or_else(|| format!("geopoint has no numeric '{name}'"))
            };
            FieldValue::GeoPoint {
                latitude: coordinate("latitude")?,
                longitude: coordinate("longitude")?,
            }
        }
        (ValueTag::Map, Value::Object(fields)) => FieldValue::Map(decode_map(fields)?),
        (tag, other) => {
            return Err(format!("{tag} wrapper has unexpected value {other}"));
        }
    };
    Ok(decoded)
}
