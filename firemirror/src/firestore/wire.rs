//! Firestore REST value encoding.
//!
//! The REST API represents every value as a single-key object naming its type,
//! for example `{"integerValue": "42"}` or `{"mapValue": {"fields": {...}}}`.
//! References are full resource names (`projects/p/databases/d/documents/Users/u1`);
//! references into the same database are converted to the relative path
//! `Users/u1` on read and re-rooted on write, so a mirror can be restored into
//! another project. References into any other database keep their full name
//! behind a leading `/` and are written back verbatim.
//!
use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::value::{FieldMap, FieldValue};

/// A typed Firestore value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireValue {
    NullValue(serde_json::Value),
    BooleanValue(bool),
    /// int64 values are sent as decimal strings
    IntegerValue(String),
    DoubleValue(WireDouble),
    TimestampValue(String),
    StringValue(String),
    /// base64
    BytesValue(String),
    ReferenceValue(String),
    GeoPointValue(LatLng),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

/// Doubles are JSON numbers, except the non-finite values which are strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireDouble {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    // zero coordinates are omitted from responses
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    #[serde(default)]
    pub values: Vec<WireValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    #[serde(default)]
    pub fields: BTreeMap<String, WireValue>,
}

/// A document as returned by `documents.list`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireDocument {
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, WireValue>,
}

impl WireDocument {
    /// Last segment of the resource name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }
}

/// Converts a document's wire fields into a [`FieldMap`].
///
/// `database` is the resource name prefix `projects/<p>/databases/<d>/documents`.
pub fn decode_fields(
    fields: BTreeMap<String, WireValue>,
    database: &str,
) -> Result<FieldMap, String> {
    fields
        .into_iter()
        .map(|(key, value)| {
            decode_value(value, database)
                .map(|decoded| (key.clone(), decoded))
                .map_err(|reason| format!("field '{key}': {reason}"))
        })
        .collect()
}

/// Converts a [`FieldMap`] into wire fields for `documents.patch`.
pub fn encode_fields(fields: &FieldMap, database: &str) -> BTreeMap<String, WireValue> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), encode_value(value, database)))
        .collect()
}

fn decode_value(value: WireValue, database: &str) -> Result<FieldValue, String> {
    let decoded = match value {
        WireValue::NullValue(_) => FieldValue::Null,
        WireValue::BooleanValue(flag) => FieldValue::Boolean(flag),
        WireValue::IntegerValue(text) => FieldValue::Integer(
            text.parse()
                .map_err(|_| format!("invalid integerValue '{text}'"))?,
        ),
        WireValue::DoubleValue(WireDouble::Number(number)) => FieldValue::Double(number),
        WireValue::DoubleValue(WireDouble::Text(text)) => FieldValue::Double(match text.as_str() {
            "NaN" => f64::NAN,
            "Infinity" => f64::INFINITY,
            "-Infinity" => f64::NEG_INFINITY,
            _ => return Err(format!("invalid doubleValue '{text}'")),
        }),
        WireValue::TimestampValue(text) => FieldValue::Timestamp(
            DateTime::parse_from_rfc3339(&text)
                .map_err(|err| format!("invalid timestampValue '{text}': {err}"))?
                .with_timezone(&Utc),
        ),
        WireValue::StringValue(text) => FieldValue::String(text),
        WireValue::BytesValue(text) => FieldValue::Bytes(
            BASE64
                .decode(&text)
                .map_err(|err| format!("invalid bytesValue: {err}"))?,
        ),
        WireValue::ReferenceValue(name) => FieldValue::Reference(
            name.strip_prefix(database)
                .and_then(|rest| rest.strip_prefix('/'))
                .map_or_else(|| format!("/{name}"), str::to_string),
        ),
        WireValue::GeoPointValue(LatLng {
            latitude,
            longitude,
        }) => FieldValue::GeoPoint {
            latitude,
            longitude,
        },
        WireValue::ArrayValue(ArrayValue { values }) => FieldValue::Array(
            values
                .into_iter()
                .map(|item| decode_value(item, database))
                .collect::<Result<_, _>>()?,
        ),
        WireValue::MapValue(MapValue { fields }) => FieldValue::Map(
            fields
                .into_iter()
                .map(|(key, item)| decode_value(item, database).map(|decoded| (key, decoded)))
                .collect::<Result<_, _>>()?,
        ),
    };
    Ok(decoded)
}

fn encode_value(value: &FieldValue, database: &str) -> WireValue {
    match value {
        FieldValue::Null => WireValue::NullValue(serde_json::Value::Null),
        FieldValue::Boolean(flag) => WireValue::BooleanValue(*flag),
        FieldValue::Integer(number) => WireValue::IntegerValue(number.to_string()),
        FieldValue::Double(number) if number.is_finite() => {
            WireValue::DoubleValue(WireDouble::Number(*number))
        }
        FieldValue::Double(number) => WireValue::DoubleValue(WireDouble::Text(
            if number.is_nan() {
                "NaN"
            } else if number.is_sign_positive() {
                "Infinity"
            } else {
                "-Infinity"
            }
            .to_string(),
        )),
        FieldValue::Timestamp(at) => {
            WireValue::TimestampValue(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        FieldValue::String(text) => WireValue::StringValue(text.clone()),
        FieldValue::Bytes(data) => WireValue::BytesValue(BASE64.encode(data)),
        FieldValue::Reference(path) => WireValue::ReferenceValue(match path.strip_prefix('/') {
            Some(foreign) => foreign.to_string(),
            None => format!("{database}/{path}"),
        }),
        FieldValue::GeoPoint {
            latitude,
            longitude,
        } => WireValue::GeoPointValue(LatLng {
            latitude: *latitude,
            longitude: *longitude,
        }),
        FieldValue::Array(values) => WireValue::ArrayValue(ArrayValue {
            values: values.iter().map(|item| encode_value(item, database)).collect(),
        }),
        FieldValue::Map(fields) => WireValue::MapValue(MapValue {
            fields: encode_fields(fields, database),
        }),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    const SOURCE_DB: &str = "projects/source/databases/(default)/documents";
    const TARGET_DB: &str = "projects/target/databases/(default)/documents";

    fn wire_fields(value: serde_json::Value) -> BTreeMap<String, WireValue> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn decodes_every_value_type() {
        let fields = wire_fields(json!({
            "nothing": {"nullValue": "NULL_VALUE"},
            "flag": {"booleanValue": true},
            "count": {"integerValue": "-9007199254740993"},
            "ratio": {"doubleValue": 0.25},
            "nan": {"doubleValue": "NaN"},
            "at": {"timestampValue": "2024-03-01T12:30:00.123456Z"},
            "name": {"stringValue": "Ada"},
            "blob": {"bytesValue": "AAEC"},
            "owner": {"referenceValue": format!("{SOURCE_DB}/Users/u1")},
            "place": {"geoPointValue": {"latitude": 51.5}},
            "tags": {"arrayValue": {"values": [{"stringValue": "a"}, {"integerValue": "2"}]}},
            "empty": {"arrayValue": {}},
            "meta": {"mapValue": {"fields": {"k": {"booleanValue": false}}}}
        }));
        let decoded = decode_fields(fields, SOURCE_DB).unwrap();

        assert_eq!(decoded["nothing"], FieldValue::Null);
        assert_eq!(decoded["count"], FieldValue::Integer(-9_007_199_254_740_993));
        assert_eq!(decoded["ratio"], FieldValue::Double(0.25));
        assert!(matches!(decoded["nan"], FieldValue::Double(n) if n.is_nan()));
        assert_eq!(
            decoded["at"],
            FieldValue::Timestamp(
                Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
                    + chrono::TimeDelta::microseconds(123_456)
            )
        );
        assert_eq!(decoded["blob"], FieldValue::Bytes(vec![0, 1, 2]));
        assert_eq!(decoded["owner"], FieldValue::Reference("Users/u1".into()));
        assert_eq!(
            decoded["place"],
            FieldValue::GeoPoint {
                latitude: 51.5,
                longitude: 0.0
            }
        );
        assert_eq!(
            decoded["tags"],
            FieldValue::Array(vec!["a".into(), FieldValue::Integer(2)])
        );
        assert_eq!(decoded["empty"], FieldValue::Array(Vec::new()));
        assert_eq!(
            decoded["meta"].as_map().unwrap()["k"],
            FieldValue::Boolean(false)
        );
    }

    #[test]
    fn references_are_rerooted_into_the_target_database() {
        let fields = wire_fields(json!({
            "local": {"referenceValue": format!("{SOURCE_DB}/Users/u1")},
            "foreign": {"referenceValue": "projects/other/databases/(default)/documents/X/y"}
        }));
        let decoded = decode_fields(fields, SOURCE_DB).unwrap();
        assert_eq!(
            decoded["foreign"],
            FieldValue::Reference("/projects/other/databases/(default)/documents/X/y".into())
        );
        let encoded = serde_json::to_value(encode_fields(&decoded, TARGET_DB)).unwrap();
        assert_eq!(
            encoded,
            json!({
                "foreign": {"referenceValue": "projects/other/databases/(default)/documents/X/y"},
                "local": {"referenceValue": format!("{TARGET_DB}/Users/u1")}
            })
        );
    }

    #[test]
    fn local_collection_named_projects_is_rerooted() {
        let fields = wire_fields(json!({
            "owner": {"referenceValue": format!("{SOURCE_DB}/projects/p1")}
        }));
        let decoded = decode_fields(fields, SOURCE_DB).unwrap();
        assert_eq!(decoded["owner"], FieldValue::Reference("projects/p1".into()));
        assert_eq!(
            serde_json::to_value(encode_fields(&decoded, TARGET_DB)).unwrap(),
            json!({"owner": {"referenceValue": format!("{TARGET_DB}/projects/p1")}})
        );
    }

    #[test]
    fn encodes_wire_json() {
        let fields: FieldMap = [
            ("n".to_string(), FieldValue::Integer(42)),
            ("inf".to_string(), FieldValue::Double(f64::NEG_INFINITY)),
            ("none".to_string(), FieldValue::Null),
            (
                "list".to_string(),
                FieldValue::Array(vec![FieldValue::Boolean(true)]),
            ),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            serde_json::to_value(encode_fields(&fields, TARGET_DB)).unwrap(),
            json!({
                "inf": {"doubleValue": "-Infinity"},
                "list": {"arrayValue": {"values": [{"booleanValue": true}]}},
                "n": {"integerValue": "42"},
                "none": {"nullValue": null}
            })
        );
    }

    #[test]
    fn invalid_values_name_the_field() {
        let fields = wire_fields(json!({"count": {"integerValue": "12x"}}));
        let err = decode_fields(fields, SOURCE_DB).unwrap_err();
        assert!(err.starts_with("field 'count'"), "{err}");
    }

    #[test]
    fn document_id_is_the_last_name_segment() {
        let doc: WireDocument = serde_json::from_value(json!({
            "name": format!("{SOURCE_DB}/Users/u1/Orders/o1"),
            "createTime": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(doc.id(), "o1");
        assert!(doc.fields.is_empty());
    }
}
