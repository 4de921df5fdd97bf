//! # Frame Transfer Format
//!
//! A frame travels as a schema (column names, types, config, labels) plus columnar
//! value arrays. Values JSON cannot encode are written as `null` and restored from a
//! per-column entity lookup.
//!
//! ```text
//! { "schema": { "refId": "A", "fields": [ { "name": "v", "type": "number" } ] },
//!   "data":   [ { "values": [[1, null, 3]], "entities": [ { "NaN": [1] } ] } ] }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::entities::{decode_field_value_entities, encode_field_value_entities, lenient_entities, FieldValueEntityLookup};
use super::guess::guess_field_type;
use super::types::{DataFrame, Field, FieldConfig, FieldType, FieldValue, Labels};
use super::FrameError;

/// The JSON transfer object for frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFrameJson {
    /// Identifier of the schema this message expects; lets streaming clients check
    /// that their schema still matches the server's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<DataFrameSchema>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<DataFrameData>>,

    /// Rows to append, keyed by field name. All value arrays have the same length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<BTreeMap<String, Vec<Value>>>,
}

/// Column definitions and frame-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFrameSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Optional on the wire so a missing list surfaces as `FrameError::MissingFields`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldSchema>>,
}

/// One column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<FieldConfig>,

    #[serde(default, deserialize_with = "lenient_labels", skip_serializing_if = "Option::is_none")]
    pub labels: Option<Labels>,
}

impl FieldSchema {
    /// A column definition with only a name and a declared type.
    pub fn new(name: impl Into<String>, field_type: Option<FieldType>) -> Self {
        Self { name: name.into(), field_type, config: None, labels: None }
    }
}

/// One series payload: columnar values matching the schema's fields by position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFrameData {
    /// The label set of the series this payload updates.
    #[serde(default, deserialize_with = "lenient_labels", skip_serializing_if = "Option::is_none")]
    pub stream: Option<Labels>,

    /// Set when the producer dropped values from the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped_values: Option<bool>,

    #[serde(default)]
    pub values: Vec<Vec<Value>>,

    #[serde(default, deserialize_with = "lenient_entities", skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<Option<FieldValueEntityLookup>>>,

    /// Reserved fixed-point bases. Accepted and ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bases: Option<Vec<f64>>,

    /// Reserved value multipliers. Accepted and ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factors: Option<Vec<f64>>,
}

/// Label values that are not strings are kept as their JSON text.
fn lenient_labels<'de, D>(deserializer: D) -> Result<Option<Labels>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?;
    Ok(raw.map(|map| {
        map.into_iter()
            .map(|(key, value)| match value {
                Value::String(s) => (key, s),
                other => (key, other.to_string()),
            })
            .collect()
    }))
}

/// A payload column after length normalization and entity restoration.
pub(crate) struct NormalizedColumn {
    pub values: Vec<FieldValue>,
    pub entities: FieldValueEntityLookup,
}

/// Brings every column of `data` to the payload's longest length, padding with the
/// missing marker, then restores entity markers. Returns the frame length and one
/// column per schema field.
pub(crate) fn normalize_payload(field_count: usize, data: Option<DataFrameData>) -> (usize, Vec<NormalizedColumn>) {
    let Some(data) = data else {
        let empty = (0..field_count)
            .map(|_| NormalizedColumn { values: Vec::new(), entities: FieldValueEntityLookup::default() })
            .collect();
        return (0, empty);
    };

    if data.bases.is_some() || data.factors.is_some() {
        tracing::trace!("Ignoring reserved bases/factors in frame payload");
    }

    let length = data.values.iter().map(Vec::len).max().unwrap_or(0);
    let mut raw = data.values.into_iter();
    let mut entities = data.entities.unwrap_or_default().into_iter();

    let columns = (0..field_count)
        .map(|_| {
            let mut values: Vec<FieldValue> =
                raw.next().unwrap_or_default().into_iter().map(FieldValue::from_json).collect();
            values.resize(length, FieldValue::Missing);

            let lookup = entities.next().flatten();
            if let Some(lookup) = &lookup {
                decode_field_value_entities(lookup, &mut values);
            }

            NormalizedColumn { values, entities: lookup.unwrap_or_default() }
        })
        .collect();

    (length, columns)
}

/// Decodes a transfer message into a frame.
///
/// Only the first payload of `data` is used. Ragged columns are padded to the
/// longest one with [`FieldValue::Missing`]; columns without a declared type get an
/// inferred one.
///
/// # Errors
/// [`FrameError::MissingFields`] if the message has no schema field list.
pub fn data_frame_from_json(dto: DataFrameJson) -> Result<DataFrame, FrameError> {
    let schema = dto.schema.ok_or(FrameError::MissingFields)?;
    let field_schemas = schema.fields.ok_or(FrameError::MissingFields)?;

    let mut payloads = dto.data.unwrap_or_default().into_iter();
    let payload = payloads.next();
    let dropped = payloads.count();
    if dropped > 0 {
        tracing::debug!("Decoding first frame payload only, {} more ignored", dropped);
    }

    let (length, columns) = normalize_payload(field_schemas.len(), payload);

    let fields = field_schemas
        .into_iter()
        .zip(columns)
        .map(|(schema, column)| {
            let field_type = schema
                .field_type
                .unwrap_or_else(|| guess_field_type(&schema.name, &column.values));
            Field {
                name: schema.name,
                field_type,
                config: schema.config.unwrap_or_default(),
                labels: schema.labels,
                values: column.values,
                entities: column.entities,
            }
        })
        .collect();

    Ok(DataFrame { name: schema.name, ref_id: schema.ref_id, meta: schema.meta, fields, length })
}

/// Parses and decodes a transfer message from JSON text.
pub fn data_frame_from_json_str(text: &str) -> Result<DataFrame, FrameError> {
    let dto: DataFrameJson = serde_json::from_str(text)?;
    data_frame_from_json(dto)
}

/// Encodes a frame into a transfer message with a single payload.
///
/// NaN, ±Infinity and missing cells are written as `null` and listed in the
/// payload's entity lookups so [`data_frame_from_json`] restores them.
pub fn data_frame_to_json(frame: &DataFrame) -> DataFrameJson {
    let mut values = Vec::with_capacity(frame.fields.len());
    let mut entities = Vec::with_capacity(frame.fields.len());

    let fields = frame
        .fields
        .iter()
        .map(|field| {
            let (encoded, lookup) = encode_field_value_entities(&field.values);
            values.push(encoded);
            entities.push(lookup);

            FieldSchema {
                name: field.name.clone(),
                field_type: Some(field.field_type),
                config: (!field.config.is_empty()).then(|| field.config.clone()),
                labels: field.labels.clone(),
            }
        })
        .collect();

    let entities = entities.iter().any(Option::is_some).then_some(entities);

    DataFrameJson {
        schema_id: None,
        schema: Some(DataFrameSchema {
            ref_id: frame.ref_id.clone(),
            meta: frame.meta.clone(),
            name: frame.name.clone(),
            fields: Some(fields),
        }),
        data: Some(vec![DataFrameData { values, entities, ..Default::default() }]),
        changes: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> Result<DataFrame, FrameError> {
        data_frame_from_json(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn test_ragged_columns_are_padded() {
        let frame = decode(json!({
            "schema": { "fields": [ { "name": "a" }, { "name": "b" } ] },
            "data": [ { "values": [[1, 2, 3], [10, 20]] } ]
        }))
        .unwrap();

        assert_eq!(frame.length, 3);
        let b = frame.field("b").unwrap();
        assert_eq!(b.values, vec![FieldValue::Number(10.0), FieldValue::Number(20.0), FieldValue::Missing]);
        assert!(frame.fields.iter().all(|f| f.len() == frame.length));
    }

    #[test]
    fn test_missing_schema_is_fatal() {
        let err = decode(json!({ "data": [ { "values": [[1]] } ] })).unwrap_err();
        assert!(matches!(err, FrameError::MissingFields));

        let err = decode(json!({ "schema": { "name": "x" } })).unwrap_err();
        assert!(matches!(err, FrameError::MissingFields));
    }

    #[test]
    fn test_empty_field_list_yields_empty_frame() {
        let frame = decode(json!({ "schema": { "fields": [] } })).unwrap();
        assert!(frame.fields.is_empty());
        assert_eq!(frame.length, 0);
    }

    #[test]
    fn test_missing_column_array_is_filled() {
        let frame = decode(json!({
            "schema": { "fields": [ { "name": "a" }, { "name": "b", "type": "string" } ] },
            "data": [ { "values": [[1, 2]] } ]
        }))
        .unwrap();

        let b = frame.field("b").unwrap();
        assert_eq!(b.values, vec![FieldValue::Missing, FieldValue::Missing]);
        assert_eq!(b.field_type, FieldType::String);
    }

    #[test]
    fn test_types_declared_and_inferred() {
        let frame = decode(json!({
            "schema": { "fields": [
                { "name": "time", "config": { "unit": "ms" } },
                { "name": "value" },
                { "name": "declared", "type": "string" },
                { "name": "empty" },
                { "name": "flag" }
            ] },
            "data": [ { "values": [[1000], [null, 4.5], ["7"], [], ["true"]] } ]
        }))
        .unwrap();

        assert_eq!(frame.fields[0].field_type, FieldType::Time);
        assert_eq!(frame.fields[0].config.get("unit"), Some(&json!("ms")));
        assert_eq!(frame.fields[1].field_type, FieldType::Number);
        assert_eq!(frame.fields[2].field_type, FieldType::String);
        assert_eq!(frame.fields[3].field_type, FieldType::Other);
        assert_eq!(frame.fields[4].field_type, FieldType::Boolean);
        assert!(frame.fields[1].config.is_empty());
    }

    #[test]
    fn test_entities_applied_after_padding() {
        let frame = decode(json!({
            "schema": { "fields": [ { "name": "a", "type": "number" }, { "name": "b", "type": "number" } ] },
            "data": [ {
                "values": [[1, null, 3, 4], [null]],
                "entities": [ { "NaN": [1], "Inf": [9] }, { "NegInf": [0], "Undef": [3] } ]
            } ]
        }))
        .unwrap();

        let a = frame.field("a").unwrap();
        assert!(a.values[1].is_nan());
        assert_eq!(a.values[3], FieldValue::Number(4.0));
        assert_eq!(a.entities.nan, Some(vec![1]));

        let b = frame.field("b").unwrap();
        assert_eq!(b.values[0], FieldValue::Number(f64::NEG_INFINITY));
        assert_eq!(b.values[3], FieldValue::Missing);
    }

    #[test]
    fn test_malformed_entities_do_not_reject_message() {
        let frame = data_frame_from_json_str(
            r#"{
                "schema": { "fields": [ { "name": "a" }, { "name": "b" }, { "name": "c" } ] },
                "data": [ {
                    "values": [[1, null], [2, null], [3, null]],
                    "entities": [ { "NaN": [1.0] }, { "NaN": "1" }, "Inf" ]
                } ]
            }"#,
        )
        .unwrap();

        assert_eq!(frame.length, 2);
        for field in &frame.fields {
            assert_eq!(field.values[1], FieldValue::Null);
        }

        let frame = data_frame_from_json_str(
            r#"{ "schema": { "fields": [ { "name": "a" } ] },
                 "data": [ { "values": [[null]], "entities": [ { "Undef": { "at": [0] } } ] } ] }"#,
        )
        .unwrap();
        assert_eq!(frame.fields[0].values, vec![FieldValue::Null]);
    }

    #[test]
    fn test_only_first_payload_is_decoded() {
        let frame = decode(json!({
            "schema": { "fields": [ { "name": "a" } ] },
            "data": [ { "values": [[1]] }, { "values": [[2, 3]] } ]
        }))
        .unwrap();

        assert_eq!(frame.length, 1);
        assert_eq!(frame.fields[0].values, vec![FieldValue::Number(1.0)]);
    }

    #[test]
    fn test_schema_metadata_passes_through() {
        let frame = decode(json!({
            "schemaId": "s1",
            "schema": {
                "refId": "A",
                "name": "logs",
                "meta": { "preferredVisualisationType": "logs" },
                "fields": [ { "name": "line", "labels": { "job": "api", "shard": 3 } } ]
            },
            "data": [ { "values": [["x"]], "bases": [0], "factors": [1] } ]
        }))
        .unwrap();

        assert_eq!(frame.ref_id.as_deref(), Some("A"));
        assert_eq!(frame.name.as_deref(), Some("logs"));
        assert_eq!(frame.meta, Some(json!({ "preferredVisualisationType": "logs" })));
        let labels = frame.fields[0].labels.as_ref().unwrap();
        assert_eq!(labels.get("job").map(String::as_str), Some("api"));
        assert_eq!(labels.get("shard").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_no_payload_yields_zero_length() {
        let frame = decode(json!({ "schema": { "fields": [ { "name": "a" } ] } })).unwrap();
        assert_eq!(frame.length, 0);
        assert!(frame.fields[0].values.is_empty());
        assert_eq!(frame.fields[0].field_type, FieldType::Other);
    }

    #[test]
    fn test_round_trip_restores_sentinels() {
        let mut numbers = Field::new("value", FieldType::Number);
        numbers.values = vec![
            FieldValue::Number(1.5),
            FieldValue::Number(f64::NAN),
            FieldValue::Number(f64::INFINITY),
            FieldValue::Number(f64::NEG_INFINITY),
            FieldValue::Missing,
        ];
        let mut names = Field::new("name", FieldType::String);
        names.values = vec!["a".into(), "b".into(), FieldValue::Null, "d".into(), "e".into()];
        names.config.insert("displayName".to_string(), json!("Name"));

        let frame = DataFrame {
            name: Some("frame".to_string()),
            ref_id: Some("A".to_string()),
            meta: None,
            fields: vec![numbers, names],
            length: 5,
        };

        let text = serde_json::to_string(&data_frame_to_json(&frame)).unwrap();
        let decoded = data_frame_from_json_str(&text).unwrap();

        assert_eq!(decoded.length, 5);
        assert_eq!(decoded.ref_id.as_deref(), Some("A"));
        let values = &decoded.field("value").unwrap().values;
        assert_eq!(values[0], FieldValue::Number(1.5));
        assert!(values[1].is_nan());
        assert_eq!(values[2], FieldValue::Number(f64::INFINITY));
        assert_eq!(values[3], FieldValue::Number(f64::NEG_INFINITY));
        assert_eq!(values[4], FieldValue::Missing);

        let names = decoded.field("name").unwrap();
        assert_eq!(names.values, frame.fields[1].values);
        assert_eq!(names.field_type, FieldType::String);
        assert_eq!(names.config.get("displayName"), Some(&json!("Name")));
    }

    #[test]
    fn test_encoder_omits_entities_when_not_needed() {
        let mut field = Field::new("a", FieldType::Number);
        field.values = vec![FieldValue::Number(1.0)];
        let frame = DataFrame { fields: vec![field], length: 1, ..Default::default() };

        let encoded = serde_json::to_value(data_frame_to_json(&frame)).unwrap();
        assert_eq!(encoded["data"][0], json!({ "values": [[1.0]] }));
        assert_eq!(encoded["schema"]["fields"][0], json!({ "name": "a", "type": "number" }));
    }
}
