//! # Frame Types
//!
//! A `DataFrame` is a named collection of equal-length typed columns (`Field`s).
//! Column values are held as `FieldValue`, a tagged union over the primitive kinds a
//! JSON transfer can carry plus the markers JSON cannot express directly.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::entities::FieldValueEntityLookup;

/// Key/value pairs identifying a sub-series, e.g. `{job="api", level="error"}`.
pub type Labels = BTreeMap<String, String>;

/// Opaque display/formatting attributes passed through untouched.
pub type FieldConfig = serde_json::Map<String, Value>;

/// The closed set of column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Timestamps (epoch numbers or ISO strings).
    Time,
    /// Numeric values, including NaN and ±Infinity.
    Number,
    /// Free text.
    String,
    /// `true`/`false` values.
    Boolean,
    /// Anything else (objects, arrays, unknown).
    Other,
}

impl FieldType {
    /// Maps a wire name to a type. Unknown names fall back to `Other`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "time" => FieldType::Time,
            "number" => FieldType::Number,
            "string" => FieldType::String,
            "boolean" => FieldType::Boolean,
            _ => FieldType::Other,
        }
    }

    /// The wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Time => "time",
            FieldType::Number => "number",
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Other => "other",
        }
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(FieldType::from_name(&name))
    }
}

/// One cell of a column.
///
/// `Number` carries NaN and ±Infinity as ordinary `f64` values; `Missing` is the
/// marker for absent values (padding, joins), distinct from an explicit JSON `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// No value at this position.
    Missing,
    /// An explicit JSON `null`.
    Null,
    /// A number, possibly non-finite.
    Number(f64),
    /// A string.
    String(String),
    /// A boolean.
    Bool(bool),
    /// Nested JSON (objects and arrays), e.g. a label set.
    Json(Value),
}

impl FieldValue {
    /// Converts a raw JSON value into a cell.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => n.as_f64().map_or(FieldValue::Null, FieldValue::Number),
            Value::String(s) => FieldValue::String(s),
            other => FieldValue::Json(other),
        }
    }

    /// Converts the cell back into JSON. Values JSON cannot express become `null`;
    /// their identity travels separately in a `FieldValueEntityLookup`.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Missing | FieldValue::Null => Value::Null,
            FieldValue::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Json(v) => v.clone(),
        }
    }

    /// True for the missing marker.
    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }

    /// True for the missing marker and for JSON `null`; type inference skips both.
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Missing | FieldValue::Null)
    }

    /// True for a NaN number.
    pub fn is_nan(&self) -> bool {
        matches!(self, FieldValue::Number(n) if n.is_nan())
    }

    /// The numeric payload, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<&Labels> for FieldValue {
    fn from(labels: &Labels) -> Self {
        let map = labels
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>();
        FieldValue::Json(Value::Object(map))
    }
}

/// A typed, named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub config: FieldConfig,
    pub labels: Option<Labels>,
    pub values: Vec<FieldValue>,
    /// Positions restored from entity markers during decode. Empty when nothing
    /// was restored; consumers may use it as a hint.
    pub entities: FieldValueEntityLookup,
}

impl Field {
    /// Creates an empty column with no config or labels.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            config: FieldConfig::new(),
            labels: None,
            values: Vec::new(),
            entities: FieldValueEntityLookup::default(),
        }
    }

    /// Number of values held by the column.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the column holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A table of equal-length columns plus pass-through metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFrame {
    pub name: Option<String>,
    /// The query/result identifier this frame answers.
    pub ref_id: Option<String>,
    /// Result metadata, passed through untouched.
    pub meta: Option<Value>,
    pub fields: Vec<Field>,
    /// Row count; every column holds exactly this many values.
    pub length: usize,
}

impl DataFrame {
    /// Looks up a column by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Row count.
    pub fn len(&self) -> usize {
        self.length
    }

    /// True if the frame has no rows.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_type_unknown_name_is_other() {
        let t: FieldType = serde_json::from_value(json!("geo")).unwrap();
        assert_eq!(t, FieldType::Other);
        let t: FieldType = serde_json::from_value(json!("time")).unwrap();
        assert_eq!(t, FieldType::Time);
        assert_eq!(serde_json::to_value(FieldType::Boolean).unwrap(), json!("boolean"));
    }

    #[test]
    fn test_field_value_json_conversion() {
        assert_eq!(FieldValue::from_json(json!(1.5)), FieldValue::Number(1.5));
        assert_eq!(FieldValue::from_json(json!(null)), FieldValue::Null);
        assert_eq!(FieldValue::from_json(json!("a")), FieldValue::from("a"));
        assert_eq!(FieldValue::from_json(json!({"a": 1})), FieldValue::Json(json!({"a": 1})));

        assert_eq!(FieldValue::Number(f64::NAN).to_json(), json!(null));
        assert_eq!(FieldValue::Number(f64::NEG_INFINITY).to_json(), json!(null));
        assert_eq!(FieldValue::Missing.to_json(), json!(null));
        assert_eq!(FieldValue::Number(2.0).to_json(), json!(2.0));
    }

    #[test]
    fn test_labels_become_json_object() {
        let mut labels = Labels::new();
        labels.insert("job".to_string(), "api".to_string());
        assert_eq!(FieldValue::from(&labels), FieldValue::Json(json!({"job": "api"})));
    }
}
