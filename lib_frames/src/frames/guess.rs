//! # Column Type Inference
//!
//! Used when a schema field arrives without a declared type. The first present
//! value of the column, together with the column name, decides the type.

use std::sync::OnceLock;

use regex::Regex;

use super::types::{FieldType, FieldValue};

fn number_pattern() -> &'static Regex {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    NUMBER.get_or_init(|| {
        Regex::new(r"(?i)^\s*(-?(\d+\.?\d*|\.\d+)(e[+-]?\d+)?|nan)\s*$").expect("number pattern is valid")
    })
}

/// Infers a type from a column name and one of its values.
///
/// A column literally named `time` or `date` is a time column regardless of value.
/// Numeric-looking strings count as numbers and `true`/`false` strings as booleans.
pub fn guess_field_type_from_name_and_value(name: &str, value: &FieldValue) -> FieldType {
    let lower = name.to_lowercase();
    if lower == "time" || lower == "date" {
        return FieldType::Time;
    }

    match value {
        FieldValue::Number(_) => FieldType::Number,
        FieldValue::Bool(_) => FieldType::Boolean,
        FieldValue::String(s) => {
            if number_pattern().is_match(s) {
                FieldType::Number
            } else if s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false") {
                FieldType::Boolean
            } else {
                FieldType::String
            }
        }
        FieldValue::Missing | FieldValue::Null | FieldValue::Json(_) => FieldType::Other,
    }
}

/// Infers the type of a whole column from its first non-missing value.
///
/// Falls back to `Other` when every value is missing or null.
pub fn guess_field_type(name: &str, values: &[FieldValue]) -> FieldType {
    values
        .iter()
        .find(|v| !v.is_absent())
        .map_or(FieldType::Other, |v| guess_field_type_from_name_and_value(name, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_from_value() {
        assert_eq!(guess_field_type_from_name_and_value("v", &FieldValue::Number(1.0)), FieldType::Number);
        assert_eq!(guess_field_type_from_name_and_value("v", &FieldValue::Number(f64::NAN)), FieldType::Number);
        assert_eq!(guess_field_type_from_name_and_value("v", &FieldValue::from(" 1.5e3 ")), FieldType::Number);
        assert_eq!(guess_field_type_from_name_and_value("v", &FieldValue::from("TRUE")), FieldType::Boolean);
        assert_eq!(guess_field_type_from_name_and_value("v", &FieldValue::from("hello")), FieldType::String);
        assert_eq!(guess_field_type_from_name_and_value("v", &FieldValue::Bool(false)), FieldType::Boolean);
        assert_eq!(
            guess_field_type_from_name_and_value("v", &FieldValue::Json(serde_json::json!({}))),
            FieldType::Other
        );
    }

    #[test]
    fn test_name_hint_wins() {
        assert_eq!(guess_field_type_from_name_and_value("Time", &FieldValue::from("x")), FieldType::Time);
        assert_eq!(guess_field_type_from_name_and_value("date", &FieldValue::Number(1.0)), FieldType::Time);
    }

    #[test]
    fn test_guess_column_skips_missing() {
        let values = vec![FieldValue::Missing, FieldValue::Null, FieldValue::from("a")];
        assert_eq!(guess_field_type("c", &values), FieldType::String);
        assert_eq!(guess_field_type("c", &[FieldValue::Missing, FieldValue::Null]), FieldType::Other);
        assert_eq!(guess_field_type("c", &[]), FieldType::Other);
    }
}
