//! # Entity Codec
//!
//! JSON cannot encode NaN, Infinity, -Infinity or an absent value. The transfer
//! format writes those cells as `null` and lists their positions per column in a
//! `FieldValueEntityLookup`; decoding overwrites each listed position with its
//! sentinel.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::types::FieldValue;

/// Positions of non-JSON-safe values within one column.
///
/// Positions are zero-based. They are kept signed on the wire so that malformed
/// (negative) positions are skipped instead of failing the whole message. A
/// marker that is not a list, or list items that are not integers, are dropped
/// the same way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValueEntityLookup {
    #[serde(rename = "NaN", default, deserialize_with = "lenient_positions", skip_serializing_if = "Option::is_none")]
    pub nan: Option<Vec<i64>>,
    /// Missing because of absence or join.
    #[serde(rename = "Undef", default, deserialize_with = "lenient_positions", skip_serializing_if = "Option::is_none")]
    pub undef: Option<Vec<i64>>,
    #[serde(rename = "Inf", default, deserialize_with = "lenient_positions", skip_serializing_if = "Option::is_none")]
    pub inf: Option<Vec<i64>>,
    #[serde(rename = "NegInf", default, deserialize_with = "lenient_positions", skip_serializing_if = "Option::is_none")]
    pub neg_inf: Option<Vec<i64>>,
}

fn lenient_positions<'de, D>(deserializer: D) -> Result<Option<Vec<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => Some(
            items
                .into_iter()
                .filter_map(|item| {
                    let idx = item.as_i64();
                    if idx.is_none() {
                        tracing::trace!("Skipping non-integer entity position {}", item);
                    }
                    idx
                })
                .collect(),
        ),
        Some(Value::Null) | None => None,
        Some(other) => {
            tracing::trace!("Skipping entity marker that is not a list: {}", other);
            None
        }
    })
}

/// Reads a payload's per-column lookups. Entries that are not objects count as
/// absent; a non-list value drops the lookups altogether.
pub(crate) fn lenient_entities<'de, D>(deserializer: D) -> Result<Option<Vec<Option<FieldValueEntityLookup>>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => Some(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(_) => serde_json::from_value(item).ok(),
                    _ => None,
                })
                .collect(),
        ),
        Some(Value::Null) | None => None,
        Some(other) => {
            tracing::trace!("Skipping entities that are not a list: {}", other);
            None
        }
    })
}

impl FieldValueEntityLookup {
    /// True when no marker lists any position.
    pub fn is_empty(&self) -> bool {
        [&self.nan, &self.undef, &self.inf, &self.neg_inf]
            .iter()
            .all(|list| match list {
                Some(positions) => positions.is_empty(),
                None => true,
            })
    }

    fn markers(&self) -> [(Option<&Vec<i64>>, FieldValue); 4] {
        [
            (self.nan.as_ref(), FieldValue::Number(f64::NAN)),
            (self.undef.as_ref(), FieldValue::Missing),
            (self.inf.as_ref(), FieldValue::Number(f64::INFINITY)),
            (self.neg_inf.as_ref(), FieldValue::Number(f64::NEG_INFINITY)),
        ]
    }
}

/// Overwrites every position listed in `lookup` with the marker's sentinel.
///
/// Positions outside `values` are ignored.
pub fn decode_field_value_entities(lookup: &FieldValueEntityLookup, values: &mut [FieldValue]) {
    for (positions, sentinel) in lookup.markers() {
        let Some(positions) = positions else { continue };
        for &idx in positions {
            match usize::try_from(idx) {
                Ok(idx) if idx < values.len() => values[idx] = sentinel.clone(),
                _ => tracing::trace!("Skipping out-of-range entity position {}", idx),
            }
        }
    }
}

/// Inverse of [`decode_field_value_entities`]: converts a column to JSON values and
/// records where NaN, ±Infinity and missing cells were written as `null`.
///
/// Returns `None` for the lookup when the column needed no restoration.
pub fn encode_field_value_entities(values: &[FieldValue]) -> (Vec<Value>, Option<FieldValueEntityLookup>) {
    let mut lookup = FieldValueEntityLookup::default();

    let encoded = values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            let slot = match value {
                FieldValue::Missing => Some(&mut lookup.undef),
                FieldValue::Number(n) if n.is_nan() => Some(&mut lookup.nan),
                FieldValue::Number(n) if *n == f64::INFINITY => Some(&mut lookup.inf),
                FieldValue::Number(n) if *n == f64::NEG_INFINITY => Some(&mut lookup.neg_inf),
                _ => None,
            };
            if let Some(slot) = slot {
                slot.get_or_insert_with(Vec::new).push(idx as i64);
            }
            value.to_json()
        })
        .collect();

    if lookup.is_empty() {
        (encoded, None)
    } else {
        (encoded, Some(lookup))
    }
}
