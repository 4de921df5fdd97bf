//! # Tail Messages
//!
//! Inbound websocket messages come in two shapes:
//!
//! - a log tail response, `{"streams": [{"stream": {...}, "values": [[tsNs, line]]}]}`,
//!   appended one row per entry into the fixed logs columns;
//! - a frame transfer message (`DataFrameJson`), whose payloads and `changes` are
//!   appended row by row, matching columns by name.
//!
//! Both paths only ever append to the [`CircularDataFrame`]; old rows fall out of the
//! ring once it is full.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use super::target::LiveTarget;
use crate::frames::{
    find_unique_labels, format_labels, parse_labels, CircularDataFrame, DataFrameJson, FieldType, FieldValue,
    FrameError, Labels,
};
use crate::frames::json::normalize_payload;

pub const TS_FIELD: &str = "ts";
pub const TS_NS_FIELD: &str = "tsNs";
pub const LINE_FIELD: &str = "line";
pub const LABELS_FIELD: &str = "labels";
pub const ID_FIELD: &str = "id";

/// One label set and its entries in a tail response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LokiStream {
    #[serde(default)]
    pub stream: Labels,
    /// `[nanosecond timestamp, line]` pairs.
    #[serde(default)]
    pub values: Vec<(String, String)>,
}

/// An entry the server could not deliver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LokiDroppedEntry {
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub timestamp: String,
}

/// # Loki Tail Response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LokiTailResponse {
    #[serde(default)]
    pub streams: Vec<LokiStream>,
    #[serde(default)]
    pub dropped_entries: Option<Vec<LokiDroppedEntry>>,
}

/// A parsed inbound message.
#[derive(Debug, Clone)]
pub enum TailMessage {
    Loki(LokiTailResponse),
    Frame(DataFrameJson),
}

impl TailMessage {
    /// Parses message text, telling the two shapes apart by the top-level `streams` key.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let is_tail = value.as_object().is_some_and(|obj| obj.contains_key("streams"));
        if is_tail {
            Ok(TailMessage::Loki(serde_json::from_value(value)?))
        } else {
            Ok(TailMessage::Frame(serde_json::from_value(value)?))
        }
    }

    /// Appends the message to `buffer` and returns the number of rows written.
    pub fn append_to(self, buffer: &mut CircularDataFrame) -> Result<usize, FrameError> {
        match self {
            TailMessage::Loki(response) => Ok(append_response_to_buffered_data(&response, buffer)),
            TailMessage::Frame(dto) => append_frame_json(dto, buffer),
        }
    }
}

fn field_config(display_name: &str) -> Map<String, Value> {
    let mut config = Map::new();
    config.insert("displayName".to_string(), Value::String(display_name.to_string()));
    config
}

/// Builds the empty logs buffer for a target: `ts`, `tsNs`, `line` (carrying the
/// query's label matchers), `labels` and `id`.
///
/// # Errors
/// [`FrameError::InvalidCapacity`] if the target asks for zero rows.
pub fn new_tail_frame(target: &LiveTarget) -> Result<CircularDataFrame, FrameError> {
    let mut frame = CircularDataFrame::new(target.size)?;
    frame.ref_id = Some(target.ref_id.clone());
    frame.meta = Some(json!({ "preferredVisualisationType": "logs" }));

    frame.add_field(TS_FIELD, FieldType::Time).config(field_config("Time"));
    frame.add_field(TS_NS_FIELD, FieldType::Time).config(field_config("Time ns"));
    frame.add_field(LINE_FIELD, FieldType::String).labels(parse_labels(&target.query));
    frame.add_field(LABELS_FIELD, FieldType::Other);
    frame.add_field(ID_FIELD, FieldType::String);
    Ok(frame)
}

/// Converts a nanosecond epoch string to an ISO-8601 UTC timestamp with millisecond
/// precision.
fn nanos_to_iso(ts_ns: &str) -> Option<String> {
    let nanos: i128 = ts_ns.trim().parse().ok()?;
    let millis = i64::try_from(nanos.div_euclid(1_000_000)).ok()?;
    let time = DateTime::<Utc>::from_timestamp_millis(millis)?;
    Some(time.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Stable row identity: hex SHA-256 of timestamp, full label set and line.
fn row_id(ts_ns: &str, labels: &Labels, line: &str) -> String {
    let digest = Sha256::digest(format!("{}_{}_{}", ts_ns, format_labels(labels), line).as_bytes());
    hex::encode(digest)
}

/// Appends every entry of a tail response to a logs buffer built by
/// [`new_tail_frame`] and returns the number of rows written.
///
/// The `labels` column holds only the labels that differ from the `line` column's
/// labels, the ones the query already pins down.
pub fn append_response_to_buffered_data(response: &LokiTailResponse, buffer: &mut CircularDataFrame) -> usize {
    let common = buffer
        .schema()
        .into_iter()
        .find(|f| f.name == LINE_FIELD)
        .and_then(|f| f.labels)
        .unwrap_or_default();

    if let Some(dropped) = response.dropped_entries.as_ref().filter(|d| !d.is_empty()) {
        tracing::warn!("Tail server dropped {} entries", dropped.len());
    }

    let mut appended = 0;
    for stream in &response.streams {
        let unique = find_unique_labels(&stream.stream, &common);
        for (ts_ns, line) in &stream.values {
            let ts = nanos_to_iso(ts_ns).map_or(FieldValue::Missing, FieldValue::String);
            if ts.is_missing() {
                tracing::debug!("Unparseable tail timestamp '{}'", ts_ns);
            }
            buffer.append([
                (TS_FIELD, ts),
                (TS_NS_FIELD, FieldValue::from(ts_ns.as_str())),
                (LINE_FIELD, FieldValue::from(line.as_str())),
                (LABELS_FIELD, FieldValue::from(&unique)),
                (ID_FIELD, FieldValue::String(row_id(ts_ns, &stream.stream, line))),
            ]);
            appended += 1;
        }
    }
    appended
}

/// Appends every payload of a transfer message, then its `changes`, to `buffer` and
/// returns the number of rows written.
///
/// Columns are matched by name; buffer columns the message lacks get
/// [`FieldValue::Missing`] and message columns the buffer lacks are ignored. A
/// payload's `stream` label set fills the `labels` column unless the message has
/// its own `labels` column.
///
/// # Errors
/// [`FrameError::MissingFields`] if the message has payloads but no field list.
pub fn append_frame_json(dto: DataFrameJson, buffer: &mut CircularDataFrame) -> Result<usize, FrameError> {
    let names: Option<Vec<String>> = dto
        .schema
        .and_then(|schema| schema.fields)
        .map(|fields| fields.into_iter().map(|f| f.name).collect());

    let mut appended = 0;

    if let Some(payloads) = dto.data.filter(|d| !d.is_empty()) {
        let names = names.ok_or(FrameError::MissingFields)?;
        let fill_labels = buffer.has_field(LABELS_FIELD) && !names.iter().any(|n| n == LABELS_FIELD);

        for payload in payloads {
            let stream = payload.stream.clone();
            let (length, columns) = normalize_payload(names.len(), Some(payload));
            let mut columns: Vec<_> = columns.into_iter().map(|c| c.values.into_iter()).collect();

            for _ in 0..length {
                let mut row: Vec<(&str, FieldValue)> = names
                    .iter()
                    .map(String::as_str)
                    .zip(columns.iter_mut().map(|c| c.next().unwrap_or(FieldValue::Missing)))
                    .collect();
                if let (true, Some(stream)) = (fill_labels, &stream) {
                    row.push((LABELS_FIELD, FieldValue::from(stream)));
                }
                buffer.append(row);
                appended += 1;
            }
        }
    }

    if let Some(changes) = dto.changes {
        let length = changes.values().map(Vec::len).max().unwrap_or(0);
        let (names, mut columns): (Vec<String>, Vec<_>) =
            changes.into_iter().map(|(name, values)| (name, values.into_iter())).unzip();

        for _ in 0..length {
            let row = names
                .iter()
                .map(String::as_str)
                .zip(columns.iter_mut().map(|c| c.next().map_or(FieldValue::Missing, FieldValue::from_json)));
            buffer.append(row);
            appended += 1;
        }
    }

    Ok(appended)
}
