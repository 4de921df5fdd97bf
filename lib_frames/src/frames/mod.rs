//! # Frames Module
//!
//! The columnar data model and its JSON transfer codec.
//!
//! ## Contained Modules:
//!
//! - **`types`**: `DataFrame`, `Field`, `FieldType` and the `FieldValue` tagged union.
//! - **`entities`**: restores NaN, ±Infinity and missing values that JSON cannot encode.
//! - **`guess`**: infers a column type from its name and first present value.
//! - **`labels`**: label-selector parsing and label set helpers.
//! - **`json`**: the schema/data transfer format, decoder and encoder.
//! - **`circular`**: a fixed-capacity frame that evicts its oldest row when full.

use thiserror::Error;

/// Data model shared by every other frames module.
pub mod types;
/// Positional restoration of non-JSON-safe values.
pub mod entities;
/// Column type inference.
pub mod guess;
/// Label set parsing and formatting.
pub mod labels;
/// The JSON transfer representation of a frame.
pub mod json;
/// The ring-buffered frame used by live streams.
pub mod circular;

// --- Public API Re-exports ---
pub use circular::{CircularDataFrame, FieldSettings};
pub use entities::{decode_field_value_entities, encode_field_value_entities, FieldValueEntityLookup};
pub use guess::{guess_field_type, guess_field_type_from_name_and_value};
pub use json::{data_frame_from_json, data_frame_to_json, DataFrameData, DataFrameJson, DataFrameSchema, FieldSchema};
pub use labels::{find_unique_labels, format_labels, parse_labels};
pub use types::{DataFrame, Field, FieldConfig, FieldType, FieldValue, Labels};

/// Errors raised while decoding frames or building buffers.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The message carries no schema or no field definitions, so the frame shape is unknown.
    #[error("JSON needs a fields definition")]
    MissingFields,

    /// A circular frame was requested with a capacity of zero.
    #[error("Circular frame capacity must be positive, got {0}")]
    InvalidCapacity(usize),

    /// The message text is not valid JSON for the transfer format.
    #[error("Invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),
}
