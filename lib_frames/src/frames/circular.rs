//! # Circular Data Frame
//!
//! A frame whose columns are fixed-capacity rings sharing one write cursor. Once
//! the frame holds `capacity` rows, every append overwrites the oldest row. All
//! columns advance together, so a row stays aligned across columns.
//!
//! The physical layout is never exposed: [`CircularDataFrame::snapshot`] and
//! [`CircularDataFrame::column`] always return rows oldest first.

use serde_json::Value;

use super::json::FieldSchema;
use super::types::{DataFrame, Field, FieldConfig, FieldType, FieldValue, Labels};
use super::FrameError;

/// Column metadata of a [`CircularDataFrame`]. Values stay owned by the frame.
#[derive(Debug)]
pub struct FieldSettings<'a> {
    field: &'a mut Field,
}

impl FieldSettings<'_> {
    pub fn config(self, config: FieldConfig) -> Self {
        self.field.config = config;
        self
    }

    pub fn labels(self, labels: Labels) -> Self {
        self.field.labels = Some(labels);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CircularDataFrame {
    capacity: usize,
    /// Physical column storage. Each column holds `length` values.
    fields: Vec<Field>,
    /// Physical slot the next append overwrites once the frame is full.
    cursor: usize,
    length: usize,
    pub name: Option<String>,
    pub ref_id: Option<String>,
    pub meta: Option<Value>,
}

impl CircularDataFrame {
    /// Creates an empty frame holding at most `capacity` rows.
    ///
    /// # Errors
    /// [`FrameError::InvalidCapacity`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, FrameError> {
        if capacity == 0 {
            return Err(FrameError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            fields: Vec::new(),
            cursor: 0,
            length: 0,
            name: None,
            ref_id: None,
            meta: None,
        })
    }

    /// Maximum number of rows kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of rows, never above the capacity.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// True once appends start evicting rows.
    pub fn is_full(&self) -> bool {
        self.length == self.capacity
    }

    /// Declares a column and returns a handle to set its config and labels.
    ///
    /// A column declared after rows were written is backfilled with
    /// [`FieldValue::Missing`] for those rows. Declaring an existing name returns the
    /// existing column unchanged.
    pub fn add_field(&mut self, name: impl Into<String>, field_type: FieldType) -> FieldSettings<'_> {
        let name = name.into();
        let idx = match self.fields.iter().position(|f| f.name == name) {
            Some(idx) => {
                tracing::debug!("Field '{}' already declared on circular frame", name);
                idx
            }
            None => {
                let mut field = Field::new(name, field_type);
                field.values = vec![FieldValue::Missing; self.length];
                self.fields.push(field);
                self.fields.len() - 1
            }
        };
        FieldSettings { field: &mut self.fields[idx] }
    }

    /// Column definitions in declaration order.
    pub fn schema(&self) -> Vec<FieldSchema> {
        self.fields
            .iter()
            .map(|f| FieldSchema {
                name: f.name.clone(),
                field_type: Some(f.field_type),
                config: Some(f.config.clone()),
                labels: f.labels.clone(),
            })
            .collect()
    }

    /// True if a column with this name is declared.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Appends one row given as `(column name, value)` pairs.
    ///
    /// Declared columns absent from `row` receive [`FieldValue::Missing`]; names that
    /// match no declared column are ignored.
    pub fn append<I, K>(&mut self, row: I)
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: AsRef<str>,
    {
        let mut values = vec![FieldValue::Missing; self.fields.len()];
        for (name, value) in row {
            match self.fields.iter().position(|f| f.name == name.as_ref()) {
                Some(idx) => values[idx] = value,
                None => tracing::trace!("Ignoring value for undeclared field '{}'", name.as_ref()),
            }
        }
        self.append_values(values);
    }

    /// Appends one row given positionally in declaration order. Short rows are padded
    /// with [`FieldValue::Missing`]; extra values are ignored.
    pub fn append_values(&mut self, row: Vec<FieldValue>) {
        let mut row = row.into_iter();
        let slot = if self.length < self.capacity { None } else { Some(self.cursor) };

        for field in &mut self.fields {
            let value = row.next().unwrap_or(FieldValue::Missing);
            match slot {
                Some(slot) => field.values[slot] = value,
                None => field.values.push(value),
            }
        }

        match slot {
            Some(slot) => self.cursor = (slot + 1) % self.capacity,
            None => {
                self.length += 1;
                self.cursor = self.length % self.capacity;
            }
        }
    }

    /// Physical indices of the rows, oldest first.
    fn logical_indices(&self) -> impl Iterator<Item = usize> + '_ {
        let start = if self.is_full() { self.cursor } else { 0 };
        (0..self.length).map(move |i| (start + i) % self.capacity)
    }

    /// The values of one column, oldest first.
    pub fn column(&self, name: &str) -> Option<Vec<FieldValue>> {
        let field = self.fields.iter().find(|f| f.name == name)?;
        Some(self.logical_indices().map(|i| field.values[i].clone()).collect())
    }

    /// Copies the buffer into an ordinary frame with rows oldest first.
    pub fn snapshot(&self) -> DataFrame {
        let fields = self
            .fields
            .iter()
            .map(|field| Field {
                name: field.name.clone(),
                field_type: field.field_type,
                config: field.config.clone(),
                labels: field.labels.clone(),
                values: self.logical_indices().map(|i| field.values[i].clone()).collect(),
                entities: Default::default(),
            })
            .collect();

        DataFrame {
            name: self.name.clone(),
            ref_id: self.ref_id.clone(),
            meta: self.meta.clone(),
            fields,
            length: self.length,
        }
    }
}
