//! # Sample Frames
//!
//! Value types for one ingestion event and for the persisted record layout.
//!
//! An ingestion message from the sensor peer looks like:
//!
//! ```json
//! {"sensor_data": {"uva": 1.2, "uvb": 3.3}, "sensor_units": {"uva": "%", "uvb": "%"}}
//! ```
//!
//! The record stamps each `sensor_data` object with a `timestamp` (epoch seconds)
//! and keeps the first `sensor_units` object it sees.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{ArchiverError, Result};

/// Name of the field every stored frame carries
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Field name to unit string, in first-seen order
pub type UnitMap = IndexMap<String, String>;

/// A single sensor reading: numeric or free text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Convert an arbitrary JSON value, rendering non-scalar values as text
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(FieldValue::Number)
                .unwrap_or_else(|| FieldValue::Text(n.to_string())),
            Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// One timestamped set of keyed sensor readings
///
/// Serialized flat: the reading fields followed by `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleFrame {
    #[serde(flatten)]
    pub fields: IndexMap<String, FieldValue>,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

impl SampleFrame {
    pub fn new(fields: IndexMap<String, FieldValue>, timestamp: f64) -> Self {
        Self { fields, timestamp }
    }

    /// Look up a reading by field name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// Serialized form of a sealed record, as written to an archive file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub sensor_data: Vec<SampleFrame>,
    pub sensor_units: UnitMap,
}

impl RecordSnapshot {
    /// Timestamp of the first frame, which names the archive file
    pub fn first_timestamp(&self) -> Option<f64> {
        self.sensor_data.first().map(|frame| frame.timestamp)
    }
}

/// A validated ingestion message, not yet stamped
#[derive(Debug, Clone, PartialEq)]
pub struct IngestMessage {
    pub sensor_data: IndexMap<String, FieldValue>,
    pub sensor_units: UnitMap,
}

impl IngestMessage {
    /// Extract `sensor_data` and `sensor_units` from a raw peer message
    ///
    /// # Errors
    ///
    /// Returns `MalformedMessage` if the message is not an object or either
    /// key is missing or not an object. Field values are not validated.
    pub fn from_value(message: &Value) -> Result<Self> {
        let object = message
            .as_object()
            .ok_or_else(|| ArchiverError::MalformedMessage("message is not a JSON object".to_string()))?;

        let data = object
            .get("sensor_data")
            .ok_or_else(|| ArchiverError::MalformedMessage("missing sensor_data".to_string()))?
            .as_object()
            .ok_or_else(|| ArchiverError::MalformedMessage("sensor_data is not an object".to_string()))?;

        let units = object
            .get("sensor_units")
            .ok_or_else(|| ArchiverError::MalformedMessage("missing sensor_units".to_string()))?
            .as_object()
            .ok_or_else(|| ArchiverError::MalformedMessage("sensor_units is not an object".to_string()))?;

        let sensor_data = data
            .iter()
            .map(|(name, value)| (name.clone(), FieldValue::from_json(value)))
            .collect();

        let sensor_units = units
            .iter()
            .map(|(name, unit)| {
                let unit = match unit {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), unit)
            })
            .collect();

        Ok(Self {
            sensor_data,
            sensor_units,
        })
    }

    /// Stamp the readings, replacing any peer-supplied `timestamp`
    pub fn into_frame(self, timestamp: f64) -> (SampleFrame, UnitMap) {
        let mut fields = self.sensor_data;
        fields.shift_remove(TIMESTAMP_FIELD);
        (SampleFrame::new(fields, timestamp), self.sensor_units)
    }
}
