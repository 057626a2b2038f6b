//! Core types for SmogWatch

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// 64-bit signed integer
    Long,
    /// 64-bit float
    Double,
    /// UTF-8 string
    String,
}

impl FieldType {
    /// Whether values of this type can be aggregated
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    /// Whether `value` conforms to this type (longs widen to doubles)
    pub fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (Self::Long, FieldValue::Long(_))
                | (Self::Double, FieldValue::Double(_))
                | (Self::Double, FieldValue::Long(_))
                | (Self::String, FieldValue::Str(_))
        )
    }
}

/// A single field value carried by an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Long(i64),
    Double(f64),
    Str(String),
}

impl FieldValue {
    /// Numeric view of the value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Long(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            Self::Str(_) => None,
        }
    }

    /// Integer view of the value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// String view of the value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Str(v) => f.write_str(v),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

/// An event as seen by the evaluation runtime: named fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl EventRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a field
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Get a field by name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Iterate over all fields
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A reading published by a monitoring station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Epoch seconds at the station
    pub timestamp: i64,

    /// Station identifier
    pub station: String,

    /// Measured value (µg/m³ or relative humidity %)
    pub value: f64,
}

impl SensorReading {
    /// Create a new reading
    pub fn new(timestamp: i64, station: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp,
            station: station.into(),
            value,
        }
    }
}

impl From<SensorReading> for EventRecord {
    fn from(reading: SensorReading) -> Self {
        EventRecord::new()
            .with("timestamp", reading.timestamp)
            .with("station", reading.station)
            .with("value", reading.value)
    }
}

/// Event produced by a rule when its condition holds
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedEvent {
    /// Name of the produced event type (the rule's insert-into target)
    pub event_type: String,

    /// Produced fields
    pub record: EventRecord,
}

impl MatchedEvent {
    /// Create a new matched event
    pub fn new(event_type: impl Into<String>, record: EventRecord) -> Self {
        Self {
            event_type: event_type.into(),
            record,
        }
    }
}

/// Outbound alert body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub timestamp: i64,
    pub station: String,
    pub value: f64,
}

/// An alert ready for delivery
#[derive(Debug, Clone)]
pub struct OutboundAlert {
    /// Destination topic
    pub topic: &'static str,

    /// Serialized payload
    pub payload: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_accepts() {
        assert!(FieldType::Double.accepts(&FieldValue::Long(3)));
        assert!(FieldType::Double.accepts(&FieldValue::Double(3.5)));
        assert!(!FieldType::Long.accepts(&FieldValue::Double(3.5)));
        assert!(!FieldType::String.accepts(&FieldValue::Long(1)));
        assert!(FieldType::Double.is_numeric());
        assert!(!FieldType::String.is_numeric());
    }

    #[test]
    fn test_reading_into_record() {
        let record: EventRecord = SensorReading::new(1_700_000_000, "A1", 42.5).into();

        assert_eq!(record.len(), 3);
        assert_eq!(record.get("timestamp"), Some(&FieldValue::Long(1_700_000_000)));
        assert_eq!(record.get("station").and_then(|v| v.as_str()), Some("A1"));
        assert_eq!(record.get("value").and_then(|v| v.as_f64()), Some(42.5));
    }

    #[test]
    fn test_reading_deserialization() {
        let json = r#"{"timestamp": 1700000000, "value": 12.0, "station": "A3"}"#;
        let reading: SensorReading = serde_json::from_str(json).unwrap();

        assert_eq!(reading.station, "A3");
        assert_eq!(reading.value, 12.0);
    }
}
