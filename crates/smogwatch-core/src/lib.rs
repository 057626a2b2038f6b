//! SmogWatch Core
//!
//! Core types and utilities shared across SmogWatch components.
//!
//! This crate provides:
//! - Event records, field values, and sensor reading types
//! - Error types and result handling
//! - The fixed inbound/outbound routing tables

pub mod error;
pub mod routing;
pub mod types;

pub use error::{Error, Result};
pub use routing::{alert_topic, inbound_topics, SensorKind};
pub use types::{
    AlertPayload, EventRecord, FieldType, FieldValue, MatchedEvent, OutboundAlert, SensorReading,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::routing::SensorKind;
    pub use crate::types::{EventRecord, FieldValue, MatchedEvent, SensorReading};
}
