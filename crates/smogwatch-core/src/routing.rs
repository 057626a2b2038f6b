//! Fixed topic/type routing tables
//!
//! These tables are the single source of truth for which inbound topic
//! carries which sensor event type, and which matched event type is
//! published on which alert topic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of sensor reading accepted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    Pm10,
    Pm25,
    Humidity,
}

/// Inbound topic → sensor kind
pub const INBOUND_ROUTES: &[(&str, SensorKind)] = &[
    ("pm10topic", SensorKind::Pm10),
    ("pm25topic", SensorKind::Pm25),
    ("humiditytopic", SensorKind::Humidity),
];

/// Matched event type → outbound alert topic
pub const ALERT_ROUTES: &[(&str, &str)] = &[
    ("HighPM10Level", "highpm10topic"),
    ("HighPM25Level", "highpm25topic"),
    ("HighHumidityPercentage", "highhumiditytopic"),
];

impl SensorKind {
    /// All sensor kinds, in table order
    pub const ALL: [SensorKind; 3] = [SensorKind::Pm10, SensorKind::Pm25, SensorKind::Humidity];

    /// Event type name the runtime knows this kind by
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Pm10 => "PM10Event",
            Self::Pm25 => "PM25Event",
            Self::Humidity => "HumidityEvent",
        }
    }

    /// Topic readings of this kind arrive on
    pub fn inbound_topic(&self) -> &'static str {
        INBOUND_ROUTES
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(topic, _)| *topic)
            .unwrap_or_default()
    }

    /// Resolve the kind carried by an inbound topic
    pub fn from_topic(topic: &str) -> Option<Self> {
        INBOUND_ROUTES
            .iter()
            .find(|(t, _)| *t == topic)
            .map(|(_, kind)| *kind)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Outbound topic for a matched event type, if one is mapped
pub fn alert_topic(event_type: &str) -> Option<&'static str> {
    ALERT_ROUTES
        .iter()
        .find(|(name, _)| *name == event_type)
        .map(|(_, topic)| *topic)
}

/// All inbound topics the ingestion side subscribes to
pub fn inbound_topics() -> impl Iterator<Item = &'static str> {
    INBOUND_ROUTES.iter().map(|(topic, _)| *topic)
}
