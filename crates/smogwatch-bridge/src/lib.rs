//! SmogWatch Bridge
//!
//! Connects the evaluation engine to an MQTT broker: sensor readings are
//! ingested from the inbound topics, the built-in rules average them per
//! station over a sliding minute, and every match is published as an alert
//! on the topic mapped to its event type.

pub mod app;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod ingest;
pub mod router;
pub mod simulate;
pub mod transport;

pub use app::Bridge;
pub use crate::config::{BridgeConfig, ConfigOverrides, DeliveryConfig, MetricsConfig, MqttConfig};
pub use delivery::{DeliveryHandle, DeliverySettings, DeliveryWorker};
pub use ingest::IngestionAdapter;
pub use router::AlertRouter;
pub use transport::{InboundMessage, MqttTransport, Qos, Transport};
