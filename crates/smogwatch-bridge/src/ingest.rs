//! Sensor reading ingestion
//!
//! Decodes readings arriving on the fixed inbound topics and feeds them to
//! the engine under the event type their topic carries.

use smogwatch_core::{inbound_topics, Error, Result, SensorKind, SensorReading};
use smogwatch_engine::Engine;
use smogwatch_telemetry::MetricsCollector;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::transport::{InboundMessage, Transport};

/// Bridges inbound broker messages into the evaluation engine
#[derive(Clone)]
pub struct IngestionAdapter {
    engine: Arc<Engine>,
    metrics: MetricsCollector,
}

impl IngestionAdapter {
    pub fn new(engine: Arc<Engine>, metrics: MetricsCollector) -> Self {
        Self { engine, metrics }
    }

    /// Subscribe to every inbound sensor topic
    pub async fn subscribe(&self, transport: &dyn Transport) -> Result<()> {
        for topic in inbound_topics() {
            transport.subscribe(topic).await?;
        }
        Ok(())
    }

    /// Decode one message and send it to the engine
    pub fn handle_message(&self, message: &InboundMessage) -> Result<()> {
        let kind = SensorKind::from_topic(&message.topic)
            .ok_or_else(|| Error::not_found("inbound topic", message.topic.as_str()))?;

        let reading: SensorReading = serde_json::from_slice(&message.payload).map_err(|e| {
            self.metrics.record_decode_failure();
            Error::decode(format!("{} payload: {}", message.topic, e))
        })?;

        debug!(kind = %kind, station = %reading.station, value = reading.value, "Reading received");

        self.engine
            .send_event(reading, kind.type_name())
            .map_err(|e| {
                self.metrics.record_event_rejected();
                e
            })?;

        self.metrics.record_event_ingested();
        Ok(())
    }

    /// Process messages until the inbound channel closes
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundMessage>) {
        info!("Ingestion started");

        while let Some(message) = inbound.recv().await {
            if let Err(e) = self.handle_message(&message) {
                match e {
                    Error::NotFound { .. } => {
                        warn!(topic = %message.topic, "Message on unexpected topic dropped")
                    }
                    e => warn!(topic = %message.topic, error = %e, "Reading dropped"),
                }
            }
        }

        info!("Ingestion stopped");
    }
}
