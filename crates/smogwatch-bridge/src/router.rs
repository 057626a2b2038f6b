//! Match-to-alert routing

use bytes::Bytes;
use smogwatch_core::{alert_topic, AlertPayload, Error, MatchedEvent, OutboundAlert, Result};
use smogwatch_engine::rule::{AGGREGATE_FIELD, EVENT_TIME_FIELD, GROUP_KEY_FIELD};
use smogwatch_engine::MatchCallback;
use smogwatch_telemetry::MetricsCollector;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::delivery::DeliveryHandle;

/// Turns matched events into alerts and hands them to the delivery queue
pub struct AlertRouter {
    delivery: DeliveryHandle,
    metrics: MetricsCollector,
}

impl AlertRouter {
    pub fn new(delivery: DeliveryHandle, metrics: MetricsCollector) -> Self {
        Self { delivery, metrics }
    }

    /// Build the alert for a matched event; `None` when its type has no topic
    pub fn route(&self, event: &MatchedEvent) -> Result<Option<OutboundAlert>> {
        let Some(topic) = alert_topic(&event.event_type) else {
            return Ok(None);
        };

        let payload = AlertPayload {
            timestamp: field(event, EVENT_TIME_FIELD, |v| v.as_i64())?,
            station: field(event, GROUP_KEY_FIELD, |v| v.as_str().map(str::to_string))?,
            value: field(event, AGGREGATE_FIELD, |v| v.as_f64())?,
        };

        let body = serde_json::to_vec(&payload)?;
        Ok(Some(OutboundAlert {
            topic,
            payload: Bytes::from(body),
        }))
    }

    /// Listener body: route one match and queue it; failures are logged and dropped
    pub fn on_match(&self, event: &MatchedEvent) {
        self.metrics.record_match();

        match self.route(event) {
            Ok(Some(alert)) => {
                let topic = alert.topic;
                match self.delivery.submit(alert) {
                    Ok(()) => debug!(event_type = %event.event_type, topic, "Alert queued"),
                    Err(e) => {
                        self.metrics.record_alert_dropped();
                        warn!(event_type = %event.event_type, error = %e, "Alert not queued");
                    }
                }
            }
            Ok(None) => {
                self.metrics.record_alert_unrouted();
                warn!(event_type = %event.event_type, "No alert topic for matched event type, suppressing");
            }
            Err(e) => {
                self.metrics.record_alert_unrouted();
                warn!(event_type = %event.event_type, error = %e, "Could not build alert");
            }
        }
    }

    /// Match callback bound to every deployed rule
    pub fn callback(self: &Arc<Self>) -> MatchCallback {
        let router = Arc::clone(self);
        Arc::new(move |event: &MatchedEvent| router.on_match(event))
    }
}

fn field<T>(
    event: &MatchedEvent,
    name: &str,
    read: impl FnOnce(&smogwatch_core::FieldValue) -> Option<T>,
) -> Result<T> {
    let value = event.record.get(name).ok_or_else(|| {
        Error::event(format!("{} carries no '{}' field", event.event_type, name))
    })?;

    read(value).ok_or_else(|| {
        Error::event(format!(
            "{}.{} has unexpected value {:?}",
            event.event_type, name, value
        ))
    })
}
