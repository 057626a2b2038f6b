//! Alert delivery
//!
//! Alerts are queued on an unbounded channel and published by a fixed pool
//! of worker tasks. A failed reconnect, publish error or publish timeout
//! drops the alert; nothing is retried.

use smogwatch_core::{Error, OutboundAlert, Result};
use smogwatch_telemetry::MetricsCollector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::transport::{Qos, Transport};

/// Worker pool sizing and publish bounds
#[derive(Debug, Clone, Copy)]
pub struct DeliverySettings {
    pub workers: usize,
    pub publish_timeout: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            publish_timeout: Duration::from_secs(2),
        }
    }
}

/// Cloneable submission side of the delivery queue
#[derive(Clone)]
pub struct DeliveryHandle {
    sender: mpsc::WeakUnboundedSender<OutboundAlert>,
    metrics: MetricsCollector,
}

impl DeliveryHandle {
    /// Queue an alert without waiting for it to be published
    pub fn submit(&self, alert: OutboundAlert) -> Result<()> {
        let sender = self
            .sender
            .upgrade()
            .ok_or_else(|| Error::transport("delivery queue is shut down"))?;

        sender
            .send(alert)
            .map_err(|_| Error::transport("delivery queue is shut down"))?;

        self.metrics.record_alert_submitted();
        Ok(())
    }
}

struct Publisher {
    transport: Arc<dyn Transport>,
    reconnecting: Mutex<()>,
    publish_timeout: Duration,
    metrics: MetricsCollector,
}

impl Publisher {
    async fn deliver(&self, alert: OutboundAlert) {
        if !self.transport.is_connected() && !self.ensure_connected().await {
            self.metrics.record_alert_dropped();
            return;
        }

        let publish = self
            .transport
            .publish(alert.topic, alert.payload, Qos::AtMostOnce);

        match timeout(self.publish_timeout, publish).await {
            Ok(Ok(())) => {
                self.metrics.record_alert_published();
                debug!(topic = alert.topic, "Alert published");
            }
            Ok(Err(e)) => {
                self.metrics.record_alert_dropped();
                warn!(topic = alert.topic, error = %e, "Publish failed, dropping alert");
            }
            Err(_) => {
                self.metrics.record_alert_dropped();
                warn!(
                    topic = alert.topic,
                    timeout_ms = self.publish_timeout.as_millis() as u64,
                    "Publish timed out, dropping alert"
                );
            }
        }
    }

    /// One reconnect attempt at a time; later callers reuse its outcome
    async fn ensure_connected(&self) -> bool {
        let _guard = self.reconnecting.lock().await;
        if self.transport.is_connected() {
            return true;
        }

        self.metrics.record_reconnect_attempt();
        match self.transport.reconnect().await {
            Ok(()) => {
                info!("Reconnected to broker");
                true
            }
            Err(e) => {
                self.metrics.record_reconnect_failure();
                warn!(error = %e, "Reconnect failed, dropping alert");
                false
            }
        }
    }
}

/// Pool of tasks publishing queued alerts
pub struct DeliveryWorker {
    sender: mpsc::UnboundedSender<OutboundAlert>,
    workers: Vec<JoinHandle<()>>,
    metrics: MetricsCollector,
}

impl DeliveryWorker {
    /// Spawn the worker tasks on the current runtime
    pub fn start(
        transport: Arc<dyn Transport>,
        settings: DeliverySettings,
        metrics: MetricsCollector,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Arc::new(Mutex::new(receiver));

        let publisher = Arc::new(Publisher {
            transport,
            reconnecting: Mutex::new(()),
            publish_timeout: settings.publish_timeout,
            metrics: metrics.clone(),
        });

        let count = settings.workers.max(1);
        let workers = (0..count)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let publisher = Arc::clone(&publisher);
                tokio::spawn(async move {
                    loop {
                        let next = queue.lock().await.recv().await;
                        let Some(alert) = next else {
                            break;
                        };
                        publisher.deliver(alert).await;
                    }
                })
            })
            .collect();

        info!(workers = count, "Delivery workers started");

        Self {
            sender,
            workers,
            metrics,
        }
    }

    /// Handle for queueing alerts; stops accepting once the worker shuts down
    pub fn handle(&self) -> DeliveryHandle {
        DeliveryHandle {
            sender: self.sender.downgrade(),
            metrics: self.metrics.clone(),
        }
    }

    /// Close the queue and wait until every queued alert has been handled
    pub async fn shutdown(self) {
        drop(self.sender);

        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Delivery worker ended abnormally");
            }
        }

        info!("Delivery workers stopped");
    }
}
