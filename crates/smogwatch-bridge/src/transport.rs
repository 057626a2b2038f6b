//! Broker transport
//!
//! [`Transport`] is what the ingestion adapter and the delivery worker talk
//! to. [`MqttTransport`] implements it over `rumqttc`: one background driver
//! task owns the event loop, reports connection state through a `watch`
//! channel and forwards inbound publishes to an `mpsc` queue.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use smogwatch_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;

/// Delivery guarantee requested for a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl From<Qos> for QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => QoS::AtMostOnce,
            Qos::AtLeastOnce => QoS::AtLeastOnce,
            Qos::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Publish/subscribe connection to a message broker
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection and wait until the broker accepts it
    async fn connect(&self) -> Result<()>;

    /// Whether the broker connection is currently up
    fn is_connected(&self) -> bool;

    /// Make one attempt to restore a lost connection
    async fn reconnect(&self) -> Result<()>;

    /// Subscribe to a topic; the subscription survives reconnects
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Publish a payload
    async fn publish(&self, topic: &str, payload: Bytes, qos: Qos) -> Result<()>;

    /// Close the connection
    async fn disconnect(&self) -> Result<()>;
}

struct Driver {
    eventloop: EventLoop,
    client: AsyncClient,
    connected: Arc<watch::Sender<bool>>,
    wake: Arc<Notify>,
    topics: Arc<Mutex<Vec<String>>>,
    inbound: mpsc::Sender<InboundMessage>,
    config: MqttConfig,
}

impl Driver {
    async fn run(mut self) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        warn!(code = ?ack.code, "Broker refused connection");
                        continue;
                    }

                    info!(host = %self.config.host, port = self.config.port, "Connected to broker");
                    self.connected.send_replace(true);
                    self.resubscribe();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage::new(publish.topic, publish.payload);
                    if self.inbound.send(message).await.is_err() {
                        debug!("Inbound receiver closed, discarding message");
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker closed the connection");
                    self.connected.send_replace(false);
                }
                Ok(_) => {}
                Err(e) => {
                    if self.connected.send_replace(false) {
                        warn!(error = %e, "Lost broker connection");
                    } else {
                        debug!(error = %e, "Broker connection attempt failed");
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_interval()) => {}
                        _ = self.wake.notified() => {}
                    }
                }
            }
        }
    }

    fn resubscribe(&self) {
        let topics = self.topics.lock().clone();
        for topic in topics {
            // Non-blocking: the request queue is drained by this same task.
            if let Err(e) = self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                warn!(topic = %topic, error = %e, "Failed to resubscribe");
            }
        }
    }
}

/// MQTT transport backed by `rumqttc`
pub struct MqttTransport {
    client: AsyncClient,
    pending: Mutex<Option<Driver>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<watch::Sender<bool>>,
    wake: Arc<Notify>,
    topics: Arc<Mutex<Vec<String>>>,
    config: MqttConfig,
}

impl MqttTransport {
    /// Create the transport and the receiver inbound messages arrive on
    ///
    /// Nothing touches the network until [`Transport::connect`] is called.
    pub fn new(config: MqttConfig) -> (Self, mpsc::Receiver<InboundMessage>) {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive());

        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity);
        let (connected, _) = watch::channel(false);

        let connected = Arc::new(connected);
        let wake = Arc::new(Notify::new());
        let topics = Arc::new(Mutex::new(Vec::new()));

        let driver = Driver {
            eventloop,
            client: client.clone(),
            connected: Arc::clone(&connected),
            wake: Arc::clone(&wake),
            topics: Arc::clone(&topics),
            inbound: inbound_tx,
            config: config.clone(),
        };

        let transport = Self {
            client,
            pending: Mutex::new(Some(driver)),
            driver: Mutex::new(None),
            connected,
            wake,
            topics,
            config,
        };

        (transport, inbound_rx)
    }

    async fn wait_connected(&self, limit: std::time::Duration) -> Result<()> {
        let mut state = self.connected.subscribe();

        let result = match timeout(limit, state.wait_for(|connected| *connected)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Error::transport("connection state channel closed")),
            Err(_) => Err(Error::Timeout),
        };
        result
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<()> {
        let pending = self.pending.lock().take();
        if let Some(driver) = pending {
            info!(host = %self.config.host, port = self.config.port, "Connecting to broker");
            *self.driver.lock() = Some(tokio::spawn(driver.run()));
        }

        self.wait_connected(self.config.connect_timeout()).await
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    async fn reconnect(&self) -> Result<()> {
        let started = self.driver.lock().is_some();
        if !started {
            return self.connect().await;
        }
        if self.is_connected() {
            return Ok(());
        }

        self.wake.notify_one();
        self.wait_connected(self.config.reconnect_timeout()).await
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        {
            let mut topics = self.topics.lock();
            if !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_string());
            }
        }

        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| Error::transport(format!("subscribe to {}: {}", topic, e)))?;

        info!(topic, "Subscribed");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: Qos) -> Result<()> {
        self.client
            .publish(topic, qos.into(), false, payload.to_vec())
            .await
            .map_err(|e| Error::transport(format!("publish to {}: {}", topic, e)))
    }

    async fn disconnect(&self) -> Result<()> {
        if self.is_connected() {
            if let Err(e) = self.client.disconnect().await {
                warn!(error = %e, "Disconnect request failed");
            }
        }

        let driver = self.driver.lock().take();
        if let Some(handle) = driver {
            handle.abort();
        }
        self.connected.send_replace(false);

        info!("Disconnected from broker");
        Ok(())
    }
}
