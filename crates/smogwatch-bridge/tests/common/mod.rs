//! Shared test doubles for bridge integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use smogwatch_bridge::{InboundMessage, Qos, Transport};
use smogwatch_core::{Error, Result, SensorReading};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Everything the bridge asked the transport to do, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect,
    Reconnect,
    Subscribe(String),
    Publish { topic: String, payload: Bytes },
    Disconnect,
}

/// In-memory transport that records calls
pub struct MockTransport {
    connected: AtomicBool,
    reconnect_fails: AtomicBool,
    calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(false),
            reconnect_fails: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Simulate the broker dropping the connection
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn fail_reconnects(&self) {
        self.reconnect_fails.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Subscribe(topic) => Some(topic),
                _ => None,
            })
            .collect()
    }

    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Publish { topic, payload } => Some((topic, payload)),
                _ => None,
            })
            .collect()
    }

    pub fn reconnects(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == Call::Reconnect)
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<()> {
        self.calls.lock().push(Call::Connect);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<()> {
        self.calls.lock().push(Call::Reconnect);
        if self.reconnect_fails.load(Ordering::SeqCst) {
            return Err(Error::transport("broker unreachable"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.calls.lock().push(Call::Subscribe(topic.to_string()));
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes, _qos: Qos) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::transport("not connected"));
        }
        self.calls.lock().push(Call::Publish {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.calls.lock().push(Call::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// JSON reading on an inbound topic
pub fn reading(topic: &str, timestamp: i64, station: &str, value: f64) -> InboundMessage {
    let payload = serde_json::to_vec(&SensorReading::new(timestamp, station, value)).unwrap();
    InboundMessage::new(topic, payload)
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
