//! End-to-end bridge tests over an in-memory transport

mod common;

use common::{eventually, reading, Call, MockTransport};
use smogwatch_bridge::{Bridge, DeliverySettings, InboundMessage, Transport};
use smogwatch_core::{AlertPayload, Error};
use smogwatch_engine::{Engine, EngineConfig, WindowedRuntime};
use smogwatch_telemetry::MetricsCollector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    bridge: Bridge,
    transport: Arc<MockTransport>,
    inbound: mpsc::Sender<InboundMessage>,
    metrics: MetricsCollector,
}

impl Harness {
    async fn start() -> Self {
        let transport = MockTransport::new();
        let (inbound, receiver) = mpsc::channel(64);
        let metrics = MetricsCollector::new();
        let settings = DeliverySettings {
            workers: 2,
            publish_timeout: Duration::from_secs(1),
        };

        let bridge = Bridge::start(
            Arc::new(Engine::from_config(EngineConfig::default())),
            transport.clone(),
            receiver,
            settings,
            metrics.clone(),
        )
        .await
        .unwrap();

        Self {
            bridge,
            transport,
            inbound,
            metrics,
        }
    }

    async fn send(&self, message: InboundMessage) {
        self.inbound.send(message).await.unwrap();
    }

    fn alerts(&self, topic: &str) -> Vec<AlertPayload> {
        self.transport
            .published()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| serde_json::from_slice(&payload).unwrap())
            .collect()
    }
}

#[tokio::test]
async fn test_startup_subscribes_and_deploys() {
    let harness = Harness::start().await;

    assert_eq!(harness.transport.calls().first(), Some(&Call::Connect));
    assert_eq!(
        harness.transport.subscriptions(),
        vec!["pm10topic", "pm25topic", "humiditytopic"]
    );
    assert_eq!(harness.bridge.deployments().len(), 3);
    assert_eq!(
        harness.bridge.service().deployed_patterns(),
        vec!["HighHumidityPercentage", "HighPM10Level", "HighPM25Level"]
    );

    harness.bridge.shutdown().await.unwrap();
    assert_eq!(harness.transport.calls().last(), Some(&Call::Disconnect));
}

#[tokio::test]
async fn test_pm10_window_average_alerts() {
    let harness = Harness::start().await;

    harness.send(reading("pm10topic", 1_000, "S1", 200.0)).await;
    harness.send(reading("pm10topic", 1_010, "S1", 180.0)).await;
    harness.send(reading("pm10topic", 1_020, "S1", 160.0)).await;

    assert!(eventually(|| harness.alerts("highpm10topic").len() == 3).await);

    let alerts = harness.alerts("highpm10topic");
    let latest: Vec<&AlertPayload> = alerts
        .iter()
        .filter(|alert| (alert.value - 180.0).abs() < 1e-9)
        .collect();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].station, "S1");
    assert_eq!(latest[0].timestamp, 1_020);
    assert!(alerts.iter().all(|alert| alert.station == "S1"));

    harness.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_below_threshold_publishes_nothing() {
    let harness = Harness::start().await;

    harness.send(reading("pm25topic", 1, "A1", 10.0)).await;
    harness.send(reading("pm25topic", 2, "A1", 35.0)).await;
    harness.send(reading("humiditytopic", 3, "A1", 99.0)).await;

    assert!(eventually(|| harness.transport.published().len() == 1).await);
    assert!(harness.alerts("highpm25topic").is_empty());

    let humidity = harness.alerts("highhumiditytopic");
    assert_eq!(humidity.len(), 1);
    assert_eq!(humidity[0].value, 99.0);

    harness.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let harness = Harness::start().await;

    harness
        .send(InboundMessage::new("pm10topic", "{\"station\": 42"))
        .await;
    harness.send(reading("pm10topic", 5, "A3", 300.0)).await;
    harness.send(reading("pm25topic", 6, "A3", 50.0)).await;

    assert!(eventually(|| harness.transport.published().len() == 2).await);
    assert_eq!(harness.alerts("highpm10topic").len(), 1);
    assert_eq!(harness.alerts("highpm25topic").len(), 1);

    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.decode_failures, 1);
    assert_eq!(snapshot.events_ingested, 2);

    harness.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnected_transport_reconnects_once() {
    let harness = Harness::start().await;
    harness.transport.drop_connection();

    harness.send(reading("pm10topic", 7, "A5", 500.0)).await;
    assert!(eventually(|| harness.transport.published().len() == 1).await);

    let calls = harness.transport.calls();
    assert_eq!(harness.transport.reconnects(), 1);
    let reconnect = calls.iter().position(|c| *c == Call::Reconnect).unwrap();
    let publish = calls
        .iter()
        .position(|c| matches!(c, Call::Publish { .. }))
        .unwrap();
    assert!(reconnect < publish);
    assert_eq!(harness.metrics.snapshot().reconnect_attempts, 1);

    harness.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_failure_drops_alert() {
    let harness = Harness::start().await;
    harness.transport.drop_connection();
    harness.transport.fail_reconnects();

    harness.send(reading("humiditytopic", 8, "A6", 97.0)).await;
    assert!(eventually(|| harness.metrics.snapshot().alerts_dropped == 1).await);

    // Give a retry the chance to show up; none should.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.transport.published().is_empty());
    assert_eq!(harness.transport.reconnects(), 1);
    assert_eq!(harness.metrics.snapshot().reconnect_failures, 1);

    harness.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_startup_fails_without_sensor_types() {
    let transport = MockTransport::new();
    let (_inbound, receiver) = mpsc::channel(1);
    let engine = Arc::new(Engine::new(Arc::new(WindowedRuntime::new(Vec::new()))));

    let result = Bridge::start(
        engine,
        transport.clone(),
        receiver,
        DeliverySettings::default(),
        MetricsCollector::new(),
    )
    .await;

    assert!(matches!(result, Err(Error::Compile(_))));
    assert!(transport.subscriptions().is_empty());
    assert!(transport.is_connected());
}
