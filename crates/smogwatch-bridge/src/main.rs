//! SmogWatch Bridge
//!
//! Air quality alerting over MQTT: ingest station readings, evaluate
//! windowed averages, publish threshold alerts.

use anyhow::Result;
use clap::Parser;
use smogwatch_bridge::cli::{Cli, Commands};
use smogwatch_bridge::{
    simulate, Bridge, BridgeConfig, DeliverySettings, MetricsConfig, MqttTransport, Transport,
};
use smogwatch_engine::Engine;
use smogwatch_telemetry::{metrics as names, MetricsCollector};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let config = BridgeConfig::load(&cli.config, &cli.overrides())?;
    info!(
        host = %config.mqtt.host,
        port = config.mqtt.port,
        client_id = %config.mqtt.client_id,
        "Configuration loaded"
    );

    match cli.command() {
        Commands::Run => run(config).await,
        command @ Commands::Simulate { .. } => {
            let settings = command.simulation().unwrap_or_default();
            simulate_traffic(config, settings).await
        }
    }
}

async fn run(config: BridgeConfig) -> Result<()> {
    info!("Starting SmogWatch bridge");

    if config.metrics.enabled {
        init_metrics(&config.metrics)?;
    }

    let (transport, inbound) = MqttTransport::new(config.mqtt.clone());
    let transport: Arc<dyn Transport> = Arc::new(transport);

    let settings = DeliverySettings {
        workers: config.delivery.worker_count(),
        publish_timeout: config.mqtt.publish_timeout(),
    };

    let bridge = Bridge::start(
        Engine::global(),
        transport,
        inbound,
        settings,
        MetricsCollector::new(),
    )
    .await?;

    shutdown_signal().await;
    warn!("Shutdown signal received, stopping bridge...");

    bridge.shutdown().await?;
    info!("Bridge shutdown complete");
    Ok(())
}

async fn simulate_traffic(config: BridgeConfig, settings: simulate::SimulationSettings) -> Result<()> {
    let mqtt = config.mqtt.clone();
    let mqtt = smogwatch_bridge::MqttConfig {
        client_id: format!("{}-simulator", mqtt.client_id),
        ..mqtt
    };

    let (transport, _inbound) = MqttTransport::new(mqtt);
    transport.connect().await?;

    let outcome = simulate::run(&transport, &settings).await;
    transport.disconnect().await?;
    Ok(outcome?)
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("smogwatch=debug,rumqttc=info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("smogwatch=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Install the Prometheus exporter with its HTTP listener
fn init_metrics(config: &MetricsConfig) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(names::EVENTS_INGESTED, "Sensor readings accepted by the engine");
    metrics::describe_counter!(names::DECODE_FAILURES, "Inbound payloads that failed to decode");
    metrics::describe_counter!(names::EVENTS_REJECTED, "Sensor readings the engine refused");
    metrics::describe_counter!(names::MATCHES, "Rule matches delivered to the router");
    metrics::describe_counter!(names::ALERTS_UNROUTED, "Matches suppressed without an alert");
    metrics::describe_counter!(names::ALERTS_SUBMITTED, "Alerts queued for delivery");
    metrics::describe_counter!(names::ALERTS_PUBLISHED, "Alerts handed to the broker");
    metrics::describe_counter!(names::ALERTS_DROPPED, "Alerts dropped after a failed delivery");
    metrics::describe_counter!(names::RECONNECT_ATTEMPTS, "Reconnects attempted before publishing");
    metrics::describe_counter!(names::RECONNECT_FAILURES, "Reconnect attempts that failed");

    info!(listen = %config.listen, "Metrics exporter initialized");
    Ok(())
}
