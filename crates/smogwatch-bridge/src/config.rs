//! Bridge configuration
//!
//! Layered with the `config` crate: an optional YAML file, then
//! `SMOGWATCH__*` environment variables (`__` separates nesting levels, so
//! `SMOGWATCH__MQTT__HOST` sets `mqtt.host`), then command line overrides.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use smogwatch_core::{Error, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Broker connection settings
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Alert delivery settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Prometheus exporter settings
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Values from the command line that take precedence over every other source
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl BridgeConfig {
    /// Load configuration from file, environment and overrides
    ///
    /// A missing file is not an error; defaults fill whatever no source sets.
    pub fn load(path: impl AsRef<Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let path = path.as_ref();

        let layered = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml).required(false))
            .add_source(
                Environment::with_prefix("SMOGWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;

        let mut config: BridgeConfig = layered
            .try_deserialize()
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;

        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Apply command line overrides
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(host) = &overrides.host {
            self.mqtt.host = host.clone();
        }

        if let Some(port) = overrides.port {
            self.mqtt.port = port;
        }
    }

    /// Reject values the bridge cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.host.trim().is_empty() {
            return Err(Error::config("mqtt.host must not be empty"));
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(Error::config("mqtt.client_id must not be empty"));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(Error::config("mqtt.channel_capacity must be at least 1"));
        }
        if self.delivery.workers == Some(0) {
            return Err(Error::config("delivery.workers must be at least 1"));
        }
        Ok(())
    }
}

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Capacity of the client request channel and of the inbound message queue
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_reconnect_timeout_ms")]
    pub reconnect_timeout_ms: u64,

    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Pause between connection attempts made by the background driver
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
            channel_capacity: default_channel_capacity(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_timeout_ms: default_reconnect_timeout_ms(),
            publish_timeout_ms: default_publish_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

/// Alert delivery settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Worker tasks draining the alert queue; defaults to the CPU count
    #[serde(default)]
    pub workers: Option<usize>,
}

impl DeliveryConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}

/// Prometheus exporter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "smogwatch-bridge".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    64
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_timeout_ms() -> u64 {
    5_000
}

fn default_publish_timeout_ms() -> u64 {
    2_000
}

fn default_retry_interval_ms() -> u64 {
    1_000
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}
