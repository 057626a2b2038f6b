//! Metrics collection and reporting
//!
//! Counters are kept in process so tests and shutdown logging can read a
//! [`MetricsSnapshot`]; every increment is also forwarded to the `metrics`
//! facade, where an installed exporter can pick it up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const EVENTS_INGESTED: &str = "smogwatch_events_ingested_total";
pub const DECODE_FAILURES: &str = "smogwatch_decode_failures_total";
pub const EVENTS_REJECTED: &str = "smogwatch_events_rejected_total";
pub const MATCHES: &str = "smogwatch_matches_total";
pub const ALERTS_UNROUTED: &str = "smogwatch_alerts_unrouted_total";
pub const ALERTS_SUBMITTED: &str = "smogwatch_alerts_submitted_total";
pub const ALERTS_PUBLISHED: &str = "smogwatch_alerts_published_total";
pub const ALERTS_DROPPED: &str = "smogwatch_alerts_dropped_total";
pub const RECONNECT_ATTEMPTS: &str = "smogwatch_reconnect_attempts_total";
pub const RECONNECT_FAILURES: &str = "smogwatch_reconnect_failures_total";

/// Metrics collector for the bridge pipeline
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    events_ingested: AtomicU64,
    decode_failures: AtomicU64,
    events_rejected: AtomicU64,
    matches: AtomicU64,
    alerts_unrouted: AtomicU64,
    alerts_submitted: AtomicU64,
    alerts_published: AtomicU64,
    alerts_dropped: AtomicU64,
    reconnect_attempts: AtomicU64,
    reconnect_failures: AtomicU64,
}

fn bump(counter: &AtomicU64, name: &'static str) {
    counter.fetch_add(1, Ordering::Relaxed);
    metrics::counter!(name).increment(1);
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    /// An inbound reading was accepted by the engine
    pub fn record_event_ingested(&self) {
        bump(&self.inner.events_ingested, EVENTS_INGESTED);
    }

    /// An inbound payload could not be decoded
    pub fn record_decode_failure(&self) {
        bump(&self.inner.decode_failures, DECODE_FAILURES);
    }

    /// The engine refused an inbound reading
    pub fn record_event_rejected(&self) {
        bump(&self.inner.events_rejected, EVENTS_REJECTED);
    }

    /// A rule produced a match
    pub fn record_match(&self) {
        bump(&self.inner.matches, MATCHES);
    }

    /// A match had no outbound topic, or could not be turned into an alert
    pub fn record_alert_unrouted(&self) {
        bump(&self.inner.alerts_unrouted, ALERTS_UNROUTED);
    }

    /// An alert was queued for delivery
    pub fn record_alert_submitted(&self) {
        bump(&self.inner.alerts_submitted, ALERTS_SUBMITTED);
    }

    /// An alert was handed to the transport
    pub fn record_alert_published(&self) {
        bump(&self.inner.alerts_published, ALERTS_PUBLISHED);
    }

    /// An alert was discarded after a failed delivery attempt
    pub fn record_alert_dropped(&self) {
        bump(&self.inner.alerts_dropped, ALERTS_DROPPED);
    }

    /// A reconnect was attempted before publishing
    pub fn record_reconnect_attempt(&self) {
        bump(&self.inner.reconnect_attempts, RECONNECT_ATTEMPTS);
    }

    /// A reconnect attempt failed
    pub fn record_reconnect_failure(&self) {
        bump(&self.inner.reconnect_failures, RECONNECT_FAILURES);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let inner = &self.inner;

        MetricsSnapshot {
            events_ingested: load(&inner.events_ingested),
            decode_failures: load(&inner.decode_failures),
            events_rejected: load(&inner.events_rejected),
            matches: load(&inner.matches),
            alerts_unrouted: load(&inner.alerts_unrouted),
            alerts_submitted: load(&inner.alerts_submitted),
            alerts_published: load(&inner.alerts_published),
            alerts_dropped: load(&inner.alerts_dropped),
            reconnect_attempts: load(&inner.reconnect_attempts),
            reconnect_failures: load(&inner.reconnect_failures),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_ingested: u64,
    pub decode_failures: u64,
    pub events_rejected: u64,
    pub matches: u64,
    pub alerts_unrouted: u64,
    pub alerts_submitted: u64,
    pub alerts_published: u64,
    pub alerts_dropped: u64,
    pub reconnect_attempts: u64,
    pub reconnect_failures: u64,
}

impl MetricsSnapshot {
    /// Alerts queued but neither published nor dropped yet
    pub fn alerts_in_flight(&self) -> u64 {
        self.alerts_submitted
            .saturating_sub(self.alerts_published + self.alerts_dropped)
    }

    /// Share of submitted alerts that were dropped
    pub fn drop_rate(&self) -> f64 {
        if self.alerts_submitted == 0 {
            0.0
        } else {
            self.alerts_dropped as f64 / self.alerts_submitted as f64
        }
    }
}
