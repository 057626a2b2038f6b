//! SmogWatch Telemetry
//!
//! Pipeline counters for the SmogWatch bridge.
//!
//! Provides:
//! - In-process counters with point-in-time snapshots
//! - Forwarding of every counter to the `metrics` facade for export

pub mod metrics;

pub use crate::metrics::{MetricsCollector, MetricsSnapshot};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::metrics::{MetricsCollector, MetricsSnapshot};
}
