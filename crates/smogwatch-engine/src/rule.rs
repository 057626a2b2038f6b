//! Windowed aggregation rule definitions

use serde::{Deserialize, Serialize};

/// Default name of the produced event-time field
pub const EVENT_TIME_FIELD: &str = "eventTime";

/// Default name of the produced group-key field
pub const GROUP_KEY_FIELD: &str = "stationId";

/// Default name of the produced aggregate field
pub const AGGREGATE_FIELD: &str = "avgValue";

/// A continuously evaluated rule: filter by type, group, window, aggregate, compare
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Rule identifier
    pub name: String,

    /// Description of what this rule detects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Name of the event type produced on match
    pub insert_into: String,

    /// Input event type
    pub from: String,

    /// Sliding window length in seconds
    pub window_secs: u64,

    /// Field whose value partitions the windows
    pub group_by: String,

    /// Field carrying the input event's timestamp
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,

    /// Aggregate computed over each window
    pub aggregate: Aggregate,

    /// Condition the aggregate must satisfy to produce a match
    pub having: Condition,

    /// Names of the produced fields
    #[serde(default)]
    pub output: OutputFields,
}

/// Aggregate function applied to one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub function: AggregateFunction,
    pub field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Avg,
    Sum,
    Count,
    Min,
    Max,
}

/// Threshold comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub op: Comparison,
    pub threshold: f64,
}

impl Condition {
    /// Whether `value` satisfies the condition
    pub fn holds(&self, value: f64) -> bool {
        match self.op {
            Comparison::Gt => value > self.threshold,
            Comparison::Ge => value >= self.threshold,
            Comparison::Lt => value < self.threshold,
            Comparison::Le => value <= self.threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
}

/// Field names of the event a rule produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFields {
    #[serde(default = "default_event_time")]
    pub event_time: String,

    #[serde(default = "default_group_key")]
    pub group_key: String,

    #[serde(default = "default_aggregate")]
    pub value: String,
}

impl Default for OutputFields {
    fn default() -> Self {
        Self {
            event_time: default_event_time(),
            group_key: default_group_key(),
            value: default_aggregate(),
        }
    }
}

fn default_timestamp_field() -> String {
    "timestamp".to_string()
}

fn default_event_time() -> String {
    EVENT_TIME_FIELD.to_string()
}

fn default_group_key() -> String {
    GROUP_KEY_FIELD.to_string()
}

fn default_aggregate() -> String {
    AGGREGATE_FIELD.to_string()
}
