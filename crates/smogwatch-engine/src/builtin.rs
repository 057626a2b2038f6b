//! Built-in sensor event types and alert rules
//!
//! Each rule averages one sensor type per station over a one minute
//! sliding window and fires when the average exceeds the rule's threshold.

use smogwatch_core::{FieldType, Result, SensorKind};
use tracing::info;

use crate::engine::MatchCallback;
use crate::lifecycle::{PatternDeployment, PatternService};
use crate::EventSchema;

/// A rule that ships with the bridge
#[derive(Debug, Clone, Copy)]
pub struct BuiltinRule {
    pub name: &'static str,
    pub source: &'static str,
}

pub const HIGH_PM10_LEVEL: BuiltinRule = BuiltinRule {
    name: "HighPM10Level",
    source: r#"type: rule
name: HighPM10Level
description: PM10 one minute average above 150 per station
insert_into: HighPM10Level
from: PM10Event
window_secs: 60
group_by: station
aggregate: { function: avg, field: value }
having: { op: gt, threshold: 150 }
"#,
};

pub const HIGH_PM25_LEVEL: BuiltinRule = BuiltinRule {
    name: "HighPM25Level",
    source: r#"type: rule
name: HighPM25Level
description: PM2.5 one minute average above 35 per station
insert_into: HighPM25Level
from: PM25Event
window_secs: 60
group_by: station
aggregate: { function: avg, field: value }
having: { op: gt, threshold: 35 }
"#,
};

pub const HIGH_HUMIDITY_PERCENTAGE: BuiltinRule = BuiltinRule {
    name: "HighHumidityPercentage",
    source: r#"type: rule
name: HighHumidityPercentage
description: Relative humidity one minute average above 93 per station
insert_into: HighHumidityPercentage
from: HumidityEvent
window_secs: 60
group_by: station
aggregate: { function: avg, field: value }
having: { op: gt, threshold: 93 }
"#,
};

pub const BUILTIN_RULES: &[BuiltinRule] =
    &[HIGH_PM10_LEVEL, HIGH_PM25_LEVEL, HIGH_HUMIDITY_PERCENTAGE];

/// Schemas of the three sensor event types
pub fn sensor_event_types() -> Vec<EventSchema> {
    SensorKind::ALL
        .iter()
        .map(|kind| {
            EventSchema::new(kind.type_name())
                .with_field("timestamp", FieldType::Long)
                .with_field("station", FieldType::String)
                .with_field("value", FieldType::Double)
        })
        .collect()
}

/// Compile and deploy every built-in rule, binding `callback` to each
pub fn install(service: &PatternService, callback: MatchCallback) -> Result<Vec<PatternDeployment>> {
    let mut deployments = Vec::with_capacity(BUILTIN_RULES.len());

    for rule in BUILTIN_RULES {
        service.add_pattern(rule.name, rule.source)?;
        let deployment = service.deploy_pattern(rule.name, callback.clone())?;
        info!(pattern = rule.name, deployment = %deployment.deployment_id, "Built-in rule installed");
        deployments.push(deployment);
    }

    Ok(deployments)
}
