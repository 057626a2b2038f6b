//! Evaluation runtime contract and the in-process windowed runtime
//!
//! The rest of the engine only talks to [`EvaluationRuntime`]. The
//! [`WindowedRuntime`] implementation evaluates compiled rules over
//! per-group sliding time windows and notifies listeners with the events
//! each rule produces.

use parking_lot::Mutex;
use smogwatch_core::{Error, EventRecord, FieldValue, MatchedEvent, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::compiler::{self, CompileContext, CompiledArtifact, CompiledRule, CompiledUnit};
use crate::window::SlidingWindow;
use crate::EventSchema;

/// Listener bound to a deployed rule; receives each batch of new matches
pub type MatchListener = Arc<dyn Fn(&[MatchedEvent]) + Send + Sync>;

/// Runtime-assigned identifier of an active deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeploymentId(String);

impl DeploymentId {
    /// Issue a fresh identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeploymentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Source of "now" for window eviction
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// Contract of the rule-evaluation runtime
pub trait EvaluationRuntime: Send + Sync {
    /// Compile definition text against the given context
    fn compile(&self, source: &str, context: &CompileContext) -> Result<CompiledArtifact> {
        compiler::compile(source, context)
    }

    /// Activate a compiled artifact
    fn deploy(&self, artifact: &CompiledArtifact) -> Result<DeploymentId>;

    /// Deactivate a deployment
    fn undeploy(&self, id: &DeploymentId) -> Result<()>;

    /// Deactivate every deployment
    fn undeploy_all(&self) -> Result<()>;

    /// Whether `id` is currently active
    fn is_deployed(&self, id: &DeploymentId) -> bool;

    /// Active deployments in deployment order
    fn deployments(&self) -> Vec<DeploymentId>;

    /// Event types the runtime was configured with
    fn configured_types(&self) -> Vec<EventSchema>;

    /// Event types made visible by deployments
    fn runtime_path(&self) -> Vec<EventSchema>;

    /// Feed one event of the named type
    ///
    /// Listeners run on the calling thread, outside any runtime lock. A
    /// rule's listeners are skipped once the rule is undeployed, but an
    /// undeploy that lands while one of them is already running does not
    /// interrupt it.
    fn send_event(&self, event: EventRecord, type_name: &str) -> Result<()>;

    /// Bind a listener to the named rule within a deployment
    fn add_listener(&self, id: &DeploymentId, rule_name: &str, listener: MatchListener)
        -> Result<()>;
}

enum Deployed {
    Schema(EventSchema),
    Rule(Statement),
}

struct Statement {
    rule: CompiledRule,
    windows: HashMap<String, SlidingWindow>,
    listeners: Vec<MatchListener>,
}

impl Statement {
    fn new(rule: CompiledRule) -> Self {
        Self {
            rule,
            windows: HashMap::new(),
            listeners: Vec::new(),
        }
    }

    /// Evict every group against `now` and forget groups left empty
    fn prune(&mut self, now: Instant) {
        self.windows.retain(|_, window| {
            window.evict(now);
            !window.is_empty()
        });
    }

    /// Push one event into its group's window and produce a match if the condition holds
    fn evaluate(&mut self, record: &EventRecord, now: Instant) -> Option<MatchedEvent> {
        self.prune(now);

        let definition = &self.rule.definition;
        let key_value = record.get(&definition.group_by)?.clone();
        let span = Duration::from_secs(definition.window_secs);

        let window = self
            .windows
            .entry(key_value.to_string())
            .or_insert_with(|| SlidingWindow::new(span));

        window.push(now, record.clone());
        let value = window.aggregate(&definition.aggregate)?;

        if !definition.having.holds(value) {
            return None;
        }

        let event_time = window
            .latest()
            .and_then(|latest| latest.get(&definition.timestamp_field))
            .cloned()?;

        let output = &definition.output;
        let produced = EventRecord::new()
            .with(output.event_time.clone(), event_time)
            .with(output.group_key.clone(), key_value)
            .with(output.value.clone(), FieldValue::Double(value));

        Some(MatchedEvent::new(definition.insert_into.clone(), produced))
    }
}

#[derive(Default)]
struct RuntimeState {
    deployments: Vec<(DeploymentId, Deployed)>,
}

impl RuntimeState {
    fn deployed_schema(&self, name: &str) -> Option<&EventSchema> {
        self.deployments.iter().find_map(|(_, deployed)| match deployed {
            Deployed::Schema(schema) if schema.name == name => Some(schema),
            _ => None,
        })
    }

    fn dependents_of(&self, type_name: &str) -> Vec<String> {
        self.deployments
            .iter()
            .filter_map(|(_, deployed)| match deployed {
                Deployed::Rule(statement) if statement.rule.input.name == type_name => {
                    Some(statement.rule.definition.name.clone())
                }
                _ => None,
            })
            .collect()
    }

    fn position(&self, id: &DeploymentId) -> Option<usize> {
        self.deployments.iter().position(|(d, _)| d == id)
    }
}

/// In-process runtime evaluating windowed aggregation rules
pub struct WindowedRuntime {
    configured: HashMap<String, EventSchema>,
    clock: Arc<dyn Clock>,
    state: Mutex<RuntimeState>,
}

impl WindowedRuntime {
    /// Create a runtime configured with the given event types
    pub fn new(event_types: impl IntoIterator<Item = EventSchema>) -> Self {
        Self::with_clock(event_types, Arc::new(SystemClock))
    }

    /// Create a runtime driven by a custom clock
    pub fn with_clock(
        event_types: impl IntoIterator<Item = EventSchema>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let configured = event_types
            .into_iter()
            .map(|schema| (schema.name.clone(), schema))
            .collect();

        Self {
            configured,
            clock,
            state: Mutex::new(RuntimeState::default()),
        }
    }

    fn resolve_type<'a>(&'a self, state: &'a RuntimeState, name: &str) -> Option<&'a EventSchema> {
        self.configured
            .get(name)
            .or_else(|| state.deployed_schema(name))
    }
}

impl EvaluationRuntime for WindowedRuntime {
    fn deploy(&self, artifact: &CompiledArtifact) -> Result<DeploymentId> {
        let mut state = self.state.lock();

        let deployed = match artifact.unit() {
            CompiledUnit::Schema(schema) => {
                if self.resolve_type(&state, &schema.name).is_some() {
                    return Err(Error::deploy(format!(
                        "event type '{}' already exists",
                        schema.name
                    )));
                }
                Deployed::Schema(schema.clone())
            }
            CompiledUnit::Rule(rule) => {
                match self.resolve_type(&state, &rule.input.name) {
                    None => {
                        return Err(Error::deploy(format!(
                            "rule '{}' depends on event type '{}' which is not deployed",
                            rule.definition.name, rule.input.name
                        )))
                    }
                    Some(current) if *current != rule.input => {
                        return Err(Error::deploy(format!(
                            "event type '{}' changed since rule '{}' was compiled",
                            rule.input.name, rule.definition.name
                        )))
                    }
                    Some(_) => {}
                }
                Deployed::Rule(Statement::new(rule.clone()))
            }
        };

        let id = DeploymentId::generate();
        state.deployments.push((id.clone(), deployed));

        debug!(name = %artifact.name(), deployment = %id, "Deployed artifact");
        Ok(id)
    }

    fn undeploy(&self, id: &DeploymentId) -> Result<()> {
        let mut state = self.state.lock();

        let index = state
            .position(id)
            .ok_or_else(|| Error::undeploy(format!("unknown deployment id '{}'", id)))?;

        if let Deployed::Schema(schema) = &state.deployments[index].1 {
            let dependents = state.dependents_of(&schema.name);
            if !dependents.is_empty() {
                return Err(Error::undeploy(format!(
                    "event type '{}' is used by deployed rules: {}",
                    schema.name,
                    dependents.join(", ")
                )));
            }
        }

        state.deployments.remove(index);
        debug!(deployment = %id, "Undeployed");
        Ok(())
    }

    fn undeploy_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        let count = state.deployments.len();

        state.deployments.clear();

        info!(count, "Undeployed all deployments");
        Ok(())
    }

    fn is_deployed(&self, id: &DeploymentId) -> bool {
        self.state.lock().position(id).is_some()
    }

    fn deployments(&self) -> Vec<DeploymentId> {
        self.state
            .lock()
            .deployments
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn configured_types(&self) -> Vec<EventSchema> {
        self.configured.values().cloned().collect()
    }

    fn runtime_path(&self) -> Vec<EventSchema> {
        self.state
            .lock()
            .deployments
            .iter()
            .filter_map(|(_, deployed)| match deployed {
                Deployed::Schema(schema) => Some(schema.clone()),
                Deployed::Rule(_) => None,
            })
            .collect()
    }

    fn send_event(&self, event: EventRecord, type_name: &str) -> Result<()> {
        let mut dispatch: Vec<(DeploymentId, Vec<MatchListener>, Vec<MatchedEvent>)> = Vec::new();

        {
            let mut state = self.state.lock();

            self.resolve_type(&state, type_name)
                .ok_or_else(|| Error::event(format!("unknown event type '{}'", type_name)))?
                .validate(&event)?;

            let now = self.clock.now();
            for (id, deployed) in state.deployments.iter_mut() {
                let Deployed::Rule(statement) = deployed else {
                    continue;
                };
                if statement.rule.input.name != type_name {
                    continue;
                }

                if let Some(matched) = statement.evaluate(&event, now) {
                    debug!(
                        rule = %statement.rule.definition.name,
                        event_type = %matched.event_type,
                        "Rule matched"
                    );
                    if !statement.listeners.is_empty() {
                        dispatch.push((id.clone(), statement.listeners.clone(), vec![matched]));
                    }
                }
            }
        }

        // Listeners run without the state lock so they may call back into the runtime.
        for (id, listeners, batch) in dispatch {
            for listener in listeners {
                if !self.is_deployed(&id) {
                    debug!(deployment = %id, "Skipping listeners of undeployed rule");
                    break;
                }
                listener(&batch);
            }
        }

        Ok(())
    }

    fn add_listener(
        &self,
        id: &DeploymentId,
        rule_name: &str,
        listener: MatchListener,
    ) -> Result<()> {
        let mut state = self.state.lock();

        let index = state
            .position(id)
            .ok_or_else(|| Error::not_found("deployment", id.as_str()))?;

        match &mut state.deployments[index].1 {
            Deployed::Rule(statement) if statement.rule.definition.name == rule_name => {
                statement.listeners.push(listener);
                Ok(())
            }
            _ => Err(Error::not_found("statement", rule_name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RULE: &str = r#"
type: rule
name: HighPM10Level
insert_into: HighPM10Level
from: PM10Event
window_secs: 60
group_by: station
aggregate: { function: avg, field: value }
having: { op: gt, threshold: 150 }
"#;

    fn runtime(clock: Arc<ManualClock>) -> WindowedRuntime {
        WindowedRuntime::with_clock(builtin::sensor_event_types(), clock)
    }

    fn context(runtime: &WindowedRuntime) -> CompileContext {
        CompileContext::new()
            .with_types(runtime.configured_types())
            .with_types(runtime.runtime_path())
    }

    fn reading(station: &str, value: f64) -> EventRecord {
        EventRecord::new()
            .with("timestamp", 1_700_000_000i64)
            .with("station", station)
            .with("value", value)
    }

    fn collect(runtime: &WindowedRuntime, id: &DeploymentId) -> Arc<Mutex<Vec<MatchedEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        runtime
            .add_listener(
                id,
                "HighPM10Level",
                Arc::new(move |batch: &[MatchedEvent]| sink.lock().extend_from_slice(batch)),
            )
            .unwrap();
        seen
    }

    #[test]
    fn test_window_average_crosses_threshold() {
        let clock = Arc::new(ManualClock::new());
        let runtime = runtime(Arc::clone(&clock));
        let artifact = runtime.compile(RULE, &context(&runtime)).unwrap();
        let id = runtime.deploy(&artifact).unwrap();
        let seen = collect(&runtime, &id);

        runtime.send_event(reading("S1", 100.0), "PM10Event").unwrap();
        assert!(seen.lock().is_empty());

        runtime.send_event(reading("S1", 250.0), "PM10Event").unwrap();
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event_type, "HighPM10Level");
        assert_eq!(seen[0].record.get("avgValue"), Some(&FieldValue::Double(175.0)));
        assert_eq!(seen[0].record.get("stationId"), Some(&FieldValue::Str("S1".into())));
        assert_eq!(
            seen[0].record.get("eventTime"),
            Some(&FieldValue::Long(1_700_000_000))
        );
    }

    #[test]
    fn test_groups_and_expiry_are_independent() {
        let clock = Arc::new(ManualClock::new());
        let runtime = runtime(Arc::clone(&clock));
        let artifact = runtime.compile(RULE, &context(&runtime)).unwrap();
        let id = runtime.deploy(&artifact).unwrap();
        let seen = collect(&runtime, &id);

        runtime.send_event(reading("S1", 400.0), "PM10Event").unwrap();
        runtime.send_event(reading("S2", 10.0), "PM10Event").unwrap();
        assert_eq!(seen.lock().len(), 1);

        // The 400 reading leaves the window, so a low reading no longer matches.
        clock.advance(Duration::from_secs(61));
        runtime.send_event(reading("S1", 20.0), "PM10Event").unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    fn group_count(runtime: &WindowedRuntime, id: &DeploymentId) -> usize {
        let state = runtime.state.lock();
        match state.position(id).map(|index| &state.deployments[index].1) {
            Some(Deployed::Rule(statement)) => statement.windows.len(),
            _ => panic!("no rule deployed as {}", id),
        }
    }

    #[test]
    fn test_idle_groups_are_released() {
        let clock = Arc::new(ManualClock::new());
        let runtime = runtime(Arc::clone(&clock));
        let id = runtime
            .deploy(&runtime.compile(RULE, &context(&runtime)).unwrap())
            .unwrap();

        for n in 0..1000 {
            runtime
                .send_event(reading(&format!("S{}", n), 10.0), "PM10Event")
                .unwrap();
        }
        assert_eq!(group_count(&runtime, &id), 1000);

        clock.advance(Duration::from_secs(3600));
        runtime.send_event(reading("S1", 10.0), "PM10Event").unwrap();
        assert_eq!(group_count(&runtime, &id), 1);
    }

    #[test]
    fn test_listeners_skip_rule_undeployed_mid_dispatch() {
        let runtime = Arc::new(runtime(Arc::new(ManualClock::new())));
        let id = runtime
            .deploy(&runtime.compile(RULE, &context(&runtime)).unwrap())
            .unwrap();

        let undeployer = Arc::clone(&runtime);
        let target = id.clone();
        runtime
            .add_listener(
                &id,
                "HighPM10Level",
                Arc::new(move |_: &[MatchedEvent]| {
                    undeployer.undeploy(&target).unwrap();
                }),
            )
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        runtime
            .add_listener(
                &id,
                "HighPM10Level",
                Arc::new(move |_: &[MatchedEvent]| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        runtime.send_event(reading("S1", 500.0), "PM10Event").unwrap();
        assert!(!runtime.is_deployed(&id));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_type_and_bad_record_rejected() {
        let runtime = runtime(Arc::new(ManualClock::new()));

        assert!(matches!(
            runtime.send_event(reading("S1", 1.0), "NO2Event"),
            Err(Error::Event(_))
        ));
        assert!(matches!(
            runtime.send_event(EventRecord::new().with("value", 1.0), "PM10Event"),
            Err(Error::Event(_))
        ));
    }

    #[test]
    fn test_undeploy_unknown_and_dependent_schema() {
        let runtime = runtime(Arc::new(ManualClock::new()));

        let err = runtime.undeploy(&DeploymentId::from("nope")).unwrap_err();
        assert!(matches!(err, Error::Undeploy(_)));

        let schema = "type: schema\nname: NO2Event\nfields:\n  timestamp: long\n  station: string\n  value: double\n";
        let schema_id = runtime
            .deploy(&runtime.compile(schema, &context(&runtime)).unwrap())
            .unwrap();

        let rule = RULE.replace("PM10Event", "NO2Event");
        let rule_id = runtime
            .deploy(&runtime.compile(&rule, &context(&runtime)).unwrap())
            .unwrap();

        assert!(matches!(runtime.undeploy(&schema_id), Err(Error::Undeploy(_))));
        runtime.undeploy(&rule_id).unwrap();
        runtime.undeploy(&schema_id).unwrap();
        assert!(runtime.deployments().is_empty());
    }

    #[test]
    fn test_rule_deploy_requires_visible_dependency() {
        let runtime = runtime(Arc::new(ManualClock::new()));
        let schema = "type: schema\nname: NO2Event\nfields:\n  timestamp: long\n  station: string\n  value: double\n";
        let schema_id = runtime
            .deploy(&runtime.compile(schema, &context(&runtime)).unwrap())
            .unwrap();
        let rule = runtime
            .compile(&RULE.replace("PM10Event", "NO2Event"), &context(&runtime))
            .unwrap();

        runtime.undeploy(&schema_id).unwrap();
        assert!(matches!(runtime.deploy(&rule), Err(Error::Deploy(_))));
    }

    #[test]
    fn test_listener_binding_requires_matching_rule() {
        let runtime = runtime(Arc::new(ManualClock::new()));
        let id = runtime
            .deploy(&runtime.compile(RULE, &context(&runtime)).unwrap())
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let listener: MatchListener = Arc::new(move |_: &[MatchedEvent]| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let err = runtime
            .add_listener(&id, "OtherRule", Arc::clone(&listener))
            .unwrap_err();
        assert!(err.is_not_found());

        runtime.add_listener(&id, "HighPM10Level", listener).unwrap();
        runtime.send_event(reading("S1", 500.0), "PM10Event").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
