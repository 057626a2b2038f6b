//! Evaluation engine facade
//!
//! [`Engine`] is the single access point to the evaluation runtime. It
//! rebuilds the compile context on every compilation so a definition can
//! reference every event type visible at that moment: the configured
//! sensor types plus schemas deployed into the runtime.

use smogwatch_core::{Error, EventRecord, MatchedEvent, Result};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::builtin;
use crate::compiler::{CompileContext, CompiledArtifact};
use crate::runtime::{DeploymentId, EvaluationRuntime, MatchListener, WindowedRuntime};
use crate::EventSchema;

/// Callback receiving the most recent match of each notification batch
pub type MatchCallback = Arc<dyn Fn(&MatchedEvent) + Send + Sync>;

static GLOBAL: OnceLock<Arc<Engine>> = OnceLock::new();

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Event types visible to every compilation without being deployed
    pub event_types: Vec<EventSchema>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_types: builtin::sensor_event_types(),
        }
    }
}

/// Shared handle to the evaluation runtime
pub struct Engine {
    runtime: Arc<dyn EvaluationRuntime>,
}

impl Engine {
    /// Process-wide engine, constructed on first use
    pub fn global() -> Arc<Engine> {
        GLOBAL
            .get_or_init(|| Arc::new(Engine::from_config(EngineConfig::default())))
            .clone()
    }

    /// Wrap an existing runtime
    pub fn new(runtime: Arc<dyn EvaluationRuntime>) -> Self {
        Self { runtime }
    }

    /// Build an engine backed by a [`WindowedRuntime`]
    pub fn from_config(config: EngineConfig) -> Self {
        let type_count = config.event_types.len();
        let engine = Self::new(Arc::new(WindowedRuntime::new(config.event_types)));
        info!(event_types = type_count, "Evaluation engine ready");
        engine
    }

    /// Compile a schema or rule definition
    pub fn compile(&self, definition: &str) -> Result<CompiledArtifact> {
        let context = CompileContext::new()
            .with_types(self.runtime.configured_types())
            .with_types(self.runtime.runtime_path());

        self.runtime.compile(definition, &context)
    }

    /// Deploy a compiled artifact
    pub fn deploy(&self, artifact: &CompiledArtifact) -> Result<DeploymentId> {
        let id = self.runtime.deploy(artifact)?;
        info!(name = %artifact.name(), deployment = %id, "Deployed");
        Ok(id)
    }

    /// Undeploy; fails for unknown ids
    pub fn undeploy(&self, id: &DeploymentId) -> Result<()> {
        self.runtime.undeploy(id)?;
        info!(deployment = %id, "Undeployed");
        Ok(())
    }

    /// Undeploy everything
    pub fn undeploy_all(&self) -> Result<()> {
        self.runtime.undeploy_all()
    }

    /// Whether `id` is active
    pub fn is_deployed(&self, id: &DeploymentId) -> bool {
        self.runtime.is_deployed(id)
    }

    /// Active deployment ids
    pub fn deployments(&self) -> Vec<DeploymentId> {
        self.runtime.deployments()
    }

    /// Hand an event to the runtime; listeners may run before this returns
    pub fn send_event(&self, event: impl Into<EventRecord>, type_name: &str) -> Result<()> {
        debug!(event_type = type_name, "Sending event");
        self.runtime.send_event(event.into(), type_name)
    }

    /// Decode a JSON object into an event of `type_name` and send it
    pub fn send_event_json(&self, type_name: &str, payload: &[u8]) -> Result<()> {
        let record: EventRecord = serde_json::from_slice(payload)
            .map_err(|e| Error::decode(format!("{} payload: {}", type_name, e)))?;
        self.send_event(record, type_name)
    }

    /// Invoke `callback` with the latest event of each match batch of a deployed rule
    pub fn register_match_listener(
        &self,
        rule_name: &str,
        id: &DeploymentId,
        callback: MatchCallback,
    ) -> Result<()> {
        let listener: MatchListener = Arc::new(move |batch: &[MatchedEvent]| {
            if let Some(latest) = batch.last() {
                callback(latest);
            }
        });

        self.runtime.add_listener(id, rule_name, listener)
    }

    /// Underlying runtime
    pub fn runtime(&self) -> &Arc<dyn EvaluationRuntime> {
        &self.runtime
    }
}
