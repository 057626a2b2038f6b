//! Pattern and event type lifecycle
//!
//! [`PatternService`] combines the engine facade with the event type and
//! rule registries. Every compile, deploy and undeploy sequence for one
//! name holds that name's lock, so a deployment id recorded in a registry
//! is always the one that is live in the runtime. If the runtime is cleared
//! directly through [`Engine::undeploy_all`], recorded ids that it no longer
//! knows are treated as undeployed and cleared on the next operation.

use parking_lot::Mutex;
use smogwatch_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::{Engine, MatchCallback};
use crate::registry::{ArtifactRegistry, EventTypeRegistry, RuleRegistry};
use crate::runtime::DeploymentId;

/// A rule that was just deployed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternDeployment {
    pub name: String,
    pub deployment_id: DeploymentId,
}

#[derive(Default)]
struct NameLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NameLocks {
    fn get(&self, name: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(name.to_string()).or_default())
    }
}

/// Lifecycle operations over named event types and rules
pub struct PatternService {
    engine: Arc<Engine>,
    event_types: EventTypeRegistry,
    rules: RuleRegistry,
    type_locks: NameLocks,
    rule_locks: NameLocks,
}

impl PatternService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            event_types: EventTypeRegistry::new(),
            rules: RuleRegistry::new(),
            type_locks: NameLocks::default(),
            rule_locks: NameLocks::default(),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn event_types(&self) -> &EventTypeRegistry {
        &self.event_types
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Compile and register an event schema under `name`
    pub fn add_event_type(&self, name: &str, schema: &str) -> Result<()> {
        let lock = self.type_locks.get(name);
        let _guard = lock.lock();

        if self.live_deployment(&self.event_types, name).is_some() {
            return Err(Error::conflict(format!("event type '{}' is deployed", name)));
        }

        let artifact = self.engine.compile(schema)?;
        if !artifact.is_schema() || artifact.name() != name {
            return Err(Error::compile(format!(
                "definition does not declare event type '{}'",
                name
            )));
        }

        self.event_types.register_compiled(name, schema, artifact)?;
        info!(event_type = name, "Event type compiled");
        Ok(())
    }

    /// Deploy a compiled event type
    pub fn deploy_event_type(&self, name: &str) -> Result<DeploymentId> {
        let lock = self.type_locks.get(name);
        let _guard = lock.lock();

        if let Some(live) = self.live_deployment(&self.event_types, name) {
            return Err(Error::conflict(format!(
                "event type '{}' is already deployed as {}",
                name, live
            )));
        }

        let artifact = self.event_types.compiled_artifact(name)?;
        let id = self.engine.deploy(&artifact)?;
        self.event_types.register_deployed(name, id.clone())?;
        Ok(id)
    }

    /// Undeploy an event type; fails while deployed rules depend on it
    pub fn undeploy_event_type(&self, name: &str) -> Result<DeploymentId> {
        let lock = self.type_locks.get(name);
        let _guard = lock.lock();

        let id = self.event_types.deployment_id(name)?;
        self.retire(&self.event_types, &id)?;
        Ok(id)
    }

    /// Schema text of a registered event type
    pub fn event_type_schema(&self, name: &str) -> Result<String> {
        self.event_types.schema(name)
    }

    /// Event types deployed through this service
    pub fn deployed_event_types(&self) -> Vec<String> {
        self.live_names(&self.event_types)
    }

    /// Compile and register a rule under `name`
    pub fn add_pattern(&self, name: &str, definition: &str) -> Result<()> {
        let lock = self.rule_locks.get(name);
        let _guard = lock.lock();

        if self.live_deployment(&self.rules, name).is_some() {
            return Err(Error::conflict(format!(
                "pattern '{}' is deployed; undeploy it first",
                name
            )));
        }

        let artifact = self.engine.compile(definition)?;
        if !artifact.is_rule() || artifact.name() != name {
            return Err(Error::compile(format!(
                "definition does not declare rule '{}'",
                name
            )));
        }

        self.rules.register_compiled(name, definition, artifact)?;
        info!(pattern = name, "Pattern compiled");
        Ok(())
    }

    /// Deploy a compiled rule and bind `callback` to its matches
    pub fn deploy_pattern(&self, name: &str, callback: MatchCallback) -> Result<PatternDeployment> {
        let lock = self.rule_locks.get(name);
        let _guard = lock.lock();

        if let Some(live) = self.live_deployment(&self.rules, name) {
            return Err(Error::conflict(format!(
                "pattern '{}' is already deployed as {}",
                name, live
            )));
        }

        self.deploy_locked(name, Some(callback))
    }

    /// Undeploy a rule; its definition and listener stay registered
    pub fn undeploy_pattern(&self, name: &str) -> Result<DeploymentId> {
        let lock = self.rule_locks.get(name);
        let _guard = lock.lock();

        self.undeploy_locked(name)
    }

    /// Undeploy a rule if live, then deploy it again with its stored listener
    pub fn redeploy_pattern(&self, name: &str) -> Result<PatternDeployment> {
        let lock = self.rule_locks.get(name);
        let _guard = lock.lock();

        if self.rules.is_deployed(name) {
            self.undeploy_locked(name)?;
        }

        self.deploy_locked(name, None)
    }

    /// Definition text of a rule
    pub fn pattern_definition(&self, name: &str) -> Result<String> {
        self.rules.definition(name)
    }

    /// Deployment id of a live rule
    pub fn pattern_deployment(&self, name: &str) -> Result<DeploymentId> {
        let id = self.rules.deployment_id(name)?;
        if !self.engine.is_deployed(&id) {
            return Err(Error::not_found("pattern deployment", name));
        }
        Ok(id)
    }

    /// Rules currently deployed
    pub fn deployed_patterns(&self) -> Vec<String> {
        self.live_names(&self.rules)
    }

    /// Undeploy every rule, then every event type, deployed through this service
    pub fn undeploy_all(&self) -> Result<()> {
        for name in self.rules.deployed_names() {
            self.undeploy_pattern(&name)?;
        }
        for name in self.event_types.deployed_names() {
            self.undeploy_event_type(&name)?;
        }
        Ok(())
    }

    fn deploy_locked(&self, name: &str, callback: Option<MatchCallback>) -> Result<PatternDeployment> {
        let artifact = self.rules.compiled_artifact(name)?;
        let callback = match callback {
            Some(callback) => Some(callback),
            None => self.rules.listener(name).ok(),
        };

        let id = self.engine.deploy(&artifact)?;

        if let Some(callback) = &callback {
            if let Err(e) = self
                .engine
                .register_match_listener(name, &id, Arc::clone(callback))
            {
                warn!(pattern = name, error = %e, "Listener binding failed, rolling back deployment");
                self.engine.undeploy(&id)?;
                return Err(e);
            }
        }

        self.rules.register_deployed(name, id.clone())?;
        if let Some(callback) = callback {
            self.rules.set_listener(name, callback)?;
        }

        Ok(PatternDeployment {
            name: name.to_string(),
            deployment_id: id,
        })
    }

    fn undeploy_locked(&self, name: &str) -> Result<DeploymentId> {
        let id = self.rules.deployment_id(name)?;
        self.retire(&self.rules, &id)?;
        Ok(id)
    }

    /// Recorded deployment of `name` if the runtime still has it; a stale id is cleared
    fn live_deployment(&self, registry: &ArtifactRegistry, name: &str) -> Option<DeploymentId> {
        let id = registry.deployment_id(name).ok()?;
        if self.engine.is_deployed(&id) {
            return Some(id);
        }

        warn!(artifact = name, deployment = %id, "Recorded deployment is gone from the runtime, clearing it");
        if let Err(e) = registry.remove_deployment(&id) {
            warn!(artifact = name, error = %e, "Stale deployment already cleared");
        }
        None
    }

    /// Undeploy `id` and clear it from `registry`; an id the runtime no longer knows counts as undeployed
    fn retire(&self, registry: &ArtifactRegistry, id: &DeploymentId) -> Result<()> {
        if let Err(e) = self.engine.undeploy(id) {
            if self.engine.is_deployed(id) {
                return Err(e);
            }
            warn!(deployment = %id, "Deployment already gone from the runtime");
        }

        registry.remove_deployment(id)?;
        Ok(())
    }

    fn live_names(&self, registry: &ArtifactRegistry) -> Vec<String> {
        registry
            .deployed_names()
            .into_iter()
            .filter(|name| {
                registry
                    .deployment_id(name)
                    .map(|id| self.engine.is_deployed(&id))
                    .unwrap_or(false)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;
    use crate::engine::EngineConfig;
    use smogwatch_core::MatchedEvent;

    const NO2_SCHEMA: &str =
        "type: schema\nname: NO2Event\nfields:\n  timestamp: long\n  station: string\n  value: double\n";

    fn service() -> PatternService {
        PatternService::new(Arc::new(Engine::from_config(EngineConfig::default())))
    }

    fn noop() -> MatchCallback {
        Arc::new(|_: &MatchedEvent| {})
    }

    #[test]
    fn test_pattern_name_must_match_definition() {
        let service = service();
        let err = service
            .add_pattern("SomethingElse", builtin::BUILTIN_RULES[0].source)
            .unwrap_err();
        assert!(matches!(err, Error::Compile(_)));

        let err = service.add_pattern("NO2Event", NO2_SCHEMA).unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
    }

    #[test]
    fn test_double_deploy_is_conflict() {
        let service = service();
        let rule = builtin::BUILTIN_RULES[0];
        service.add_pattern(rule.name, rule.source).unwrap();
        let first = service.deploy_pattern(rule.name, noop()).unwrap();

        let err = service.deploy_pattern(rule.name, noop()).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(service.pattern_deployment(rule.name).unwrap(), first.deployment_id);

        let err = service.add_pattern(rule.name, rule.source).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_event_type_lifecycle() {
        let service = service();
        service.add_event_type("NO2Event", NO2_SCHEMA).unwrap();
        assert_eq!(service.event_type_schema("NO2Event").unwrap(), NO2_SCHEMA);
        assert!(service.deployed_event_types().is_empty());

        let id = service.deploy_event_type("NO2Event").unwrap();
        assert_eq!(service.deployed_event_types(), vec!["NO2Event".to_string()]);
        assert!(service.engine().is_deployed(&id));

        let rule = builtin::BUILTIN_RULES[0]
            .source
            .replace("PM10Event", "NO2Event")
            .replace("HighPM10Level", "HighNO2Level");
        service.add_pattern("HighNO2Level", &rule).unwrap();
        service.deploy_pattern("HighNO2Level", noop()).unwrap();

        let err = service.undeploy_event_type("NO2Event").unwrap_err();
        assert!(matches!(err, Error::Undeploy(_)));
        assert_eq!(service.event_types().deployment_id("NO2Event").unwrap(), id);

        service.undeploy_all().unwrap();
        assert!(service.deployed_patterns().is_empty());
        assert!(service.deployed_event_types().is_empty());
        assert!(service.engine().deployments().is_empty());
    }

    #[test]
    fn test_runtime_cleared_behind_registry_recovers() {
        let service = service();
        let rule = builtin::BUILTIN_RULES[0];
        service.add_pattern(rule.name, rule.source).unwrap();
        service.add_event_type("NO2Event", NO2_SCHEMA).unwrap();
        let first = service.deploy_pattern(rule.name, noop()).unwrap();
        service.deploy_event_type("NO2Event").unwrap();

        service.engine().undeploy_all().unwrap();
        assert!(service.deployed_patterns().is_empty());
        assert!(service.deployed_event_types().is_empty());
        assert!(service.pattern_deployment(rule.name).unwrap_err().is_not_found());

        let second = service.redeploy_pattern(rule.name).unwrap();
        assert_ne!(first.deployment_id, second.deployment_id);
        assert!(service.engine().is_deployed(&second.deployment_id));
        assert_eq!(service.pattern_deployment(rule.name).unwrap(), second.deployment_id);

        service.engine().undeploy_all().unwrap();
        assert_eq!(service.undeploy_pattern(rule.name).unwrap(), second.deployment_id);
        assert!(service.rules().deployment_id(rule.name).is_err());
        service.deploy_pattern(rule.name, noop()).unwrap();

        service.undeploy_event_type("NO2Event").unwrap();
        service.deploy_event_type("NO2Event").unwrap();
        assert_eq!(service.deployed_event_types(), vec!["NO2Event".to_string()]);
    }

    #[test]
    fn test_redeploy_without_listener() {
        let service = service();
        let rule = builtin::BUILTIN_RULES[1];
        service.add_pattern(rule.name, rule.source).unwrap();

        let first = service.redeploy_pattern(rule.name).unwrap();
        let second = service.redeploy_pattern(rule.name).unwrap();

        assert_ne!(first.deployment_id, second.deployment_id);
        assert!(!service.engine().is_deployed(&first.deployment_id));
        assert!(service.engine().is_deployed(&second.deployment_id));
        assert!(matches!(
            service.rules().listener(rule.name),
            Err(Error::NotFound { .. })
        ));
    }
}
