//! Name-keyed registries of compiled and deployed artifacts
//!
//! Every operation runs under the registry's lock, so a reader never sees
//! an entry halfway through an update. Lookups that miss return
//! [`Error::NotFound`].

use parking_lot::RwLock;
use smogwatch_core::{Error, Result};
use std::collections::HashMap;
use std::ops::Deref;

use crate::compiler::CompiledArtifact;
use crate::engine::MatchCallback;
use crate::runtime::DeploymentId;

/// Registry state for one name
#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    /// Definition text
    pub source: String,

    /// Compiled artifact
    pub artifact: CompiledArtifact,

    /// Active deployment, if any
    pub deployment: Option<DeploymentId>,
}

/// Compiled artifacts and their deployment ids, keyed by name
pub struct ArtifactRegistry {
    kind: &'static str,
    entries: RwLock<HashMap<String, ArtifactEntry>>,
}

impl ArtifactRegistry {
    /// Create a registry; `kind` labels NotFound errors
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Whether a compiled artifact exists for `name`
    pub fn is_compiled(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Record a compiled artifact; refused while `name` is deployed
    pub fn register_compiled(
        &self,
        name: &str,
        source: impl Into<String>,
        artifact: CompiledArtifact,
    ) -> Result<()> {
        let mut entries = self.entries.write();

        if let Some(id) = entries.get(name).and_then(|e| e.deployment.as_ref()) {
            return Err(Error::conflict(format!(
                "{} '{}' is deployed as {}",
                self.kind, name, id
            )));
        }

        entries.insert(
            name.to_string(),
            ArtifactEntry {
                source: source.into(),
                artifact,
                deployment: None,
            },
        );
        Ok(())
    }

    /// Compiled artifact for `name`
    pub fn compiled_artifact(&self, name: &str) -> Result<CompiledArtifact> {
        self.with_entry(name, |entry| entry.artifact.clone())
    }

    /// Definition text for `name`
    pub fn source(&self, name: &str) -> Result<String> {
        self.with_entry(name, |entry| entry.source.clone())
    }

    /// Record the deployment id for a compiled `name`
    pub fn register_deployed(&self, name: &str, id: DeploymentId) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| Error::not_found(self.kind, name))?;

        if let Some(live) = &entry.deployment {
            return Err(Error::conflict(format!(
                "{} '{}' is already deployed as {}",
                self.kind, name, live
            )));
        }

        entry.deployment = Some(id);
        Ok(())
    }

    /// Deployment id of `name`; NotFound when unknown or not deployed
    pub fn deployment_id(&self, name: &str) -> Result<DeploymentId> {
        self.entries
            .read()
            .get(name)
            .and_then(|entry| entry.deployment.clone())
            .ok_or_else(|| Error::not_found(self.kind, name))
    }

    /// Whether `name` currently has a deployment id
    pub fn is_deployed(&self, name: &str) -> bool {
        self.deployment_id(name).is_ok()
    }

    /// Clear the entry holding `id` and return its name
    pub fn remove_deployment(&self, id: &DeploymentId) -> Result<String> {
        let mut entries = self.entries.write();

        let (name, entry) = entries
            .iter_mut()
            .find(|(_, entry)| entry.deployment.as_ref() == Some(id))
            .ok_or_else(|| Error::not_found("deployment", id.as_str()))?;

        entry.deployment = None;
        Ok(name.clone())
    }

    /// Names that currently have a deployment id, sorted
    pub fn deployed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.deployment.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// All registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn with_entry<T>(&self, name: &str, f: impl FnOnce(&ArtifactEntry) -> T) -> Result<T> {
        self.entries
            .read()
            .get(name)
            .map(f)
            .ok_or_else(|| Error::not_found(self.kind, name))
    }
}

/// Event schemas compiled and deployed through the lifecycle API
pub struct EventTypeRegistry {
    artifacts: ArtifactRegistry,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self {
            artifacts: ArtifactRegistry::new("event type"),
        }
    }

    /// Schema text of an event type
    pub fn schema(&self, name: &str) -> Result<String> {
        self.artifacts.source(name)
    }
}

impl Default for EventTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for EventTypeRegistry {
    type Target = ArtifactRegistry;

    fn deref(&self) -> &ArtifactRegistry {
        &self.artifacts
    }
}

/// Rules: definitions, compiled artifacts, deployment ids and match listeners
pub struct RuleRegistry {
    artifacts: ArtifactRegistry,
    listeners: RwLock<HashMap<String, MatchCallback>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self {
            artifacts: ArtifactRegistry::new("rule"),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Definition text of a rule
    pub fn definition(&self, name: &str) -> Result<String> {
        self.artifacts.source(name)
    }

    /// Remember the listener bound to a rule; replaces any previous one
    pub fn set_listener(&self, name: &str, callback: MatchCallback) -> Result<()> {
        if !self.artifacts.is_compiled(name) {
            return Err(Error::not_found("rule", name));
        }
        self.listeners.write().insert(name.to_string(), callback);
        Ok(())
    }

    /// Listener bound to a rule
    pub fn listener(&self, name: &str) -> Result<MatchCallback> {
        self.listeners
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("listener", name))
    }

    /// All defined rule names, sorted
    pub fn defined_names(&self) -> Vec<String> {
        self.artifacts.names()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for RuleRegistry {
    type Target = ArtifactRegistry;

    fn deref(&self) -> &ArtifactRegistry {
        &self.artifacts
    }
}
