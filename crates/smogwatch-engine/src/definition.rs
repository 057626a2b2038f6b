//! Definition documents accepted by the compiler

use serde::{Deserialize, Serialize};
use smogwatch_core::{Error, Result};

use crate::{EventSchema, RuleDefinition};

/// A single compilable unit, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum Definition {
    /// Event type declaration
    Schema(EventSchema),

    /// Windowed aggregation rule
    Rule(RuleDefinition),
}

impl Definition {
    /// Parse a definition from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::compile(format!("invalid definition: {}", e)))
    }

    /// Name declared by the definition
    pub fn name(&self) -> &str {
        match self {
            Self::Schema(schema) => &schema.name,
            Self::Rule(rule) => &rule.name,
        }
    }
}
