//! Definition compiler
//!
//! Turns definition text into a [`CompiledArtifact`], resolving every
//! event type a rule references against the [`CompileContext`] that was
//! visible at compile time: the configured event types plus the schemas
//! currently deployed in the runtime (the runtime path).

use regex::Regex;
use smogwatch_core::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::rule::AggregateFunction;
use crate::{Definition, EventSchema, RuleDefinition};

fn identifier() -> &'static Regex {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
    })
}

/// Event types visible to a compilation
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
    types: HashMap<String, EventSchema>,
}

impl CompileContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Make additional event types visible
    pub fn with_types(mut self, schemas: impl IntoIterator<Item = EventSchema>) -> Self {
        for schema in schemas {
            self.types.insert(schema.name.clone(), schema);
        }
        self
    }

    /// Look up a visible event type
    pub fn resolve(&self, name: &str) -> Option<&EventSchema> {
        self.types.get(name)
    }

    /// Number of visible event types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no event types are visible
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Opaque handle to a compiled definition
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    inner: Arc<ArtifactInner>,
}

#[derive(Debug)]
struct ArtifactInner {
    source: String,
    unit: CompiledUnit,
}

/// What a compiled artifact contains
#[derive(Debug, Clone)]
pub enum CompiledUnit {
    /// An event type declaration
    Schema(EventSchema),

    /// A rule bound to the input schema it was compiled against
    Rule(CompiledRule),
}

/// A rule together with its resolved input schema
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub definition: RuleDefinition,
    pub input: EventSchema,
}

impl CompiledArtifact {
    /// Name declared by the compiled definition
    pub fn name(&self) -> &str {
        match &self.inner.unit {
            CompiledUnit::Schema(schema) => &schema.name,
            CompiledUnit::Rule(rule) => &rule.definition.name,
        }
    }

    /// Source text the artifact was compiled from
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// Compiled contents
    pub fn unit(&self) -> &CompiledUnit {
        &self.inner.unit
    }

    /// Whether the artifact declares an event type
    pub fn is_schema(&self) -> bool {
        matches!(self.inner.unit, CompiledUnit::Schema(_))
    }

    /// Whether the artifact is a rule
    pub fn is_rule(&self) -> bool {
        matches!(self.inner.unit, CompiledUnit::Rule(_))
    }
}

/// Compile definition text against the visible event types
pub fn compile(source: &str, context: &CompileContext) -> Result<CompiledArtifact> {
    let unit = match Definition::from_yaml(source)? {
        Definition::Schema(schema) => CompiledUnit::Schema(check_schema(schema, context)?),
        Definition::Rule(rule) => CompiledUnit::Rule(check_rule(rule, context)?),
    };

    Ok(CompiledArtifact {
        inner: Arc::new(ArtifactInner {
            source: source.to_string(),
            unit,
        }),
    })
}

fn check_identifier(what: &str, name: &str) -> Result<()> {
    if identifier().is_match(name) {
        Ok(())
    } else {
        Err(Error::compile(format!("invalid {} name '{}'", what, name)))
    }
}

fn check_schema(schema: EventSchema, context: &CompileContext) -> Result<EventSchema> {
    check_identifier("event type", &schema.name)?;

    if schema.fields.is_empty() {
        return Err(Error::compile(format!(
            "event type '{}' declares no fields",
            schema.name
        )));
    }
    for field in schema.fields.keys() {
        check_identifier("field", field)?;
    }

    if context.resolve(&schema.name).is_some() {
        return Err(Error::compile(format!(
            "event type '{}' already exists",
            schema.name
        )));
    }

    Ok(schema)
}

fn check_rule(rule: RuleDefinition, context: &CompileContext) -> Result<CompiledRule> {
    check_identifier("rule", &rule.name)?;
    check_identifier("insert-into", &rule.insert_into)?;

    let input = context.resolve(&rule.from).cloned().ok_or_else(|| {
        Error::compile(format!(
            "rule '{}' references unknown event type '{}'",
            rule.name, rule.from
        ))
    })?;

    if rule.window_secs == 0 {
        return Err(Error::compile(format!(
            "rule '{}' has an empty window",
            rule.name
        )));
    }

    let field = |name: &str| {
        input.field_type(name).ok_or_else(|| {
            Error::compile(format!(
                "rule '{}': event type '{}' has no field '{}'",
                rule.name, input.name, name
            ))
        })
    };

    field(rule.group_by.as_str())?;

    if !field(rule.timestamp_field.as_str())?.is_numeric() {
        return Err(Error::compile(format!(
            "rule '{}': timestamp field '{}' is not numeric",
            rule.name, rule.timestamp_field
        )));
    }

    let aggregated = field(rule.aggregate.field.as_str())?;
    if rule.aggregate.function != AggregateFunction::Count && !aggregated.is_numeric() {
        return Err(Error::compile(format!(
            "rule '{}': cannot aggregate non-numeric field '{}'",
            rule.name, rule.aggregate.field
        )));
    }

    if !rule.having.threshold.is_finite() {
        return Err(Error::compile(format!(
            "rule '{}' has a non-finite threshold",
            rule.name
        )));
    }

    let output = &rule.output;
    for alias in [&output.event_time, &output.group_key, &output.value] {
        check_identifier("output field", alias)?;
    }
    if output.event_time == output.group_key
        || output.event_time == output.value
        || output.group_key == output.value
    {
        return Err(Error::compile(format!(
            "rule '{}' produces duplicate output field names",
            rule.name
        )));
    }

    Ok(CompiledRule {
        definition: rule,
        input,
    })
}
