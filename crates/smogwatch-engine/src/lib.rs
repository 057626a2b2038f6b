//! SmogWatch Evaluation Engine
//!
//! Continuous evaluation of windowed aggregation rules over sensor events.
//!
//! Definitions are written in YAML and come in two kinds:
//! - Event schemas (`type: schema`) declaring a named event type and its fields
//! - Rules (`type: rule`) that group one event type by a key, aggregate a field
//!   over a sliding time window and emit an event when the aggregate passes a
//!   threshold
//!
//! The [`Engine`] facade compiles and deploys definitions into an
//! [`EvaluationRuntime`]; [`PatternService`] adds the name-keyed lifecycle
//! on top of it.

pub mod builtin;
pub mod compiler;
pub mod definition;
pub mod engine;
pub mod lifecycle;
pub mod registry;
pub mod rule;
pub mod runtime;
pub mod schema;
pub mod window;

pub use builtin::{install, sensor_event_types, BuiltinRule, BUILTIN_RULES};
pub use compiler::{compile, CompileContext, CompiledArtifact, CompiledRule, CompiledUnit};
pub use definition::Definition;
pub use engine::{Engine, EngineConfig, MatchCallback};
pub use lifecycle::{PatternDeployment, PatternService};
pub use registry::{ArtifactEntry, ArtifactRegistry, EventTypeRegistry, RuleRegistry};
pub use rule::{Aggregate, AggregateFunction, Comparison, Condition, OutputFields, RuleDefinition};
pub use runtime::{
    Clock, DeploymentId, EvaluationRuntime, ManualClock, MatchListener, SystemClock,
    WindowedRuntime,
};
pub use schema::EventSchema;
pub use window::SlidingWindow;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::engine::{Engine, EngineConfig, MatchCallback};
    pub use crate::lifecycle::{PatternDeployment, PatternService};
    pub use crate::rule::RuleDefinition;
    pub use crate::runtime::{DeploymentId, EvaluationRuntime};
    pub use crate::schema::EventSchema;
}
