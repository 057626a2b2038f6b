//! Error types for SmogWatch

/// Result type alias using SmogWatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for SmogWatch operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or semantically invalid rule/schema definition
    #[error("compile error: {0}")]
    Compile(String),

    /// Runtime rejected a compiled artifact
    #[error("deploy error: {0}")]
    Deploy(String),

    /// Runtime rejected an undeploy request
    #[error("undeploy error: {0}")]
    Undeploy(String),

    /// Lifecycle operation contradicts the current state of a name
    #[error("conflict: {0}")]
    Conflict(String),

    /// Registry or runtime lookup miss
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// What was looked up (event type, rule, deployment, ...)
        kind: &'static str,
        /// The key that missed
        name: String,
    },

    /// Event does not conform to its schema, or a match could not be read
    #[error("event error: {0}")]
    Event(String),

    /// Transport connect/publish failures
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed inbound payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout errors
    #[error("operation timed out")]
    Timeout,

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new compile error
    pub fn compile(msg: impl Into<String>) -> Self {
        Self::Compile(msg.into())
    }

    /// Create a new deploy error
    pub fn deploy(msg: impl Into<String>) -> Self {
        Self::Deploy(msg.into())
    }

    /// Create a new undeploy error
    pub fn undeploy(msg: impl Into<String>) -> Self {
        Self::Undeploy(msg.into())
    }

    /// Create a new conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a new event error
    pub fn event(msg: impl Into<String>) -> Self {
        Self::Event(msg.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this is a registry/runtime lookup miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
