//! Error taxonomy for the orchestrator.

use crate::state_machine::AgentStatus;
use crate::types::AgentId;
use std::path::PathBuf;
use std::time::Duration;

/// Result alias used across the evo crates
pub type Result<T> = std::result::Result<T, EvoError>;

/// Top-level orchestrator error
#[derive(Debug, thiserror::Error)]
pub enum EvoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Execution(#[from] ExecutionFailure),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error(transparent)]
    ResourceExhausted(#[from] ResourceExhausted),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Schema(#[from] crate::schema::SchemaError),

    #[error("agent not found: {0}")]
    NotFound(AgentId),

    #[error("generation barrier not reached: {pending} agent(s) still active")]
    BarrierNotReached { pending: usize },

    #[error("no completed agent with a fitness score to select parents from")]
    NoViableParents,

    #[error("orchestrator is shut down")]
    ShutDown,
}

impl EvoError {
    /// Whether the caller can reasonably try the same call again
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EvoError::Persistence(_)
                | EvoError::ResourceExhausted(_)
                | EvoError::BarrierNotReached { .. }
        )
    }

    /// Whether repeating the call can never succeed: the input is rejected
    /// outright or the orchestrator is gone. Execution outcomes and an empty
    /// parent pool are neither retryable nor terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EvoError::Config(_)
                | EvoError::Settings(_)
                | EvoError::Schema(_)
                | EvoError::StateMachine(_)
                | EvoError::NotFound(_)
                | EvoError::ShutDown
        )
    }
}

/// Invalid agent configuration or submission
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("invalid value at `{path}`: {reason}")]
    InvalidValue { path: String, reason: String },

    #[error("unknown agent kind `{0}`")]
    UnknownKind(String),

    #[error("malformed submission: {0}")]
    Malformed(String),
}

impl ConfigError {
    pub(crate) fn invalid(path: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Rejected lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: AgentStatus, to: AgentStatus },

    #[error("agent is already {status}")]
    AlreadyTerminal { status: AgentStatus },
}

/// Why an agent run did not produce a result
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionFailure {
    #[error("agent exited with code {0}")]
    NonZeroExit(i32),

    #[error("agent exceeded its wall-clock limit of {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("agent was killed")]
    Killed,

    #[error("failed to start agent: {0}")]
    Spawn(String),

    #[error("execution backend error: {0}")]
    Backend(String),

    #[error("agent result could not be parsed: {0}")]
    UnparseableResult(String),
}

impl ExecutionFailure {
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionFailure::Timeout(_))
    }
}

/// A graph-store write that still failed after its retry
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{operation} failed after {attempts} attempt(s): {reason}")]
pub struct PersistenceError {
    pub operation: String,
    pub attempts: u32,
    pub reason: String,
}

/// Every resource token is leased
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("all {capacity} resource tokens are leased")]
pub struct ResourceExhausted {
    pub capacity: usize,
}

/// Problems loading orchestrator settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML settings: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid YAML settings: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unsupported settings format `{0}` (expected .toml, .yaml or .yml)")]
    UnsupportedFormat(String),

    #[error("environment override {key}={value} is not valid")]
    BadOverride { key: String, value: String },

    #[error("invalid settings: {0}")]
    Invalid(String),
}
