//! Identifier and small value types shared by every evo crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Domain assigned to agents and solutions that declare none.
pub const DEFAULT_DOMAIN: &str = "code";

/// Pool assigned to agents that declare none.
pub const DEFAULT_POOL: &str = "default";

/// Unique agent identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Ulid);

impl AgentId {
    /// Generate new agent ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AgentId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Identifier of one unit in the resource pool (a GPU slot, a device name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub String);

impl TokenId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TokenId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TokenId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim and lower-case a domain label, falling back to [`DEFAULT_DOMAIN`].
#[must_use]
pub fn normalize_domain(domain: Option<&str>) -> String {
    match domain.map(str::trim) {
        Some(d) if !d.is_empty() => d.to_lowercase(),
        _ => DEFAULT_DOMAIN.to_string(),
    }
}

/// A task an agent declares it is solving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRef {
    /// Stable task identifier
    pub id: String,
    /// Task family, e.g. `"sorting"`
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub difficulty: f64,
    #[serde(default)]
    pub domain: Option<String>,
}

impl TaskRef {
    /// Create a task reference with only an id and type
    #[must_use]
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            description: String::new(),
            difficulty: 0.0,
            domain: None,
        }
    }

    /// Normalised domain of this task
    #[must_use]
    pub fn domain(&self) -> String {
        normalize_domain(self.domain.as_deref())
    }
}
