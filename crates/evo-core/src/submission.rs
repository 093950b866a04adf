//! Client submissions and their validation.

use crate::config::ConfigTree;
use crate::error::ConfigError;
use crate::record::AgentRecord;
use crate::settings::KindTemplate;
use crate::types::TaskRef;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// A request to run one agent
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub kind: String,
    pub config: ConfigTree,
    pub domain: Option<String>,
    pub pool: Option<String>,
    pub task: Option<TaskRef>,
}

/// Wire shape of a submission; `config` may be tagged or plain JSON.
#[derive(Deserialize)]
struct RawSubmission {
    kind: Option<String>,
    #[serde(default)]
    config: Option<Value>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    pool: Option<String>,
    #[serde(default)]
    task: Option<TaskRef>,
}

impl SubmitRequest {
    #[must_use]
    pub fn new(kind: impl Into<String>, config: ConfigTree) -> Self {
        Self {
            kind: kind.into(),
            config,
            domain: None,
            pool: None,
            task: None,
        }
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    #[must_use]
    pub fn with_task(mut self, task: TaskRef) -> Self {
        self.task = Some(task);
        self
    }

    /// Parse a JSON submission. The config is read as a tagged tree when it
    /// has that shape and as plain JSON otherwise.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingField`] without `kind`, [`ConfigError::Malformed`]
    /// for structurally wrong input.
    pub fn from_json(value: &Value) -> Result<Self, ConfigError> {
        let raw: RawSubmission = serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;
        let kind = raw
            .kind
            .ok_or_else(|| ConfigError::MissingField("kind".to_string()))?;
        let config = match raw.config {
            None | Some(Value::Null) => ConfigTree::new(),
            Some(cfg) => match serde_json::from_value::<ConfigTree>(cfg.clone()) {
                Ok(tree) => tree,
                Err(_) => ConfigTree::from_plain_json(&cfg)?,
            },
        };
        Ok(Self {
            kind,
            config,
            domain: raw.domain,
            pool: raw.pool,
            task: raw.task,
        })
    }

    /// Check the submission against the kind registry and the config's own
    /// constraints. An empty registry accepts every kind.
    ///
    /// # Errors
    ///
    /// Missing or unknown kind, missing required keys, invalid leaves.
    pub fn validate(&self, kinds: &BTreeMap<String, KindTemplate>) -> Result<(), ConfigError> {
        if self.kind.trim().is_empty() {
            return Err(ConfigError::MissingField("kind".to_string()));
        }
        if !kinds.is_empty() {
            let template = kinds
                .get(&self.kind)
                .ok_or_else(|| ConfigError::UnknownKind(self.kind.clone()))?;
            if let Some(missing) = template
                .required_keys
                .iter()
                .find(|key| !self.config.contains_key(key))
            {
                return Err(ConfigError::MissingField(format!("config.{missing}")));
            }
        }
        if let Some(task) = &self.task {
            if task.id.trim().is_empty() {
                return Err(ConfigError::MissingField("task.id".to_string()));
            }
        }
        self.config.validate()
    }

    /// Build the generation-0 record for this submission
    #[must_use]
    pub fn into_record(self) -> AgentRecord {
        let mut record = AgentRecord::new(self.kind, self.config)
            .with_domain(self.domain.as_deref())
            .with_task(self.task);
        if let Some(pool) = self.pool {
            record = record.with_pool(pool);
        }
        record
    }
}
