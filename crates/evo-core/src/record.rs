//! The authoritative per-agent record.

use crate::config::ConfigTree;
use crate::error::{ExecutionFailure, StateMachineError};
use crate::state_machine::{validate_transition, AgentStatus};
use crate::types::{normalize_domain, AgentId, TaskRef, TokenId, DEFAULT_POOL};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of parents an agent can have
pub const MAX_PARENTS: usize = 2;

/// One agent: identity, lineage, configuration and lifecycle state.
///
/// Status and fitness are only changed through the transition methods, so
/// a record always satisfies:
/// - `fitness` is set iff `status == Completed`
/// - `generation` is 0 without parents, otherwise one more than the oldest parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub kind: String,
    pub generation: u32,
    pub parent_ids: Vec<AgentId>,
    pub config: ConfigTree,
    status: AgentStatus,
    fitness: Option<f64>,
    pub domain: String,
    pub pool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskRef>,
    pub created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    resource_token: Option<TokenId>,
    #[serde(default)]
    pub artifact_refs: Vec<String>,
    failure: Option<String>,
}

impl AgentRecord {
    /// A generation-0 agent with no parents
    #[must_use]
    pub fn new(kind: impl Into<String>, config: ConfigTree) -> Self {
        Self {
            id: AgentId::new(),
            kind: kind.into(),
            generation: 0,
            parent_ids: Vec::new(),
            config,
            status: AgentStatus::Initialized,
            fitness: None,
            domain: normalize_domain(None),
            pool: DEFAULT_POOL.to_string(),
            task: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            resource_token: None,
            artifact_refs: Vec::new(),
            failure: None,
        }
    }

    /// An offspring of up to [`MAX_PARENTS`] parents.
    ///
    /// Kind, domain, pool and task are inherited from the first parent;
    /// duplicate parents collapse to one.
    #[must_use]
    pub fn offspring(config: ConfigTree, parents: &[&AgentRecord]) -> Self {
        let first = parents.first();
        let mut record = Self::new(
            first.map_or_else(String::new, |p| p.kind.clone()),
            config,
        );
        for parent in parents.iter().take(MAX_PARENTS) {
            if !record.parent_ids.contains(&parent.id) {
                record.parent_ids.push(parent.id);
            }
        }
        record.generation = parents
            .iter()
            .map(|p| p.generation)
            .max()
            .map_or(0, |g| g + 1);
        if let Some(p) = first {
            record.domain = p.domain.clone();
            record.pool = p.pool.clone();
            record.task = p.task.clone();
        }
        record
    }

    #[must_use]
    pub fn with_domain(mut self, domain: Option<&str>) -> Self {
        self.domain = normalize_domain(domain);
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = pool.into();
        self
    }

    #[must_use]
    pub fn with_task(mut self, task: Option<TaskRef>) -> Self {
        self.task = task;
        self
    }

    #[inline]
    #[must_use]
    pub fn status(&self) -> AgentStatus {
        self.status
    }

    #[inline]
    #[must_use]
    pub fn fitness(&self) -> Option<f64> {
        self.fitness
    }

    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    #[must_use]
    pub fn resource_token(&self) -> Option<&TokenId> {
        self.resource_token.as_ref()
    }

    /// Failure or termination reason, if any
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn transition(&mut self, to: AgentStatus) -> Result<(), StateMachineError> {
        validate_transition(self.status, to)?;
        self.status = to;
        if to.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// `initialized -> queued`
    ///
    /// # Errors
    ///
    /// Fails when the record is not `initialized`.
    pub fn mark_queued(&mut self) -> Result<(), StateMachineError> {
        self.transition(AgentStatus::Queued)
    }

    /// `queued -> running`, recording the leased token if any
    ///
    /// # Errors
    ///
    /// Fails when the record is not `queued`.
    pub fn mark_running(&mut self, token: Option<TokenId>) -> Result<(), StateMachineError> {
        self.transition(AgentStatus::Running)?;
        self.started_at = Some(Utc::now());
        self.resource_token = token;
        Ok(())
    }

    /// `running -> completed` with its fitness (clamped to `[0, 1]`)
    ///
    /// # Errors
    ///
    /// Fails when the record is not `running`.
    pub fn complete(
        &mut self,
        fitness: f64,
        artifacts: Vec<String>,
    ) -> Result<(), StateMachineError> {
        self.transition(AgentStatus::Completed)?;
        self.fitness = Some(if fitness.is_finite() {
            fitness.clamp(0.0, 1.0)
        } else {
            0.0
        });
        self.artifact_refs = artifacts;
        Ok(())
    }

    /// `running -> failed`
    ///
    /// # Errors
    ///
    /// Fails when the record is not `running`.
    pub fn fail(&mut self, reason: &ExecutionFailure) -> Result<(), StateMachineError> {
        self.transition(AgentStatus::Failed)?;
        self.failure = Some(reason.to_string());
        Ok(())
    }

    /// Any non-terminal status `-> terminated`
    ///
    /// # Errors
    ///
    /// Returns [`StateMachineError::AlreadyTerminal`] for final records.
    pub fn terminate(&mut self, reason: &str) -> Result<(), StateMachineError> {
        self.transition(AgentStatus::Terminated)?;
        self.failure = Some(reason.to_string());
        Ok(())
    }
}
