//! Agent lifecycle state machine.
//!
//! ```text
//! initialized -> queued -> running -> completed
//!      |           |          |-----> failed
//!      |           |          '-----> terminated
//!      '-----------'----------------> terminated
//! ```
//!
//! `completed`, `failed` and `terminated` are final.

use crate::error::StateMachineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initialized,
    Queued,
    Running,
    Completed,
    Failed,
    Terminated,
}

impl AgentStatus {
    /// Every status, in lifecycle order
    pub const ALL: [AgentStatus; 6] = [
        AgentStatus::Initialized,
        AgentStatus::Queued,
        AgentStatus::Running,
        AgentStatus::Completed,
        AgentStatus::Failed,
        AgentStatus::Terminated,
    ];

    /// True for `completed`, `failed` and `terminated`
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Terminated
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Initialized => "initialized",
            AgentStatus::Queued => "queued",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Terminated => "terminated",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates a status transition.
///
/// # Errors
///
/// Returns [`StateMachineError::AlreadyTerminal`] when `from` is final, and
/// [`StateMachineError::IllegalTransition`] for any other edge not in the graph.
pub fn validate_transition(from: AgentStatus, to: AgentStatus) -> Result<(), StateMachineError> {
    if from.is_terminal() {
        return Err(StateMachineError::AlreadyTerminal { status: from });
    }
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

#[must_use]
pub fn allowed_transitions(from: AgentStatus) -> Vec<AgentStatus> {
    use AgentStatus::{Completed, Failed, Initialized, Queued, Running, Terminated};
    match from {
        Initialized => vec![Queued, Terminated],
        Queued => vec![Running, Terminated],
        Running => vec![Completed, Failed, Terminated],
        Completed | Failed | Terminated => vec![],
    }
}
