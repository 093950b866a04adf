//! Execution backends
//!
//! The scheduler only ever talks to an [`ExecutionBackend`] and the
//! [`ExecutionHandle`]s it returns. [`SubprocessBackend`] runs agents as
//! child processes; tests use the in-process scripted backend from
//! [`crate::test_harness`].

mod output;
mod process;

pub use output::OutputBuffer;
pub use process::SubprocessBackend;

use async_trait::async_trait;
use evo_core::{AgentId, ConfigTree, ExecutionFailure, TokenId};
use std::sync::Arc;
use std::time::Duration;

/// Everything a backend needs to start one agent run
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub agent_id: AgentId,
    pub kind: String,
    pub config: ConfigTree,
    pub token: Option<TokenId>,
    /// Wall-clock limit enforced by the handle
    pub timeout: Duration,
}

/// Observed state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// Exited on its own with this code
    Exited(i32),
    /// Stopped by a signal or a `terminate` call
    Killed,
    /// Killed after exceeding its wall-clock limit
    TimedOut,
}

impl RunState {
    #[must_use]
    pub fn is_finished(self) -> bool {
        self != RunState::Running
    }
}

/// Starts agent runs
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Start one run.
    ///
    /// # Errors
    ///
    /// [`ExecutionFailure::Spawn`] or [`ExecutionFailure::Backend`] when
    /// the run could not be started at all.
    async fn launch(
        &self,
        request: LaunchRequest,
    ) -> Result<Arc<dyn ExecutionHandle>, ExecutionFailure>;

    fn name(&self) -> &'static str;
}

/// A live (or finished) run
#[async_trait]
pub trait ExecutionHandle: Send + Sync {
    /// Current state; enforces the wall-clock limit.
    ///
    /// # Errors
    ///
    /// [`ExecutionFailure::Backend`] when the state cannot be observed.
    async fn poll(&self) -> Result<RunState, ExecutionFailure>;

    /// Ask the run to stop, wait up to `grace`, then force it.
    /// Stopping a finished run is a no-op.
    ///
    /// # Errors
    ///
    /// [`ExecutionFailure::Backend`] when the signal cannot be delivered.
    async fn terminate(&self, grace: Duration) -> Result<(), ExecutionFailure>;

    /// Last `tail` lines of combined output
    async fn read_output(&self, tail: usize) -> String;
}
