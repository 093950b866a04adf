//! Result contract between an agent run and the orchestrator.
//!
//! An agent reports its result as a JSON object on the last non-empty line of
//! stdout that parses as one:
//!
//! ```json
//! {"code": "print(1)", "reasoning_steps": 7, "token_cost": 1200, "artifacts": ["out/model.pt"]}
//! ```

use crate::error::ExecutionFailure;
use crate::types::TaskRef;
use serde::{Deserialize, Serialize};

/// Parsed result of a successful agent run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Candidate code produced by the agent
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub reasoning_steps: Option<u32>,
    /// Tokens spent; absent means the cost is unknown and scored as the cap
    #[serde(default)]
    pub token_cost: Option<u64>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Task the agent solved, when it differs from the one it was given
    #[serde(default)]
    pub task: Option<TaskRef>,
}

impl AgentOutput {
    #[must_use]
    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    /// Extract the result object from raw stdout.
    ///
    /// # Errors
    ///
    /// [`ExecutionFailure::UnparseableResult`] when no line holds a result object.
    pub fn parse_stdout(stdout: &str) -> Result<Self, ExecutionFailure> {
        stdout
            .lines()
            .rev()
            .map(str::trim)
            .filter(|line| line.starts_with('{'))
            .find_map(|line| serde_json::from_str::<AgentOutput>(line).ok())
            .ok_or_else(|| {
                let tail = stdout
                    .char_indices()
                    .rev()
                    .nth(119)
                    .map_or(stdout, |(i, _)| &stdout[i..]);
                ExecutionFailure::UnparseableResult(format!(
                    "no JSON result line in output (tail: {tail:?})"
                ))
            })
    }
}
