//! Composite fitness scoring.
//!
//! ```text
//! fitness = w_syntax     * syntax_ok
//!         + w_execution  * sandbox_ok
//!         + w_security   * no_dangerous_ops
//!         + w_reasoning  * min(steps / reasoning_cap, 1)
//!         + w_efficiency * max(1 - cost / cost_cap, 0)
//! ```
//!
//! The weights are fixed at (0.2, 0.3, 0.2, 0.2, 0.1), so the sum is already
//! in `[0, 1]`; it is clamped there as well.

use crate::sandbox::{CodeSandbox, SandboxOutcome};
use crate::security::{SecurityFinding, SecurityScanner};
use evo_core::{AgentOutput, FitnessSettings, FitnessWeights, SyntaxCheck, FITNESS_WEIGHTS};
use serde::Serialize;

/// Something that turns an agent's output into a fitness score
#[async_trait::async_trait]
pub trait Evaluate: Send + Sync {
    async fn evaluate(&self, output: &AgentOutput) -> FitnessReport;
}

/// Per-component breakdown of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitnessReport {
    pub syntax: f64,
    pub execution: f64,
    pub security: f64,
    pub reasoning: f64,
    pub efficiency: f64,
    pub total: f64,
    pub sandbox: SandboxOutcome,
    pub findings: Vec<SecurityFinding>,
}

/// The production evaluator
#[derive(Debug, Clone)]
pub struct FitnessEvaluator {
    sandbox: CodeSandbox,
    scanner: SecurityScanner,
    syntax_check: SyntaxCheck,
    reasoning_cap: u32,
    cost_cap: u64,
}

impl FitnessEvaluator {
    #[must_use]
    pub fn from_settings(settings: &FitnessSettings) -> Self {
        Self {
            sandbox: CodeSandbox::from_settings(settings),
            scanner: SecurityScanner::new(),
            syntax_check: settings.syntax_check.clone(),
            reasoning_cap: settings.reasoning_cap.max(1),
            cost_cap: settings.cost_cap.max(1),
        }
    }

    #[must_use]
    pub fn weights(&self) -> &'static FitnessWeights {
        &FITNESS_WEIGHTS
    }

    /// `min(steps / cap, 1)`; unknown steps score zero
    #[must_use]
    pub fn reasoning_score(&self, steps: Option<u32>) -> f64 {
        (f64::from(steps.unwrap_or(0)) / f64::from(self.reasoning_cap)).min(1.0)
    }

    /// `max(1 - cost / cap, 0)`; unknown cost counts as the cap
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn efficiency_score(&self, cost: Option<u64>) -> f64 {
        let cost = cost.unwrap_or(self.cost_cap) as f64;
        (1.0 - cost / self.cost_cap as f64).max(0.0)
    }

    /// Weighted total from already-computed checks
    #[must_use]
    pub fn compose(
        &self,
        syntax_ok: bool,
        sandbox: SandboxOutcome,
        findings: Vec<SecurityFinding>,
        output: &AgentOutput,
    ) -> FitnessReport {
        let syntax = if syntax_ok { 1.0 } else { 0.0 };
        let execution = if sandbox.is_success() { 1.0 } else { 0.0 };
        let security = if findings.is_empty() { 1.0 } else { 0.0 };
        let reasoning = self.reasoning_score(output.reasoning_steps);
        let efficiency = self.efficiency_score(output.token_cost);

        let w = &FITNESS_WEIGHTS;
        let raw = w.syntax * syntax
            + w.execution * execution
            + w.security * security
            + w.reasoning * reasoning
            + w.efficiency * efficiency;
        let total = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };

        tracing::debug!(syntax, execution, security, reasoning, efficiency, total, "fitness evaluated");
        FitnessReport {
            syntax,
            execution,
            security,
            reasoning,
            efficiency,
            total,
            sandbox,
            findings,
        }
    }

    #[must_use]
    pub fn scanner(&self) -> &SecurityScanner {
        &self.scanner
    }
}

#[async_trait::async_trait]
impl Evaluate for FitnessEvaluator {
    async fn evaluate(&self, output: &AgentOutput) -> FitnessReport {
        let code = output.code.as_str();

        let (syntax_ok, sandbox) = tokio::join!(
            self.sandbox.check_syntax(code, &self.syntax_check),
            self.sandbox.run(code),
        );
        let findings = self.scanner.scan(code);
        if !findings.is_empty() {
            tracing::warn!(rules = ?findings.iter().map(|f| f.rule).collect::<Vec<_>>(),
                "candidate code uses disallowed operations");
        }
        self.compose(syntax_ok, sandbox, findings, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator() -> FitnessEvaluator {
        FitnessEvaluator::from_settings(&FitnessSettings::default())
    }

    #[test]
    fn perfect_output_scores_one() {
        let output = AgentOutput {
            reasoning_steps: Some(15),
            token_cost: Some(0),
            ..AgentOutput::with_code("x = 1")
        };
        let report = evaluator().compose(true, SandboxOutcome::Success, vec![], &output);
        assert!((report.total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn failed_execution_loses_its_weight() {
        let output = AgentOutput {
            reasoning_steps: Some(30),
            token_cost: Some(0),
            ..AgentOutput::default()
        };
        let report = evaluator().compose(true, SandboxOutcome::TimedOut, vec![], &output);
        assert_eq!(report.execution, 0.0);
        assert!((report.total - 0.7).abs() < 1e-9);
    }

    #[test]
    fn unknown_cost_counts_as_cap() {
        let e = evaluator();
        assert_eq!(e.efficiency_score(None), 0.0);
        assert!((e.efficiency_score(Some(1500)) - 0.5).abs() < 1e-9);
        assert_eq!(e.reasoning_score(None), 0.0);
        assert_eq!(e.reasoning_score(Some(100)), 1.0);
    }
}
