//! Evolution simulator
//!
//! Drives the complete loop (submit seeds, run, barrier, evolve, repeat)
//! against the scripted backend and checks the scheduler's invariants on
//! the final state:
//! - concurrency never exceeded `min(workers, tokens)`
//! - every record is terminal once the last generation finished
//! - fitness is set exactly on completed records
//! - offspring sit one generation above their oldest parent
//! - every offspring's parents are visible in its recorded ancestry
//! - the lineage graph is acyclic
//! - the best fitness never regresses across generations (elitism)

use crate::generation::GenerationReport;
use crate::orchestrator::{ListFilter, Orchestrator, Statistics};
use crate::test_harness::scripted::ScriptedBackend;
use async_trait::async_trait;
use evo_core::{
    AgentId, AgentOutput, AgentStatus, CategoricalParam, ConfigTree, EvoError, FitnessSettings,
    NumericParam, OrchestratorSettings, SubmitRequest,
};
use evo_fitness::{Evaluate, FitnessEvaluator, FitnessReport, SandboxOutcome};
use evo_lineage::InMemoryGraphStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Simulator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorConfig {
    /// Random seed for seed configs and the evolution engine
    pub seed: u64,
    pub generations: usize,
    pub population: usize,
    pub workers: usize,
    pub tokens: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            generations: 3,
            population: 8,
            workers: 4,
            tokens: 2,
        }
    }
}

/// A broken invariant
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    ConcurrencyExceeded { peak: usize, limit: usize },
    NotTerminal { agent: AgentId, status: AgentStatus },
    FitnessMismatch { agent: AgentId, status: AgentStatus },
    GenerationOrder { child: AgentId, parent: AgentId },
    MissingAncestry { child: AgentId, parent: AgentId },
    LineageCycle,
    BestFitnessRegressed { generation: u32, before: f64, after: f64 },
    Aborted(String),
}

/// Final report from the simulator
#[derive(Debug, Clone)]
pub struct SimulatorReport {
    pub config: SimulatorConfig,
    pub generations: Vec<GenerationReport>,
    pub statistics: Statistics,
    pub peak_concurrency: usize,
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let s = &self.statistics;
        let _ = writeln!(report, "=== Evo Simulator Report ===\n");
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(
            report,
            "Workers: {}  Tokens: {}  Population: {}",
            self.config.workers, self.config.tokens, self.config.population
        );
        let _ = writeln!(report, "Agents: {} total, {} completed, {} failed, {} terminated",
            s.total, s.completed, s.failed, s.terminated);
        let _ = writeln!(report, "Peak concurrency: {}", self.peak_concurrency);
        let _ = writeln!(report, "Max generation: {}", s.max_generation);
        if let Some(best) = s.best_fitness {
            let _ = writeln!(report, "Best fitness: {best:.4}");
        }

        let _ = writeln!(report, "\n=== Generations ===");
        for g in &self.generations {
            let _ = writeln!(
                report,
                "gen {:>3}: {} elites, {} offspring, parent best {}",
                g.generation,
                g.elites.len(),
                g.offspring.len(),
                g.best_fitness.map_or_else(|| "-".to_string(), |b| format!("{b:.4}")),
            );
        }

        if !self.violations.is_empty() {
            let _ = writeln!(report, "\n=== Violations ===");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {v:?}", i + 1);
            }
        }
        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }
}

/// Scores output with the production formula but skips the sandbox: the
/// scripted code always counts as parsing and running cleanly.
#[derive(Debug, Clone)]
pub struct DrySandboxEvaluator {
    inner: FitnessEvaluator,
}

impl DrySandboxEvaluator {
    #[must_use]
    pub fn new(settings: &FitnessSettings) -> Self {
        Self {
            inner: FitnessEvaluator::from_settings(settings),
        }
    }
}

#[async_trait]
impl Evaluate for DrySandboxEvaluator {
    async fn evaluate(&self, output: &AgentOutput) -> FitnessReport {
        let findings = self.inner.scanner().scan(&output.code);
        self.inner
            .compose(true, SandboxOutcome::Success, findings, output)
    }
}

fn seed_config(rng: &mut StdRng) -> ConfigTree {
    ConfigTree::new()
        .with_numeric(
            "reasoning_steps",
            NumericParam::new(f64::from(rng.gen_range(1u32..=15)))
                .with_range(1.0, 15.0)
                .with_step(2.0)
                .integer(),
        )
        .with_numeric(
            "token_cost",
            NumericParam::new(f64::from(rng.gen_range(1u32..=30) * 100))
                .with_range(100.0, 3_000.0)
                .with_step(250.0)
                .integer(),
        )
        .with_numeric(
            "duration_ms",
            NumericParam::new(f64::from(rng.gen_range(1u32..=15)))
                .with_range(1.0, 20.0)
                .integer(),
        )
        .with_choice(
            "optimizer",
            CategoricalParam::new("adam", &["adam", "sgd", "lion"]),
        )
}

/// Run the simulator
pub async fn run_simulator(config: SimulatorConfig) -> SimulatorReport {
    let mut settings = OrchestratorSettings::default()
        .with_workers(config.workers.max(1))
        .with_resource_tokens(config.tokens.max(1))
        .with_seed(config.seed);
    settings.poll_interval_ms = 2;
    settings.grace_period_ms = 50;
    settings.evolution.population_size = Some(config.population.max(1));

    let backend = Arc::new(ScriptedBackend::new());
    let store = Arc::new(InMemoryGraphStore::new());
    let evaluator = Arc::new(DrySandboxEvaluator::new(&settings.fitness));

    let mut report = SimulatorReport {
        config: config.clone(),
        generations: Vec::new(),
        statistics: Statistics::default(),
        peak_concurrency: 0,
        violations: Vec::new(),
    };

    let orchestrator = match Orchestrator::builder(settings)
        .backend(Arc::clone(&backend) as _)
        .evaluator(evaluator)
        .graph_store(Arc::clone(&store) as _)
        .lineage_backoff(Duration::from_millis(1))
        .build()
    {
        Ok(o) => o,
        Err(e) => {
            report.violations.push(Violation::Aborted(e.to_string()));
            return report;
        }
    };

    if let Err(e) = drive(&orchestrator, &config, &mut report).await {
        report.violations.push(Violation::Aborted(e.to_string()));
    }
    orchestrator.shutdown().await;

    report.peak_concurrency = backend.peak();
    report.statistics = orchestrator.statistics();
    check_invariants(&orchestrator, &store, &config, &mut report).await;
    report
}

async fn drive(
    orchestrator: &Arc<Orchestrator>,
    config: &SimulatorConfig,
    report: &mut SimulatorReport,
) -> Result<(), EvoError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    for _ in 0..config.population.max(1) {
        orchestrator
            .submit(SubmitRequest::new("simulated", seed_config(&mut rng)))
            .await?;
    }
    orchestrator.start();
    report.generations = orchestrator.run_generations(config.generations).await?;
    orchestrator.wait_for_generation().await
}

async fn check_invariants(
    orchestrator: &Orchestrator,
    store: &InMemoryGraphStore,
    config: &SimulatorConfig,
    report: &mut SimulatorReport,
) {
    let limit = config.workers.max(1).min(config.tokens.max(1));
    if report.peak_concurrency > limit {
        report.violations.push(Violation::ConcurrencyExceeded {
            peak: report.peak_concurrency,
            limit,
        });
    }

    let records = orchestrator.list(ListFilter::default());
    let generations: HashMap<AgentId, u32> =
        records.iter().map(|r| (r.id, r.generation)).collect();
    for record in &records {
        let status = record.status();
        if !record.is_terminal() {
            report.violations.push(Violation::NotTerminal {
                agent: record.id,
                status,
            });
        }
        if record.fitness().is_some() != (status == AgentStatus::Completed) {
            report.violations.push(Violation::FitnessMismatch {
                agent: record.id,
                status,
            });
        }
        if record.parent_ids.is_empty() {
            continue;
        }
        let oldest = record
            .parent_ids
            .iter()
            .filter_map(|p| generations.get(p))
            .max()
            .copied();
        if oldest.map(|g| g + 1) != Some(record.generation) {
            report.violations.push(Violation::GenerationOrder {
                child: record.id,
                parent: record.parent_ids[0],
            });
        }
        let ancestry = orchestrator.lineage(record.id, 1).await.unwrap_or_default();
        for parent in &record.parent_ids {
            let seen = ancestry.iter().any(|e| e.node.key.id == parent.to_string());
            if !seen {
                report.violations.push(Violation::MissingAncestry {
                    child: record.id,
                    parent: *parent,
                });
            }
        }
    }

    if !store.lineage_is_acyclic() {
        report.violations.push(Violation::LineageCycle);
    }

    let mut best_so_far: Option<f64> = None;
    for generation in &report.generations {
        if let (Some(before), Some(after)) = (best_so_far, generation.best_fitness) {
            if after + 1e-12 < before {
                report.violations.push(Violation::BestFitnessRegressed {
                    generation: generation.generation,
                    before,
                    after,
                });
            }
        }
        best_so_far = generation.best_fitness.or(best_so_far);
    }
}
