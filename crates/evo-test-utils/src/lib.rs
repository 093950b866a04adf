//! Testing utilities for the evo workspace
//!
//! Shared fixtures, fake collaborators and a ready-wired orchestrator rig.

#![allow(missing_docs)]

use async_trait::async_trait;
use evo_core::{
    AgentOutput, AgentRecord, CategoricalParam, ConfigTree, ExecutionFailure, NumericParam,
    OrchestratorSettings,
};
use evo_fitness::{Evaluate, FitnessReport, SandboxOutcome};
use evo_kernel::test_harness::ScriptedBackend;
use evo_kernel::Orchestrator;
use evo_lineage::{
    BestQuery, CohortStats, EdgeKind, GraphEdge, GraphError, GraphNode, GraphStore,
    InMemoryGraphStore, LineageEntry, NodeKey,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn sample_config() -> ConfigTree {
    ConfigTree::new()
        .with_numeric("lr", NumericParam::new(3e-4).with_range(1e-5, 1e-2))
        .with_numeric(
            "layers",
            NumericParam::new(4.0).with_range(1.0, 12.0).with_step(1.0).integer(),
        )
        .with_bool("warmup", true)
        .with_choice("optimizer", CategoricalParam::new("adam", &["adam", "sgd"]))
}

/// Config read by the scripted backend
pub fn scripted_config(reasoning_steps: u32, token_cost: u32, duration_ms: u32) -> ConfigTree {
    ConfigTree::new()
        .with_numeric(
            "reasoning_steps",
            NumericParam::new(f64::from(reasoning_steps))
                .with_range(0.0, 15.0)
                .integer(),
        )
        .with_numeric(
            "token_cost",
            NumericParam::new(f64::from(token_cost))
                .with_range(0.0, 3_000.0)
                .integer(),
        )
        .with_numeric(
            "duration_ms",
            NumericParam::new(f64::from(duration_ms)).integer(),
        )
}

pub fn completed_record(fitness: f64) -> AgentRecord {
    let mut record = AgentRecord::new("nanogpt", sample_config());
    record.mark_queued().unwrap();
    record.mark_running(None).unwrap();
    record.complete(fitness, vec![]).unwrap();
    record
}

pub fn failed_record(failure: &ExecutionFailure) -> AgentRecord {
    let mut record = AgentRecord::new("nanogpt", sample_config());
    record.mark_queued().unwrap();
    record.mark_running(None).unwrap();
    record.fail(failure).unwrap();
    record
}

/// Settings with millisecond polling, suitable for tests
pub fn fast_settings(workers: usize, tokens: Option<usize>) -> OrchestratorSettings {
    let mut settings = OrchestratorSettings::default().with_workers(workers);
    if let Some(tokens) = tokens {
        settings = settings.with_resource_tokens(tokens);
    }
    settings.poll_interval_ms = 2;
    settings.grace_period_ms = 100;
    settings.execution_timeout_secs = 30;
    settings
}

/// Fitness settings that use `sh` instead of python
pub fn shell_fitness(settings: &mut OrchestratorSettings) {
    settings.fitness.interpreter = "sh".to_string();
    settings.fitness.interpreter_args = Vec::new();
    settings.fitness.syntax_check = evo_core::SyntaxCheck::Command {
        args: vec!["-n".to_string()],
    };
    settings.fitness.sandbox_timeout_secs = 2;
}

/// Evaluator that scores every output the same
#[derive(Debug, Clone, Copy)]
pub struct FixedEvaluator(pub f64);

#[async_trait]
impl Evaluate for FixedEvaluator {
    async fn evaluate(&self, _output: &AgentOutput) -> FitnessReport {
        FitnessReport {
            syntax: 1.0,
            execution: 1.0,
            security: 1.0,
            reasoning: self.0,
            efficiency: self.0,
            total: self.0,
            sandbox: SandboxOutcome::Success,
            findings: Vec::new(),
        }
    }
}

/// In-memory store that refuses every `EVOLVED_FROM` write
#[derive(Debug, Default)]
pub struct AncestryOutageStore {
    pub inner: InMemoryGraphStore,
}

#[async_trait]
impl GraphStore for AncestryOutageStore {
    async fn upsert_node(&self, node: GraphNode) -> Result<(), GraphError> {
        self.inner.upsert_node(node).await
    }
    async fn upsert_edge(&self, edge: GraphEdge) -> Result<(), GraphError> {
        if edge.kind == EdgeKind::EvolvedFrom {
            return Err(GraphError::Unavailable("graph backend offline".into()));
        }
        self.inner.upsert_edge(edge).await
    }
    async fn node(&self, key: &NodeKey) -> Result<Option<GraphNode>, GraphError> {
        self.inner.node(key).await
    }
    async fn edges_of(&self, key: &NodeKey) -> Result<Vec<GraphEdge>, GraphError> {
        self.inner.edges_of(key).await
    }
    async fn best_n(&self, query: &BestQuery) -> Result<Vec<GraphNode>, GraphError> {
        self.inner.best_n(query).await
    }
    async fn ancestors(&self, key: &NodeKey, depth: usize) -> Result<Vec<LineageEntry>, GraphError> {
        self.inner.ancestors(key, depth).await
    }
    async fn descendants(&self, key: &NodeKey, depth: usize) -> Result<Vec<LineageEntry>, GraphError> {
        self.inner.descendants(key, depth).await
    }
    async fn cohort_stats(&self, pool: &str, domain: Option<&str>) -> Result<CohortStats, GraphError> {
        self.inner.cohort_stats(pool, domain).await
    }
}

/// In-memory store whose `EVOLVED_FROM` writes stall for `delay`
#[derive(Debug, Default)]
pub struct SlowAncestryStore {
    pub inner: InMemoryGraphStore,
    pub delay: Duration,
    writing: AtomicBool,
}

impl SlowAncestryStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Whether an ancestry write has started
    pub fn writing(&self) -> bool {
        self.writing.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphStore for SlowAncestryStore {
    async fn upsert_node(&self, node: GraphNode) -> Result<(), GraphError> {
        self.inner.upsert_node(node).await
    }
    async fn upsert_edge(&self, edge: GraphEdge) -> Result<(), GraphError> {
        if edge.kind == EdgeKind::EvolvedFrom {
            self.writing.store(true, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
        }
        self.inner.upsert_edge(edge).await
    }
    async fn node(&self, key: &NodeKey) -> Result<Option<GraphNode>, GraphError> {
        self.inner.node(key).await
    }
    async fn edges_of(&self, key: &NodeKey) -> Result<Vec<GraphEdge>, GraphError> {
        self.inner.edges_of(key).await
    }
    async fn best_n(&self, query: &BestQuery) -> Result<Vec<GraphNode>, GraphError> {
        self.inner.best_n(query).await
    }
    async fn ancestors(&self, key: &NodeKey, depth: usize) -> Result<Vec<LineageEntry>, GraphError> {
        self.inner.ancestors(key, depth).await
    }
    async fn descendants(&self, key: &NodeKey, depth: usize) -> Result<Vec<LineageEntry>, GraphError> {
        self.inner.descendants(key, depth).await
    }
    async fn cohort_stats(&self, pool: &str, domain: Option<&str>) -> Result<CohortStats, GraphError> {
        self.inner.cohort_stats(pool, domain).await
    }
}

/// An orchestrator wired to a scripted backend and an in-memory store
pub struct TestRig {
    pub orchestrator: Arc<Orchestrator>,
    pub backend: Arc<ScriptedBackend>,
    pub store: Arc<InMemoryGraphStore>,
}

impl TestRig {
    /// Build and start
    pub fn start(settings: OrchestratorSettings, backend: ScriptedBackend) -> Self {
        Self::start_with(settings, backend, Arc::new(FixedEvaluator(0.5)))
    }

    pub fn start_with(
        settings: OrchestratorSettings,
        backend: ScriptedBackend,
        evaluator: Arc<dyn Evaluate>,
    ) -> Self {
        let backend = Arc::new(backend);
        let store = Arc::new(InMemoryGraphStore::new());
        let orchestrator = Orchestrator::builder(settings)
            .backend(Arc::clone(&backend) as _)
            .evaluator(evaluator)
            .graph_store(Arc::clone(&store) as _)
            .lineage_backoff(Duration::ZERO)
            .build()
            .expect("test settings are valid");
        orchestrator.start();
        Self {
            orchestrator,
            backend,
            store,
        }
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
