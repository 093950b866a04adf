//! The orchestration context
//!
//! One [`Orchestrator`] owns every piece of shared state: the record map,
//! the experiment queue, the resource pool, live execution handles, the
//! lineage recorder and the evolution engine. Workers and the evolution loop
//! receive it as an `Arc`; nothing is global.

use crate::backend::{ExecutionBackend, ExecutionHandle, SubprocessBackend};
use crate::generation::Cohort;
use crate::queue::ExperimentQueue;
use crate::resource::ResourcePool;
use crate::worker::WorkerPool;
use dashmap::DashMap;
use evo_core::{
    AgentId, AgentRecord, AgentStatus, EvoError, OrchestratorSettings, Result,
    StateMachineError, SubmitRequest,
};
use evo_evolution::EvolutionEngine;
use evo_fitness::{Evaluate, FitnessEvaluator};
use evo_lineage::{
    BestQuery, CohortStats, GraphNode, GraphStore, InMemoryGraphStore, LineageEntry,
    LineageRecorder,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub(crate) const SUBMITTED_COUNTER: &str = "evo_agents_submitted_total";
pub(crate) const FINISHED_COUNTER: &str = "evo_agents_finished_total";
pub(crate) const LINEAGE_FAILURE_COUNTER: &str = "evo_lineage_write_failures_total";

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    settings: OrchestratorSettings,
    backend: Option<Arc<dyn ExecutionBackend>>,
    evaluator: Option<Arc<dyn Evaluate>>,
    store: Option<Arc<dyn GraphStore>>,
    lineage_backoff: Option<Duration>,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self {
            settings,
            backend: None,
            evaluator: None,
            store: None,
            lineage_backoff: None,
        }
    }

    /// Defaults to [`SubprocessBackend`]
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Defaults to [`FitnessEvaluator`] built from the fitness settings
    #[must_use]
    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluate>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Defaults to an [`InMemoryGraphStore`]
    #[must_use]
    pub fn graph_store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn lineage_backoff(mut self, backoff: Duration) -> Self {
        self.lineage_backoff = Some(backoff);
        self
    }

    /// Validate settings and assemble the context. Workers are not started.
    ///
    /// # Errors
    ///
    /// [`EvoError::Settings`] when the settings fail validation.
    pub fn build(self) -> Result<Arc<Orchestrator>> {
        self.settings.validate()?;
        let settings = self.settings;

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(SubprocessBackend::new(settings.backend.clone())));
        let evaluator = self
            .evaluator
            .unwrap_or_else(|| Arc::new(FitnessEvaluator::from_settings(&settings.fitness)));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryGraphStore::new()));
        let mut lineage = LineageRecorder::new(store);
        if let Some(backoff) = self.lineage_backoff {
            lineage = lineage.with_backoff(backoff);
        }

        let (finished, _) = watch::channel(0);
        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Orchestrator {
            queue: ExperimentQueue::new(),
            resources: ResourcePool::new(settings.resource_tokens.iter().map(String::as_str)),
            records: RwLock::new(HashMap::new()),
            running: DashMap::new(),
            transcripts: DashMap::new(),
            engine: Mutex::new(EvolutionEngine::new(settings.evolution.clone())),
            cohort: Mutex::new(Cohort::default()),
            evolve_lock: tokio::sync::Mutex::new(()),
            workers: Mutex::new(None),
            backend,
            evaluator,
            lineage,
            finished,
            shutdown,
            settings,
        }))
    }
}

/// Filter for [`Orchestrator::list`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub status: Option<AgentStatus>,
    pub generation: Option<u32>,
}

impl ListFilter {
    #[must_use]
    pub fn status(mut self, status: AgentStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn generation(mut self, generation: u32) -> Self {
        self.generation = Some(generation);
        self
    }

    fn matches(&self, record: &AgentRecord) -> bool {
        self.status.map_or(true, |s| record.status() == s)
            && self.generation.map_or(true, |g| record.generation == g)
    }
}

/// Snapshot of scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub total: usize,
    pub initialized: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub terminated: usize,
    pub average_fitness: Option<f64>,
    pub best_fitness: Option<f64>,
    pub max_generation: u32,
    /// Index of the cohort currently behind the barrier
    pub current_generation: u32,
    pub queue_depth: usize,
    pub tokens_in_use: usize,
    pub peak_tokens_in_use: usize,
}

/// Shared orchestration context.
pub struct Orchestrator {
    pub(crate) settings: OrchestratorSettings,
    pub(crate) records: RwLock<HashMap<AgentId, AgentRecord>>,
    pub(crate) queue: ExperimentQueue,
    pub(crate) resources: ResourcePool,
    pub(crate) backend: Arc<dyn ExecutionBackend>,
    pub(crate) evaluator: Arc<dyn Evaluate>,
    pub(crate) lineage: LineageRecorder,
    /// Handles of runs in flight
    pub(crate) running: DashMap<AgentId, Arc<dyn ExecutionHandle>>,
    /// Captured output of finished runs
    pub(crate) transcripts: DashMap<AgentId, String>,
    pub(crate) engine: Mutex<EvolutionEngine>,
    pub(crate) cohort: Mutex<Cohort>,
    pub(crate) evolve_lock: tokio::sync::Mutex<()>,
    /// Bumped on every transition into a terminal status
    pub(crate) finished: watch::Sender<u64>,
    pub(crate) shutdown: watch::Sender<bool>,
    workers: Mutex<Option<WorkerPool>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backend", &self.backend.name())
            .field("workers", &self.settings.workers)
            .field("queue_depth", &self.queue.len())
            .field("running", &self.running.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Builder with the given settings
    #[must_use]
    pub fn builder(settings: OrchestratorSettings) -> OrchestratorBuilder {
        OrchestratorBuilder::new(settings)
    }

    #[must_use]
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    #[must_use]
    pub fn resources(&self) -> &ResourcePool {
        &self.resources
    }

    #[must_use]
    pub fn queue(&self) -> &ExperimentQueue {
        &self.queue
    }

    #[must_use]
    pub fn lineage_recorder(&self) -> &LineageRecorder {
        &self.lineage
    }

    /// Spawn the worker pool. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        if workers.is_none() {
            *workers = Some(WorkerPool::spawn(Arc::clone(self), self.settings.workers));
        }
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Validate and enqueue a new agent.
    ///
    /// The record joins the current generation's cohort. Nothing is queued
    /// when validation fails.
    ///
    /// # Errors
    ///
    /// [`EvoError::Config`] for an invalid request, [`EvoError::ShutDown`]
    /// after [`Orchestrator::shutdown`].
    pub async fn submit(&self, request: SubmitRequest) -> Result<AgentId> {
        if self.is_shut_down() {
            return Err(EvoError::ShutDown);
        }
        request.validate(&self.settings.kinds)?;
        let record = request.into_record();
        let id = record.id;
        self.records.write().insert(id, record.clone());
        self.persist_agent(&record).await;
        {
            // An evolve step in flight replaces the cohort; join the one it installs.
            let _evolving = self.evolve_lock.lock().await;
            self.enqueue(id)?;
            self.cohort.lock().members.push(id);
        }

        metrics::counter!(SUBMITTED_COUNTER).increment(1);
        tracing::info!(agent_id = %id, kind = %record.kind, domain = %record.domain,
            generation = record.generation, "agent submitted");
        Ok(id)
    }

    /// `initialized -> queued`, then push onto the queue
    pub(crate) fn enqueue(&self, id: AgentId) -> Result<()> {
        {
            let mut records = self.records.write();
            let record = records.get_mut(&id).ok_or(EvoError::NotFound(id))?;
            record.mark_queued()?;
        }
        self.queue.push(id);
        tracing::debug!(agent_id = %id, queue_depth = self.queue.len(), "agent queued");
        Ok(())
    }

    /// # Errors
    ///
    /// [`EvoError::NotFound`] for an unknown id.
    pub fn get(&self, id: AgentId) -> Result<AgentRecord> {
        self.records
            .read()
            .get(&id)
            .cloned()
            .ok_or(EvoError::NotFound(id))
    }

    pub(crate) fn status_of(&self, id: AgentId) -> Option<AgentStatus> {
        self.records.read().get(&id).map(AgentRecord::status)
    }

    /// Records matching `filter`, oldest first
    #[must_use]
    pub fn list(&self, filter: ListFilter) -> Vec<AgentRecord> {
        let mut out: Vec<AgentRecord> = self
            .records
            .read()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Stop an agent.
    ///
    /// Returns `true` when this call moved the agent to `terminated` and
    /// `false` when it had already finished (a no-op). A queued agent is
    /// taken off the queue; a running one is asked to stop and then killed
    /// after the grace period.
    ///
    /// # Errors
    ///
    /// [`EvoError::NotFound`] for an unknown id.
    pub async fn terminate(&self, id: AgentId) -> Result<bool> {
        let updated = {
            let mut records = self.records.write();
            let record = records.get_mut(&id).ok_or(EvoError::NotFound(id))?;
            match record.terminate("terminated by request") {
                Ok(()) => record.clone(),
                Err(StateMachineError::AlreadyTerminal { status }) => {
                    tracing::debug!(agent_id = %id, %status, "terminate on finished agent ignored");
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.queue.remove(id);
        let handle = self.running.get(&id).map(|h| Arc::clone(h.value()));
        if let Some(handle) = handle {
            if let Err(e) = handle.terminate(self.settings.grace_period()).await {
                tracing::warn!(agent_id = %id, error = %e, "failed to stop agent run");
            }
        }

        metrics::counter!(FINISHED_COUNTER, "status" => AgentStatus::Terminated.as_str())
            .increment(1);
        self.persist_agent(&updated).await;
        self.notify_finished();
        tracing::info!(agent_id = %id, "agent terminated");
        Ok(true)
    }

    /// Last `tail` lines of an agent's output.
    ///
    /// Live output for running agents, the captured transcript for finished
    /// ones, empty for agents that never ran.
    ///
    /// # Errors
    ///
    /// [`EvoError::NotFound`] for an unknown id.
    pub async fn logs(&self, id: AgentId, tail: usize) -> Result<String> {
        let handle = self.running.get(&id).map(|h| Arc::clone(h.value()));
        if let Some(handle) = handle {
            return Ok(handle.read_output(tail).await);
        }
        if let Some(transcript) = self.transcripts.get(&id) {
            return Ok(tail_lines(transcript.value(), tail));
        }
        if self.records.read().contains_key(&id) {
            Ok(String::new())
        } else {
            Err(EvoError::NotFound(id))
        }
    }

    #[must_use]
    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics {
            current_generation: self.cohort.lock().generation,
            queue_depth: self.queue.len(),
            tokens_in_use: self.resources.in_use(),
            peak_tokens_in_use: self.resources.peak(),
            ..Statistics::default()
        };
        let mut fitness_sum = 0.0;
        let records = self.records.read();
        for record in records.values() {
            stats.total += 1;
            stats.max_generation = stats.max_generation.max(record.generation);
            match record.status() {
                AgentStatus::Initialized => stats.initialized += 1,
                AgentStatus::Queued => stats.queued += 1,
                AgentStatus::Running => stats.running += 1,
                AgentStatus::Completed => stats.completed += 1,
                AgentStatus::Failed => stats.failed += 1,
                AgentStatus::Terminated => stats.terminated += 1,
            }
            if let Some(f) = record.fitness() {
                fitness_sum += f;
                stats.best_fitness = Some(stats.best_fitness.map_or(f, |b: f64| b.max(f)));
            }
        }
        if stats.completed > 0 {
            #[allow(clippy::cast_precision_loss)]
            let avg = fitness_sum / stats.completed as f64;
            stats.average_fitness = Some(avg);
        }
        stats
    }

    /// Ancestry of an agent up to `depth` generations back
    ///
    /// # Errors
    ///
    /// [`EvoError::NotFound`] for an unknown id, [`EvoError::Persistence`]
    /// when the graph store cannot answer.
    pub async fn lineage(&self, id: AgentId, depth: usize) -> Result<Vec<LineageEntry>> {
        if !self.records.read().contains_key(&id) {
            return Err(EvoError::NotFound(id));
        }
        Ok(self.lineage.lineage(id, depth).await?)
    }

    /// # Errors
    ///
    /// [`EvoError::Persistence`] when the graph store cannot answer.
    pub async fn best_solutions(&self, query: &BestQuery) -> Result<Vec<GraphNode>> {
        Ok(self.lineage.best_solutions(query).await?)
    }

    /// # Errors
    ///
    /// [`EvoError::Persistence`] when the graph store cannot answer.
    pub async fn cohort_stats(&self, pool: &str, domain: Option<&str>) -> Result<CohortStats> {
        Ok(self.lineage.cohort_stats(pool, domain).await?)
    }

    /// Write every record to a versioned JSON-lines snapshot
    ///
    /// # Errors
    ///
    /// [`EvoError::Schema`] on I/O or encoding failure.
    pub fn export_records(&self, path: &Path) -> Result<usize> {
        let records = self.list(ListFilter::default());
        Ok(evo_core::schema::save_snapshot(path, records.iter())?)
    }

    /// Load records from a snapshot, skipping ids already known.
    ///
    /// There is no live process behind an imported record, so anything that
    /// was still in flight comes back `terminated`.
    ///
    /// # Errors
    ///
    /// [`EvoError::Schema`] for unreadable files or unsupported versions.
    pub fn import_records(&self, path: &Path) -> Result<usize> {
        let loaded = evo_core::schema::load_snapshot(path)?;
        let mut records = self.records.write();
        let mut imported = 0;
        for mut record in loaded {
            if records.contains_key(&record.id) {
                continue;
            }
            if !record.is_terminal() {
                record.terminate("restored from snapshot without a live run")?;
            }
            records.insert(record.id, record);
            imported += 1;
        }
        tracing::info!(path = %path.display(), imported, "records imported");
        Ok(imported)
    }

    /// Stop accepting work, terminate every unfinished agent and wait for
    /// the workers to exit.
    pub async fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        tracing::info!("orchestrator shutting down");
        self.queue.close();
        self.resources.close();

        let unfinished: Vec<AgentId> = self
            .records
            .read()
            .values()
            .filter(|r| !r.is_terminal())
            .map(|r| r.id)
            .collect();
        for id in unfinished {
            if let Err(e) = self.terminate(id).await {
                tracing::warn!(agent_id = %id, error = %e, "terminate during shutdown failed");
            }
        }

        let workers = self.workers.lock().take();
        if let Some(workers) = workers {
            workers.join().await;
        }
        tracing::info!("orchestrator stopped");
    }

    pub(crate) fn notify_finished(&self) {
        self.finished.send_modify(|n| *n += 1);
    }

    /// Upsert the agent node; a failure is logged and counted, never fatal.
    pub(crate) async fn persist_agent(&self, record: &AgentRecord) {
        if let Err(e) = self.lineage.record_agent(record).await {
            metrics::counter!(LINEAGE_FAILURE_COUNTER).increment(1);
            tracing::warn!(agent_id = %record.id, error = %e, "lineage write failed");
        }
    }
}

fn tail_lines(text: &str, tail: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(tail)..].join("\n")
}
