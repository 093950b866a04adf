//! Generation barrier and the evolution step
//!
//! Every submitted or bred agent belongs to the current cohort. The next
//! generation is planned only once every cohort member is terminal; the
//! elites plus the freshly enqueued offspring then form the new cohort.

use crate::orchestrator::Orchestrator;
use evo_core::{AgentId, AgentRecord, EvoError, PersistenceError, Result};
use serde::Serialize;

/// Gauge holding the current cohort's index
pub const GENERATION_GAUGE: &str = "evo_generation";
/// Gauge holding the best fitness seen by the last evolution step
pub const BEST_FITNESS_GAUGE: &str = "evo_best_fitness";

/// Members of the generation currently behind the barrier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cohort {
    pub generation: u32,
    pub members: Vec<AgentId>,
}

/// Outcome of one evolution step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationReport {
    /// Index of the cohort this step created
    pub generation: u32,
    pub elites: Vec<AgentId>,
    pub offspring: Vec<AgentId>,
    pub best_fitness: Option<f64>,
    /// Offspring whose ancestry could not be written; they were still enqueued
    pub lineage_failures: Vec<(AgentId, String)>,
}

impl Orchestrator {
    /// Snapshot of the current cohort
    #[must_use]
    pub fn cohort(&self) -> Cohort {
        self.cohort.lock().clone()
    }

    /// Cohort members not yet in a terminal status
    #[must_use]
    pub fn barrier_pending(&self) -> usize {
        let members = self.cohort.lock().members.clone();
        let records = self.records.read();
        members
            .iter()
            .filter(|id| records.get(id).is_some_and(|r| !r.is_terminal()))
            .count()
    }

    /// Wait until every member of the current cohort is terminal.
    ///
    /// # Errors
    ///
    /// [`EvoError::ShutDown`] if the orchestrator shuts down first.
    pub async fn wait_for_generation(&self) -> Result<()> {
        let mut finished = self.finished.subscribe();
        loop {
            if self.barrier_pending() == 0 {
                return Ok(());
            }
            if self.is_shut_down() {
                return Err(EvoError::ShutDown);
            }
            finished.changed().await.map_err(|_| EvoError::ShutDown)?;
        }
    }

    /// Plan and launch the next generation.
    ///
    /// Offspring are inserted, their `EVOLVED_FROM` edges written, and only
    /// then queued. A lineage write that keeps failing is reported in
    /// [`GenerationReport::lineage_failures`]; the offspring runs anyway.
    ///
    /// # Errors
    ///
    /// [`EvoError::BarrierNotReached`] while cohort members are still
    /// active, [`EvoError::NoViableParents`] when none of them completed.
    pub async fn evolve_step(&self) -> Result<GenerationReport> {
        if self.is_shut_down() {
            return Err(EvoError::ShutDown);
        }
        let _guard = self.evolve_lock.lock().await;

        let cohort = self.cohort();
        let members: Vec<AgentRecord> = {
            let records = self.records.read();
            cohort
                .members
                .iter()
                .filter_map(|id| records.get(id).cloned())
                .collect()
        };
        let pending = members.iter().filter(|r| !r.is_terminal()).count();
        if pending > 0 {
            return Err(EvoError::BarrierNotReached { pending });
        }

        let plan = self.engine.lock().plan(&members)?;
        let next_generation = cohort.generation + 1;
        let mut offspring = Vec::with_capacity(plan.offspring.len());
        let mut lineage_failures = Vec::new();
        for child in plan.offspring {
            let id = child.id;
            self.records.write().insert(id, child.clone());
            if let Err(e) = self.record_offspring_lineage(&child).await {
                lineage_failures.push((id, e.to_string()));
            }
            self.enqueue(id)?;
            offspring.push(id);
        }

        {
            let mut current = self.cohort.lock();
            current.generation = next_generation;
            current.members = plan.elites.iter().chain(offspring.iter()).copied().collect();
        }
        metrics::gauge!(GENERATION_GAUGE).set(f64::from(next_generation));
        if let Some(best) = plan.best_fitness {
            metrics::gauge!(BEST_FITNESS_GAUGE).set(best);
        }
        tracing::info!(generation = next_generation, elites = plan.elites.len(),
            offspring = offspring.len(), best_fitness = ?plan.best_fitness,
            lineage_failures = lineage_failures.len(), "generation evolved");

        Ok(GenerationReport {
            generation: next_generation,
            elites: plan.elites,
            offspring,
            best_fitness: plan.best_fitness,
            lineage_failures,
        })
    }

    async fn record_offspring_lineage(
        &self,
        child: &AgentRecord,
    ) -> std::result::Result<(), PersistenceError> {
        self.lineage.record_offspring(child).await.map_err(|e| {
            metrics::counter!(crate::orchestrator::LINEAGE_FAILURE_COUNTER).increment(1);
            tracing::warn!(agent_id = %child.id, error = %e, "offspring lineage write failed");
            e
        })
    }

    /// Barrier, then evolve, `n` times.
    ///
    /// The last generation is launched but not awaited; call
    /// [`Orchestrator::wait_for_generation`] to let it finish.
    ///
    /// # Errors
    ///
    /// The first error from [`Orchestrator::wait_for_generation`] or
    /// [`Orchestrator::evolve_step`].
    pub async fn run_generations(&self, n: usize) -> Result<Vec<GenerationReport>> {
        let mut reports = Vec::with_capacity(n);
        for _ in 0..n {
            self.wait_for_generation().await?;
            reports.push(self.evolve_step().await?);
        }
        Ok(reports)
    }
}
