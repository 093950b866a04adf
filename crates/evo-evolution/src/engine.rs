//! Generation-to-generation reproduction.

use crate::merge::merge;
use crate::mutate::{mutate, MutationParams};
use crate::selection::{elite_count, rank, ParentPicker};
use evo_core::{AgentId, AgentRecord, EvoError, EvolutionSettings};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// What the next generation should contain
#[derive(Debug, Clone)]
pub struct ReproductionPlan {
    /// Carried over unchanged, best first
    pub elites: Vec<AgentId>,
    /// Fresh `initialized` records, ready to be launched
    pub offspring: Vec<AgentRecord>,
    pub best_fitness: Option<f64>,
}

/// Seeded evolution engine.
///
/// Holds the RNG across generations, so a run is reproducible from its seed
/// given the same cohorts.
#[derive(Debug)]
pub struct EvolutionEngine {
    settings: EvolutionSettings,
    rng: StdRng,
    picker: ParentPicker,
}

impl EvolutionEngine {
    #[must_use]
    pub fn new(settings: EvolutionSettings) -> Self {
        Self {
            rng: StdRng::seed_from_u64(settings.seed),
            picker: ParentPicker::new(settings.parent_selection),
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &EvolutionSettings {
        &self.settings
    }

    /// Plan the next generation from a finished cohort.
    ///
    /// Population size is the configured size or, if unset, the cohort size.
    /// Elites are the top `max(1, floor(size * elite_fraction))` completed
    /// agents; the rest of the population is filled with offspring of elite
    /// pairs, crossed over with `alpha` and then mutated.
    ///
    /// # Errors
    ///
    /// [`EvoError::NoViableParents`] when no agent in the cohort completed.
    pub fn plan(&mut self, cohort: &[AgentRecord]) -> Result<ReproductionPlan, EvoError> {
        let ranked = rank(cohort);
        if ranked.is_empty() {
            return Err(EvoError::NoViableParents);
        }

        let population = self.settings.population_size.unwrap_or(cohort.len());
        let elites: Vec<&AgentRecord> = ranked
            .iter()
            .take(elite_count(population, self.settings.elite_fraction))
            .copied()
            .collect();
        let offspring_count = population.saturating_sub(elites.len());

        let params = MutationParams {
            rate: self.settings.mutation_rate,
            perturbation_scale: self.settings.perturbation_scale,
        };
        let mut offspring = Vec::with_capacity(offspring_count);
        for _ in 0..offspring_count {
            let (i, j) = self.picker.next_pair(elites.len(), &mut self.rng);
            let (a, b) = (elites[i], elites[j]);
            let crossed = merge(&a.config, &b.config, self.settings.alpha);
            let config = mutate(&crossed, &params, &mut self.rng);
            let child = AgentRecord::offspring(config, &[a, b]);
            tracing::debug!(child = %child.id, parent_a = %a.id, parent_b = %b.id,
                generation = child.generation, "offspring planned");
            offspring.push(child);
        }

        Ok(ReproductionPlan {
            elites: elites.iter().map(|r| r.id).collect(),
            offspring,
            best_fitness: ranked[0].fitness(),
        })
    }
}
