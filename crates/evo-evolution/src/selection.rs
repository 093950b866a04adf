//! Ranking, elitism and parent pairing.

use evo_core::{AgentRecord, AgentStatus, ParentSelection};
use rand::Rng;
use std::cmp::Ordering;

/// Completed agents with a fitness, best first.
///
/// The sort is stable, so ties keep their cohort order.
#[must_use]
pub fn rank(cohort: &[AgentRecord]) -> Vec<&AgentRecord> {
    let mut ranked: Vec<&AgentRecord> = cohort
        .iter()
        .filter(|r| r.status() == AgentStatus::Completed && r.fitness().is_some())
        .collect();
    ranked.sort_by(|a, b| {
        b.fitness()
            .partial_cmp(&a.fitness())
            .unwrap_or(Ordering::Equal)
    });
    ranked
}

/// `max(1, floor(population * fraction))`
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn elite_count(population: usize, fraction: f64) -> usize {
    ((population as f64 * fraction).floor() as usize).max(1)
}

/// Draws parent index pairs from a ranked elite list
#[derive(Debug, Clone)]
pub struct ParentPicker {
    mode: ParentSelection,
    cursor: usize,
}

impl ParentPicker {
    #[must_use]
    pub fn new(mode: ParentSelection) -> Self {
        Self { mode, cursor: 0 }
    }

    /// Next pair of indices into a pool of `pool_len` elites.
    ///
    /// With a single elite both indices are 0. Otherwise the pair is
    /// always two distinct elites.
    pub fn next_pair<R: Rng + ?Sized>(&mut self, pool_len: usize, rng: &mut R) -> (usize, usize) {
        if pool_len <= 1 {
            return (0, 0);
        }
        match self.mode {
            ParentSelection::Cycle => {
                let first = self.cursor % pool_len;
                self.cursor += 1;
                (first, (first + 1) % pool_len)
            }
            ParentSelection::Random => {
                let first = rng.gen_range(0..pool_len);
                // Shift past `first` so the second draw is uniform over the rest.
                let mut second = rng.gen_range(0..pool_len - 1);
                if second >= first {
                    second += 1;
                }
                (first, second)
            }
        }
    }
}
