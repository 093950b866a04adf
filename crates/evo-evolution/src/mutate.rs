//! Random perturbation of configuration trees.

use evo_core::{ConfigTree, ConfigValue, NumericParam};
use rand::seq::SliceRandom;
use rand::Rng;

/// Mutation knobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MutationParams {
    /// Per-leaf probability of a change
    pub rate: f64,
    /// Relative perturbation for numerics without a step, e.g. 0.2 = ±20%
    pub perturbation_scale: f64,
}

impl Default for MutationParams {
    fn default() -> Self {
        Self {
            rate: 0.1,
            perturbation_scale: 0.2,
        }
    }
}

/// Return a mutated copy of `config`.
///
/// Each leaf changes with probability `rate`:
/// - numeric: nudged by up to `step` (or `perturbation_scale` of its
///   magnitude), then clamped to its range; unbounded non-negative values
///   stay non-negative
/// - boolean: flipped
/// - categorical: resampled from the other choices
///
/// Nested trees are walked recursively. A rate of zero returns an equal tree.
pub fn mutate<R: Rng + ?Sized>(config: &ConfigTree, params: &MutationParams, rng: &mut R) -> ConfigTree {
    let mut out = config.clone();
    mutate_in_place(&mut out, params, rng);
    out
}

fn mutate_in_place<R: Rng + ?Sized>(tree: &mut ConfigTree, params: &MutationParams, rng: &mut R) {
    for (_, value) in tree.iter_mut() {
        if let ConfigValue::Nested(inner) = value {
            mutate_in_place(inner, params, rng);
            continue;
        }
        if rng.gen::<f64>() >= params.rate {
            continue;
        }
        match value {
            ConfigValue::Numeric(n) => n.value = perturb(n, params.perturbation_scale, rng),
            ConfigValue::Boolean(b) => *b = !*b,
            ConfigValue::Categorical(c) => {
                let others: Vec<&String> = c.choices.iter().filter(|o| **o != c.value).collect();
                if let Some(pick) = others.choose(rng) {
                    c.value = (*pick).clone();
                }
            }
            ConfigValue::Nested(_) => {}
        }
    }
}

fn perturb<R: Rng + ?Sized>(n: &NumericParam, scale: f64, rng: &mut R) -> f64 {
    let delta = match n.step {
        Some(step) => rng.gen_range(-step..=step),
        None => {
            let magnitude = if n.value.abs() > f64::EPSILON { n.value.abs() } else { 1.0 };
            magnitude * rng.gen_range(-scale..=scale)
        }
    };
    let mut candidate = n.value + delta;
    if n.min.is_none() && n.value >= 0.0 {
        candidate = candidate.max(0.0);
    }
    n.constrain(candidate)
}
