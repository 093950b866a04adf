//! Evo Evolution - breeding the next generation
//!
//! Pure reproduction logic: rank a finished cohort, keep the elites, and
//! breed offspring by crossing over and mutating elite configurations. No
//! I/O happens here; the orchestrator persists lineage and launches the
//! offspring this crate plans.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod engine;
pub mod merge;
pub mod mutate;
pub mod selection;

pub use engine::{EvolutionEngine, ReproductionPlan};
pub use merge::merge;
pub use mutate::{mutate, MutationParams};
pub use selection::{elite_count, rank, ParentPicker};
