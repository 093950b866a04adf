//! Evo Kernel - orchestration of evolving agent populations
//!
//! Submitted agents wait in an [`ExperimentQueue`]; a pool of `W` workers
//! runs them through an [`ExecutionBackend`], holding one
//! [`ResourcePool`] token each when resources are constrained. Finished runs
//! are scored, their lineage recorded, and once a whole generation has
//! settled the evolution engine breeds the next one.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use evo_kernel::prelude::*;
//!
//! let orchestrator = Orchestrator::builder(OrchestratorSettings::default()).build()?;
//! orchestrator.start();
//!
//! for config in seed_configs {
//!     orchestrator.submit(SubmitRequest::new("nanogpt", config)).await?;
//! }
//! let reports = orchestrator.run_generations(5).await?;
//! orchestrator.wait_for_generation().await?;
//! println!("{:?}", orchestrator.statistics());
//! orchestrator.shutdown().await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backend;
pub mod generation;
pub mod orchestrator;
pub mod queue;
pub mod resource;
pub mod telemetry;
pub mod worker;

// Test harness
pub mod test_harness;

pub use backend::{
    ExecutionBackend, ExecutionHandle, LaunchRequest, OutputBuffer, RunState, SubprocessBackend,
};
pub use generation::{Cohort, GenerationReport};
pub use orchestrator::{ListFilter, Orchestrator, OrchestratorBuilder, Statistics};
pub use queue::ExperimentQueue;
pub use resource::{ResourceLease, ResourcePool};
pub use worker::WorkerPool;

pub mod prelude {
    pub use crate::{GenerationReport, ListFilter, Orchestrator, Statistics};
    pub use evo_core::prelude::*;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
