//! Evo Core - agent records and shared vocabulary
//!
//! Types every other evo crate builds on:
//! - Agent identity, lifecycle state machine and the [`AgentRecord`]
//! - Tagged configuration trees ([`ConfigTree`])
//! - The agent result contract ([`AgentOutput`])
//! - Error taxonomy and orchestrator settings
//! - Versioned record snapshots
//!
//! # Example
//!
//! ```rust,ignore
//! use evo_core::{ConfigTree, NumericParam, SubmitRequest};
//!
//! let config = ConfigTree::new()
//!     .with_numeric("lr", NumericParam::new(3e-4).with_range(1e-5, 1e-2));
//! let request = SubmitRequest::new("nanogpt", config).with_domain("code");
//! request.validate(&Default::default())?;
//! let record = request.into_record();
//! assert_eq!(record.generation, 0);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod output;
pub mod record;
pub mod schema;
pub mod settings;
pub mod state_machine;
pub mod submission;
pub mod types;

pub use config::{CategoricalParam, ConfigTree, ConfigValue, NumericParam};
pub use error::{
    ConfigError, EvoError, ExecutionFailure, PersistenceError, ResourceExhausted, Result,
    SettingsError, StateMachineError,
};
pub use output::AgentOutput;
pub use record::{AgentRecord, MAX_PARENTS};
pub use schema::{RecordEnvelope, SchemaError, RECORD_SCHEMA_VERSION};
pub use settings::{
    BackendSettings, EvolutionSettings, FitnessSettings, FitnessWeights, KindTemplate,
    FITNESS_WEIGHTS,
    OrchestratorSettings, ParentSelection, SyntaxCheck,
};
pub use state_machine::AgentStatus;
pub use submission::SubmitRequest;
pub use types::{normalize_domain, AgentId, TaskRef, TokenId, DEFAULT_DOMAIN, DEFAULT_POOL};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with evo records
    pub use crate::{
        AgentId, AgentOutput, AgentRecord, AgentStatus, ConfigTree, ConfigValue, EvoError,
        NumericParam, OrchestratorSettings, SubmitRequest,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
