//! Evo Lineage - ancestry and solution graph
//!
//! Agents, the solutions they produce and the tasks those solve live in a
//! property graph behind the [`GraphStore`] trait. The bundled
//! [`InMemoryGraphStore`] keeps everything in a petgraph `DiGraph`;
//! [`LineageRecorder`] is the write path the orchestrator uses.
//!
//! # Example
//!
//! ```rust,ignore
//! use evo_lineage::{InMemoryGraphStore, LineageRecorder, BestQuery};
//! use std::sync::Arc;
//!
//! let recorder = LineageRecorder::new(Arc::new(InMemoryGraphStore::new()));
//! recorder.record_agent(&parent).await?;
//! recorder.record_offspring(&child).await?;
//! let ancestry = recorder.lineage(child.id, 5).await?;
//! let best = recorder.best_solutions(&BestQuery::solutions(10).in_domain("code")).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod memory;
pub mod recorder;
pub mod retry;
pub mod store;
pub mod types;

pub use error::GraphError;
pub use memory::InMemoryGraphStore;
pub use recorder::LineageRecorder;
pub use retry::with_retry;
pub use store::GraphStore;
pub use types::{
    BestQuery, CohortStats, EdgeKind, GraphEdge, GraphNode, LineageEntry, NodeKey, NodeLabel,
    Properties,
};

/// Default depth for ancestry queries
pub const DEFAULT_LINEAGE_DEPTH: usize = 5;
