//! Graph store interface.

use crate::error::GraphError;
use crate::types::{BestQuery, CohortStats, GraphEdge, GraphNode, LineageEntry, NodeKey};

/// A property graph holding agents, solutions, tasks and their relations.
///
/// Writes are upserts: repeating a node or edge write with the same key
/// updates properties in place and never duplicates. Lineage edges
/// (`PARENT_OF`, `EVOLVED_FROM`) must point from an older to a newer
/// generation and may not close a cycle.
#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert a node or merge its properties into the existing one.
    async fn upsert_node(&self, node: GraphNode) -> Result<(), GraphError>;

    /// Insert an edge or merge its properties into the existing edge of the
    /// same kind between the same endpoints.
    async fn upsert_edge(&self, edge: GraphEdge) -> Result<(), GraphError>;

    async fn node(&self, key: &NodeKey) -> Result<Option<GraphNode>, GraphError>;

    /// Every edge touching `key`, in either direction
    async fn edges_of(&self, key: &NodeKey) -> Result<Vec<GraphEdge>, GraphError>;

    /// Highest-fitness nodes matching the query, best first
    async fn best_n(&self, query: &BestQuery) -> Result<Vec<GraphNode>, GraphError>;

    /// Lineage ancestors up to `max_depth` hops, nearest first
    async fn ancestors(
        &self,
        key: &NodeKey,
        max_depth: usize,
    ) -> Result<Vec<LineageEntry>, GraphError>;

    /// Lineage descendants up to `max_depth` hops, nearest first
    async fn descendants(
        &self,
        key: &NodeKey,
        max_depth: usize,
    ) -> Result<Vec<LineageEntry>, GraphError>;

    /// Aggregates over the solutions of one pool, optionally one domain
    async fn cohort_stats(&self, pool: &str, domain: Option<&str>)
        -> Result<CohortStats, GraphError>;
}
