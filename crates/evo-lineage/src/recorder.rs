//! Writes agent lifecycle events into a [`GraphStore`].

use crate::retry::with_retry;
use crate::store::GraphStore;
use crate::types::{BestQuery, CohortStats, EdgeKind, GraphEdge, GraphNode, LineageEntry, NodeKey};
use evo_core::{AgentId, AgentOutput, AgentRecord, PersistenceError, TaskRef};
use std::sync::Arc;
use std::time::Duration;

/// High-level lineage writer used by the scheduler and evolution loop.
///
/// Every call goes through [`with_retry`], so a single transient store
/// failure is absorbed and a second one comes back as a [`PersistenceError`].
#[derive(Clone)]
pub struct LineageRecorder {
    store: Arc<dyn GraphStore>,
    backoff: Duration,
}

impl std::fmt::Debug for LineageRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineageRecorder")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl LineageRecorder {
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            backoff: Duration::from_millis(100),
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    async fn put_node(&self, node: GraphNode) -> Result<(), PersistenceError> {
        let key = node.key.to_string();
        with_retry(&format!("upsert_node {key}"), self.backoff, || {
            self.store.upsert_node(node.clone())
        })
        .await
    }

    async fn put_edge(&self, edge: GraphEdge) -> Result<(), PersistenceError> {
        let name = format!("upsert_edge {} -[{}]-> {}", edge.src, edge.kind, edge.dst);
        with_retry(&name, self.backoff, || self.store.upsert_edge(edge.clone())).await
    }

    /// Create or refresh the agent's node with its current state.
    ///
    /// # Errors
    ///
    /// [`PersistenceError`] after the retry is exhausted.
    pub async fn record_agent(&self, record: &AgentRecord) -> Result<(), PersistenceError> {
        let mut node = GraphNode::new(NodeKey::agent(record.id))
            .with("kind", record.kind.as_str())
            .with("generation", record.generation)
            .with("status", record.status().as_str())
            .with("domain", record.domain.as_str())
            .with("pool", record.pool.as_str())
            .with("created_at", record.created_at.to_rfc3339());
        if let Some(fitness) = record.fitness() {
            node = node.with("fitness", fitness);
        }
        if let Some(reason) = record.failure() {
            node = node.with("failure", reason);
        }
        self.put_node(node).await
    }

    /// Record a freshly bred agent and its `EVOLVED_FROM` edges to every parent.
    ///
    /// # Errors
    ///
    /// [`PersistenceError`] for the first write that keeps failing.
    pub async fn record_offspring(&self, child: &AgentRecord) -> Result<(), PersistenceError> {
        self.record_agent(child).await?;
        for parent in &child.parent_ids {
            let edge = GraphEdge::new(
                NodeKey::agent(child.id),
                EdgeKind::EvolvedFrom,
                NodeKey::agent(parent),
            )
            .with("generation", child.generation);
            self.put_edge(edge).await?;
        }
        Ok(())
    }

    async fn record_task(&self, task: &TaskRef) -> Result<NodeKey, PersistenceError> {
        let key = NodeKey::task(task.id.as_str());
        let node = GraphNode::new(key.clone())
            .with("task_type", task.task_type.as_str())
            .with("description", task.description.as_str())
            .with("difficulty", task.difficulty)
            .with("domain", task.domain());
        self.put_node(node).await?;
        Ok(key)
    }

    /// Record the solution a completed agent produced.
    ///
    /// Writes the `Solution` node, a `SOLVES` edge to the task (when one is
    /// known) and `PARENT_OF` edges from every parent that has a solution.
    ///
    /// # Errors
    ///
    /// [`PersistenceError`] for the first write that keeps failing.
    pub async fn record_solution(
        &self,
        record: &AgentRecord,
        output: &AgentOutput,
    ) -> Result<(), PersistenceError> {
        let task = output.task.as_ref().or(record.task.as_ref());
        let key = NodeKey::solution(record.id);
        let mut node = GraphNode::new(key.clone())
            .with("agent_id", record.id.to_string())
            .with("generation", record.generation)
            .with("pool", record.pool.as_str())
            .with("domain", record.domain.as_str())
            .with("task_type", task.map_or("", |t| t.task_type.as_str()))
            .with("code", output.code.as_str())
            .with("reasoning_steps", output.reasoning_steps.unwrap_or(0));
        if let Some(fitness) = record.fitness() {
            node = node.with("fitness", fitness);
        }
        if let Some(cost) = output.token_cost {
            node = node.with("token_cost", cost);
        }
        self.put_node(node).await?;

        if let Some(task) = task {
            let task_key = self.record_task(task).await?;
            self.put_edge(GraphEdge::new(key.clone(), EdgeKind::Solves, task_key))
                .await?;
        }

        for parent in &record.parent_ids {
            let parent_key = NodeKey::solution(parent);
            let exists = with_retry("lookup parent solution", self.backoff, || {
                self.store.node(&parent_key)
            })
            .await?
            .is_some();
            if exists {
                self.put_edge(GraphEdge::new(parent_key, EdgeKind::ParentOf, key.clone()))
                    .await?;
            }
        }
        Ok(())
    }

    /// Add a typed cross-category relation such as `INFLUENCES` or `ALIGNED_WITH`.
    ///
    /// # Errors
    ///
    /// [`PersistenceError`] when the edge cannot be written.
    pub async fn link(
        &self,
        src: NodeKey,
        kind: EdgeKind,
        dst: NodeKey,
        strength: f64,
    ) -> Result<(), PersistenceError> {
        self.put_edge(GraphEdge::new(src, kind, dst).with("strength", strength))
            .await
    }

    /// Attach a tag to any node via `TAGGED_WITH`.
    ///
    /// # Errors
    ///
    /// [`PersistenceError`] when the tag or edge cannot be written.
    pub async fn tag(&self, node: NodeKey, tag: &str) -> Result<(), PersistenceError> {
        let tag_key = NodeKey::tag(tag.trim().to_lowercase());
        self.put_node(GraphNode::new(tag_key.clone())).await?;
        self.put_edge(GraphEdge::new(node, EdgeKind::TaggedWith, tag_key))
            .await
    }

    /// Agent ancestry up to `depth` generations back
    ///
    /// # Errors
    ///
    /// [`PersistenceError`] when the store cannot answer.
    pub async fn lineage(
        &self,
        agent: AgentId,
        depth: usize,
    ) -> Result<Vec<LineageEntry>, PersistenceError> {
        let key = NodeKey::agent(agent);
        with_retry("ancestors", self.backoff, || self.store.ancestors(&key, depth)).await
    }

    /// Agent descendants up to `depth` generations forward
    ///
    /// # Errors
    ///
    /// [`PersistenceError`] when the store cannot answer.
    pub async fn descendants(
        &self,
        agent: AgentId,
        depth: usize,
    ) -> Result<Vec<LineageEntry>, PersistenceError> {
        let key = NodeKey::agent(agent);
        with_retry("descendants", self.backoff, || {
            self.store.descendants(&key, depth)
        })
        .await
    }

    /// # Errors
    ///
    /// [`PersistenceError`] when the store cannot answer.
    pub async fn best_solutions(
        &self,
        query: &BestQuery,
    ) -> Result<Vec<GraphNode>, PersistenceError> {
        with_retry("best_n", self.backoff, || self.store.best_n(query)).await
    }

    /// # Errors
    ///
    /// [`PersistenceError`] when the store cannot answer.
    pub async fn cohort_stats(
        &self,
        pool: &str,
        domain: Option<&str>,
    ) -> Result<CohortStats, PersistenceError> {
        with_retry("cohort_stats", self.backoff, || {
            self.store.cohort_stats(pool, domain)
        })
        .await
    }
}
