use evo_core::{
    AgentOutput, AgentRecord, ConfigTree, PersistenceError, TaskRef,
};
use evo_lineage::{
    BestQuery, CohortStats, EdgeKind, GraphEdge, GraphError, GraphNode, GraphStore,
    InMemoryGraphStore, LineageEntry, LineageRecorder, NodeKey,
};
use proptest::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fails the first `failures` writes, then delegates.
struct FlakyStore {
    inner: InMemoryGraphStore,
    failures: AtomicU32,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryGraphStore::new(),
            failures: AtomicU32::new(failures),
        }
    }

    fn trip(&self) -> Result<(), GraphError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(GraphError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl GraphStore for FlakyStore {
    async fn upsert_node(&self, node: GraphNode) -> Result<(), GraphError> {
        self.trip()?;
        self.inner.upsert_node(node).await
    }
    async fn upsert_edge(&self, edge: GraphEdge) -> Result<(), GraphError> {
        self.trip()?;
        self.inner.upsert_edge(edge).await
    }
    async fn node(&self, key: &NodeKey) -> Result<Option<GraphNode>, GraphError> {
        self.inner.node(key).await
    }
    async fn edges_of(&self, key: &NodeKey) -> Result<Vec<GraphEdge>, GraphError> {
        self.inner.edges_of(key).await
    }
    async fn best_n(&self, query: &BestQuery) -> Result<Vec<GraphNode>, GraphError> {
        self.inner.best_n(query).await
    }
    async fn ancestors(&self, key: &NodeKey, depth: usize) -> Result<Vec<LineageEntry>, GraphError> {
        self.inner.ancestors(key, depth).await
    }
    async fn descendants(&self, key: &NodeKey, depth: usize) -> Result<Vec<LineageEntry>, GraphError> {
        self.inner.descendants(key, depth).await
    }
    async fn cohort_stats(&self, pool: &str, domain: Option<&str>) -> Result<CohortStats, GraphError> {
        self.inner.cohort_stats(pool, domain).await
    }
}

fn completed(parents: &[&AgentRecord], fitness: f64) -> AgentRecord {
    let mut record = if parents.is_empty() {
        AgentRecord::new("coder", ConfigTree::new()).with_task(Some(TaskRef::new("t-1", "sorting")))
    } else {
        AgentRecord::offspring(ConfigTree::new(), parents)
    };
    record.mark_queued().unwrap();
    record.mark_running(None).unwrap();
    record.complete(fitness, vec![]).unwrap();
    record
}

#[tokio::test]
async fn test_full_lineage_flow() {
    let store = Arc::new(InMemoryGraphStore::new());
    let recorder = LineageRecorder::new(store.clone()).with_backoff(Duration::ZERO);

    let a = completed(&[], 0.6);
    let b = completed(&[], 0.8);
    for r in [&a, &b] {
        recorder.record_agent(r).await.unwrap();
        recorder
            .record_solution(r, &AgentOutput::with_code("def f(): pass"))
            .await
            .unwrap();
    }

    let child = completed(&[&a, &b], 0.9);
    recorder.record_offspring(&child).await.unwrap();
    recorder
        .record_solution(&child, &AgentOutput::with_code("def f(): return 1"))
        .await
        .unwrap();

    let ancestry = recorder.lineage(child.id, 5).await.unwrap();
    let mut ids: Vec<_> = ancestry.iter().map(|e| e.node.key.id.clone()).collect();
    ids.sort();
    let mut expected = vec![a.id.to_string(), b.id.to_string()];
    expected.sort();
    assert_eq!(ids, expected);

    // Solution lineage mirrors agent lineage.
    let sol_edges = store.edges_of(&NodeKey::solution(child.id)).await.unwrap();
    let parent_of = sol_edges.iter().filter(|e| e.kind == EdgeKind::ParentOf).count();
    let solves = sol_edges.iter().filter(|e| e.kind == EdgeKind::Solves).count();
    assert_eq!(parent_of, 2);
    assert_eq!(solves, 1);

    let best = recorder.best_solutions(&BestQuery::solutions(1)).await.unwrap();
    assert_eq!(best[0].key, NodeKey::solution(child.id));
    assert!(store.lineage_is_acyclic());
}

#[tokio::test]
async fn test_recording_twice_does_not_duplicate() {
    let store = Arc::new(InMemoryGraphStore::new());
    let recorder = LineageRecorder::new(store.clone()).with_backoff(Duration::ZERO);
    let parent = completed(&[], 0.5);
    recorder.record_agent(&parent).await.unwrap();
    let child = AgentRecord::offspring(ConfigTree::new(), &[&parent]);

    recorder.record_offspring(&child).await.unwrap();
    let (nodes, edges) = (store.node_count(), store.edge_count());
    recorder.record_offspring(&child).await.unwrap();
    assert_eq!((store.node_count(), store.edge_count()), (nodes, edges));
}

#[tokio::test]
async fn test_single_outage_is_retried() {
    let recorder =
        LineageRecorder::new(Arc::new(FlakyStore::new(1))).with_backoff(Duration::ZERO);
    let record = completed(&[], 0.5);
    assert!(recorder.record_agent(&record).await.is_ok());
}

#[tokio::test]
async fn test_repeated_outage_surfaces() {
    let recorder =
        LineageRecorder::new(Arc::new(FlakyStore::new(2))).with_backoff(Duration::ZERO);
    let record = completed(&[], 0.5);
    let err: PersistenceError = recorder.record_agent(&record).await.unwrap_err();
    assert_eq!(err.attempts, 2);
}

#[tokio::test]
async fn test_cross_domain_links_and_tags() {
    let store = Arc::new(InMemoryGraphStore::new());
    let recorder = LineageRecorder::new(store.clone()).with_backoff(Duration::ZERO);
    let code = completed(&[], 0.7);
    let bio = completed(&[], 0.4);
    recorder.record_solution(&code, &AgentOutput::default()).await.unwrap();
    recorder.record_solution(&bio, &AgentOutput::default()).await.unwrap();

    recorder
        .link(
            NodeKey::solution(code.id),
            EdgeKind::Influences,
            NodeKey::solution(bio.id),
            0.8,
        )
        .await
        .unwrap();
    recorder.tag(NodeKey::solution(code.id), " Sorting ").await.unwrap();

    let edges = store.edges_of(&NodeKey::tag("sorting")).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].kind, EdgeKind::TaggedWith);
}

proptest! {
    #[test]
    fn prop_lineage_remains_acyclic(
        node_count in 1..15usize,
        edges in proptest::collection::vec((0..15usize, 0..15usize, any::<bool>()), 0..60)
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let store = InMemoryGraphStore::new();
            // No generation properties: only the reachability check guards cycles.
            for i in 0..node_count {
                store.upsert_node(GraphNode::new(NodeKey::agent(i))).await.unwrap();
            }
            for (from, to, evolved) in edges {
                if from < node_count && to < node_count {
                    let kind = if evolved { EdgeKind::EvolvedFrom } else { EdgeKind::ParentOf };
                    let _ = store
                        .upsert_edge(GraphEdge::new(NodeKey::agent(from), kind, NodeKey::agent(to)))
                        .await;
                }
            }
            assert!(store.lineage_is_acyclic());
        });
    }
}
