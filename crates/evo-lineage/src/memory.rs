use crate::error::GraphError;
use crate::store::GraphStore;
use crate::types::{
    BestQuery, CohortStats, EdgeKind, GraphEdge, GraphNode, LineageEntry, NodeKey, NodeLabel,
    Properties,
};
use parking_lot::RwLock;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone)]
struct EdgeEntry {
    kind: EdgeKind,
    properties: Properties,
}

#[derive(Debug, Clone, Copy)]
enum Toward {
    Parents,
    Children,
}

#[derive(Debug, Default)]
struct Inner {
    graph: DiGraph<GraphNode, EdgeEntry>,
    index: HashMap<NodeKey, NodeIndex>,
}

impl Inner {
    fn lookup(&self, key: &NodeKey) -> Result<NodeIndex, GraphError> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| GraphError::NodeNotFound(key.clone()))
    }

    fn lineage_neighbors(&self, idx: NodeIndex, toward: Toward) -> Vec<NodeIndex> {
        // PARENT_OF points parent -> child, EVOLVED_FROM child -> parent.
        let (out_kind, in_kind) = match toward {
            Toward::Parents => (EdgeKind::EvolvedFrom, EdgeKind::ParentOf),
            Toward::Children => (EdgeKind::ParentOf, EdgeKind::EvolvedFrom),
        };
        let outgoing = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| e.weight().kind == out_kind)
            .map(|e| e.target());
        let incoming = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|e| e.weight().kind == in_kind)
            .map(|e| e.source());
        outgoing.chain(incoming).collect()
    }

    /// Breadth-first lineage walk; each node is reported once at its
    /// shortest distance.
    fn walk(&self, start: NodeIndex, toward: Toward, max_depth: usize) -> Vec<(NodeIndex, usize)> {
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([(start, 0usize)]);
        let mut found = Vec::new();
        while let Some((idx, depth)) = queue.pop_front() {
            if depth == max_depth {
                continue;
            }
            for next in self.lineage_neighbors(idx, toward) {
                if seen.insert(next) {
                    found.push((next, depth + 1));
                    queue.push_back((next, depth + 1));
                }
            }
        }
        found
    }

    fn reaches(&self, from: NodeIndex, to: NodeIndex, toward: Toward) -> bool {
        self.walk(from, toward, usize::MAX)
            .iter()
            .any(|(idx, _)| *idx == to)
    }

    fn check_lineage(&self, edge: &GraphEdge, src: NodeIndex, dst: NodeIndex) -> Result<(), GraphError> {
        let (parent, child) = match edge.kind {
            EdgeKind::ParentOf => (src, dst),
            EdgeKind::EvolvedFrom => (dst, src),
            _ => return Ok(()),
        };
        if let (Some(pg), Some(cg)) = (
            self.graph[parent].generation(),
            self.graph[child].generation(),
        ) {
            if pg >= cg {
                return Err(GraphError::GenerationOrder {
                    src: edge.src.clone(),
                    dst: edge.dst.clone(),
                    kind: edge.kind,
                });
            }
        }
        if self.reaches(child, parent, Toward::Children) {
            return Err(GraphError::CycleDetected {
                src: edge.src.clone(),
                dst: edge.dst.clone(),
                kind: edge.kind,
            });
        }
        Ok(())
    }

    fn entries(&self, found: Vec<(NodeIndex, usize)>) -> Vec<LineageEntry> {
        found
            .into_iter()
            .map(|(idx, depth)| LineageEntry {
                node: self.graph[idx].clone(),
                depth,
            })
            .collect()
    }
}

/// Process-local graph store backed by petgraph.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    inner: RwLock<Inner>,
}

impl InMemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().graph.edge_count()
    }

    /// Whether the lineage subgraph, oriented parent to child, is free of cycles
    pub fn lineage_is_acyclic(&self) -> bool {
        let inner = self.inner.read();
        let mut lineage: DiGraph<(), ()> = DiGraph::with_capacity(inner.graph.node_count(), 0);
        for _ in inner.graph.node_indices() {
            lineage.add_node(());
        }
        for e in inner.graph.edge_references() {
            match e.weight().kind {
                EdgeKind::ParentOf => {
                    lineage.add_edge(e.source(), e.target(), ());
                }
                EdgeKind::EvolvedFrom => {
                    lineage.add_edge(e.target(), e.source(), ());
                }
                _ => {}
            }
        }
        !petgraph::algo::is_cyclic_directed(&lineage)
    }
}

#[async_trait::async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_node(&self, node: GraphNode) -> Result<(), GraphError> {
        let mut inner = self.inner.write();
        let existing = inner.index.get(&node.key).copied();
        if let Some(idx) = existing {
            inner.graph[idx].properties.extend(node.properties);
        } else {
            let key = node.key.clone();
            let idx = inner.graph.add_node(node);
            inner.index.insert(key, idx);
        }
        Ok(())
    }

    async fn upsert_edge(&self, edge: GraphEdge) -> Result<(), GraphError> {
        if edge.src == edge.dst {
            return Err(GraphError::SelfLoop(edge.src));
        }
        let mut inner = self.inner.write();
        let src = inner.lookup(&edge.src)?;
        let dst = inner.lookup(&edge.dst)?;

        let existing = inner
            .graph
            .edges_connecting(src, dst)
            .find(|e| e.weight().kind == edge.kind)
            .map(|e| e.id());
        if let Some(id) = existing {
            inner.graph[id].properties.extend(edge.properties);
            return Ok(());
        }

        if edge.kind.is_lineage() {
            inner.check_lineage(&edge, src, dst)?;
        }
        inner.graph.add_edge(
            src,
            dst,
            EdgeEntry {
                kind: edge.kind,
                properties: edge.properties,
            },
        );
        Ok(())
    }

    async fn node(&self, key: &NodeKey) -> Result<Option<GraphNode>, GraphError> {
        let inner = self.inner.read();
        Ok(inner.index.get(key).map(|&idx| inner.graph[idx].clone()))
    }

    async fn edges_of(&self, key: &NodeKey) -> Result<Vec<GraphEdge>, GraphError> {
        let inner = self.inner.read();
        let idx = inner.lookup(key)?;
        let to_edge = |e: petgraph::graph::EdgeReference<'_, EdgeEntry>| GraphEdge {
            src: inner.graph[e.source()].key.clone(),
            dst: inner.graph[e.target()].key.clone(),
            kind: e.weight().kind,
            properties: e.weight().properties.clone(),
        };
        Ok(inner
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .chain(inner.graph.edges_directed(idx, Direction::Incoming))
            .map(to_edge)
            .collect())
    }

    async fn best_n(&self, query: &BestQuery) -> Result<Vec<GraphNode>, GraphError> {
        let inner = self.inner.read();
        let mut matches: Vec<GraphNode> = inner
            .graph
            .node_weights()
            .filter(|n| query.matches(n))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            b.fitness()
                .partial_cmp(&a.fitness())
                .unwrap_or(Ordering::Equal)
        });
        matches.truncate(query.limit);
        Ok(matches)
    }

    async fn ancestors(
        &self,
        key: &NodeKey,
        max_depth: usize,
    ) -> Result<Vec<LineageEntry>, GraphError> {
        let inner = self.inner.read();
        let idx = inner.lookup(key)?;
        Ok(inner.entries(inner.walk(idx, Toward::Parents, max_depth)))
    }

    async fn descendants(
        &self,
        key: &NodeKey,
        max_depth: usize,
    ) -> Result<Vec<LineageEntry>, GraphError> {
        let inner = self.inner.read();
        let idx = inner.lookup(key)?;
        Ok(inner.entries(inner.walk(idx, Toward::Children, max_depth)))
    }

    async fn cohort_stats(
        &self,
        pool: &str,
        domain: Option<&str>,
    ) -> Result<CohortStats, GraphError> {
        let inner = self.inner.read();
        let members: Vec<&GraphNode> = inner
            .graph
            .node_weights()
            .filter(|n| n.key.label == NodeLabel::Solution)
            .filter(|n| n.str_prop("pool") == Some(pool))
            .filter(|n| domain.map_or(true, |d| n.str_prop("domain") == Some(d)))
            .collect();

        let fitness: Vec<f64> = members.iter().filter_map(|n| n.fitness()).collect();
        let costs: Vec<f64> = members
            .iter()
            .filter_map(|n| n.f64_prop("token_cost"))
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let mean = |xs: &[f64]| (!xs.is_empty()).then(|| xs.iter().sum::<f64>() / xs.len() as f64);

        Ok(CohortStats {
            pool: pool.to_string(),
            domain: domain.map(str::to_string),
            count: members.len(),
            avg_fitness: mean(&fitness),
            max_fitness: fitness.iter().copied().reduce(f64::max),
            min_fitness: fitness.iter().copied().reduce(f64::min),
            avg_token_cost: mean(&costs),
            max_generation: members.iter().filter_map(|n| n.generation()).max(),
        })
    }
}
