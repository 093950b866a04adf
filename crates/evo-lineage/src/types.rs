//! Node, edge and query types of the lineage graph.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Arbitrary node or edge attributes
pub type Properties = Map<String, Value>;

/// Category of a graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeLabel {
    Agent,
    Solution,
    Task,
    Tag,
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeLabel::Agent => "Agent",
            NodeLabel::Solution => "Solution",
            NodeLabel::Task => "Task",
            NodeLabel::Tag => "Tag",
        })
    }
}

/// Unique address of a node: label plus id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub label: NodeLabel,
    pub id: String,
}

impl NodeKey {
    #[must_use]
    pub fn new(label: NodeLabel, id: impl Into<String>) -> Self {
        Self {
            label,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn agent(id: impl fmt::Display) -> Self {
        Self::new(NodeLabel::Agent, id.to_string())
    }

    #[must_use]
    pub fn solution(id: impl fmt::Display) -> Self {
        Self::new(NodeLabel::Solution, id.to_string())
    }

    #[must_use]
    pub fn task(id: impl Into<String>) -> Self {
        Self::new(NodeLabel::Task, id)
    }

    #[must_use]
    pub fn tag(name: impl Into<String>) -> Self {
        Self::new(NodeLabel::Tag, name)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.id)
    }
}

/// Relationship types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// parent -> child
    ParentOf,
    /// child -> parent
    EvolvedFrom,
    /// solution -> task
    Solves,
    Influences,
    AlignedWith,
    TaggedWith,
}

impl EdgeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::ParentOf => "PARENT_OF",
            EdgeKind::EvolvedFrom => "EVOLVED_FROM",
            EdgeKind::Solves => "SOLVES",
            EdgeKind::Influences => "INFLUENCES",
            EdgeKind::AlignedWith => "ALIGNED_WITH",
            EdgeKind::TaggedWith => "TAGGED_WITH",
        }
    }

    /// Lineage edges form the acyclic, generation-ordered subgraph
    #[inline]
    #[must_use]
    pub fn is_lineage(self) -> bool {
        matches!(self, EdgeKind::ParentOf | EdgeKind::EvolvedFrom)
    }

    /// Orient a lineage edge as `(parent, child)`
    #[must_use]
    pub fn parent_child<'a>(self, src: &'a NodeKey, dst: &'a NodeKey) -> Option<(&'a NodeKey, &'a NodeKey)> {
        match self {
            EdgeKind::ParentOf => Some((src, dst)),
            EdgeKind::EvolvedFrom => Some((dst, src)),
            _ => None,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node with its properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: NodeKey,
    pub properties: Properties,
}

impl GraphNode {
    #[must_use]
    pub fn new(key: NodeKey) -> Self {
        Self {
            key,
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn f64_prop(&self, name: &str) -> Option<f64> {
        self.properties.get(name).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn str_prop(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn generation(&self) -> Option<u64> {
        self.properties.get("generation").and_then(Value::as_u64)
    }

    #[must_use]
    pub fn fitness(&self) -> Option<f64> {
        self.f64_prop("fitness")
    }
}

/// A directed, typed relationship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub src: NodeKey,
    pub dst: NodeKey,
    pub kind: EdgeKind,
    pub properties: Properties,
}

impl GraphEdge {
    #[must_use]
    pub fn new(src: NodeKey, kind: EdgeKind, dst: NodeKey) -> Self {
        Self {
            src,
            dst,
            kind,
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }
}

/// Filter for best-N queries
#[derive(Debug, Clone, PartialEq)]
pub struct BestQuery {
    pub label: NodeLabel,
    pub domain: Option<String>,
    pub task_type: Option<String>,
    pub pool: Option<String>,
    pub limit: usize,
}

impl Default for BestQuery {
    fn default() -> Self {
        Self {
            label: NodeLabel::Solution,
            domain: None,
            task_type: None,
            pool: None,
            limit: 10,
        }
    }
}

impl BestQuery {
    #[must_use]
    pub fn solutions(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn of_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    #[must_use]
    pub fn in_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub(crate) fn matches(&self, node: &GraphNode) -> bool {
        let prop_matches = |name: &str, want: &Option<String>| {
            want.as_deref()
                .map_or(true, |w| node.str_prop(name) == Some(w))
        };
        node.key.label == self.label
            && node.fitness().is_some()
            && prop_matches("domain", &self.domain)
            && prop_matches("task_type", &self.task_type)
            && prop_matches("pool", &self.pool)
    }
}

/// A related node and its distance from the query node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEntry {
    pub node: GraphNode,
    pub depth: usize,
}

/// Aggregate statistics over one pool's solutions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortStats {
    pub pool: String,
    pub domain: Option<String>,
    pub count: usize,
    pub avg_fitness: Option<f64>,
    pub max_fitness: Option<f64>,
    pub min_fitness: Option<f64>,
    pub avg_token_cost: Option<f64>,
    pub max_generation: Option<u64>,
}
