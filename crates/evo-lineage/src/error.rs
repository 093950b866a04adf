use crate::types::{EdgeKind, NodeKey};

/// Graph store failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeKey),

    #[error("self-loop rejected on {0}")]
    SelfLoop(NodeKey),

    #[error("{kind} edge {src} -> {dst} would create a lineage cycle")]
    CycleDetected {
        src: NodeKey,
        dst: NodeKey,
        kind: EdgeKind,
    },

    #[error("{kind} edge {src} -> {dst} does not go from an older to a newer generation")]
    GenerationOrder {
        src: NodeKey,
        dst: NodeKey,
        kind: EdgeKind,
    },

    #[error("graph store unavailable: {0}")]
    Unavailable(String),
}

impl GraphError {
    /// Only transport-level failures are worth retrying
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, GraphError::Unavailable(_))
    }
}
