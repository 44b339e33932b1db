//! Error type for graph-store operations.

/// Graph-store error type.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("memory not found: {0}")]
    MemoryNotFound(String),
    #[error("edge endpoints missing: source={source_id} target={target_id}")]
    DanglingEdge { source_id: String, target_id: String },
    #[error("self-loop rejected for merge_nodes(source={0}, target={0})")]
    SelfLoopMerge(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GraphError>;
