//! Runtime-level error type.
//!
//! The event-loop public methods on `MemorySystem` (`crate::lib`) return
//! result-like payloads for *expected* domain failures (validation,
//! dependency, IO) rather than propagating a `Result::Err` all the way to
//! the chat-layer caller; `RuntimeError` is the one type those internal
//! layers converge on before being folded into a `{success, error,
//! message}`-shaped response at the public boundary.

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Graph(#[from] engram_core::graph::GraphError),
    #[error(transparent)]
    Tool(#[from] engram_core::tools::ToolError),
    #[error(transparent)]
    Extract(#[from] engram_core::extract::ExtractError),
    #[error(transparent)]
    Vector(#[from] engram_core::vector::VectorSearchError),
    #[error(transparent)]
    Persistence(#[from] engram_core::persist::PersistenceError),
    #[error("memory not found: {0}")]
    MemoryNotFound(String),
    #[error("perceptual block not found: {0}")]
    BlockNotFound(String),
    #[error("short-term memory not found: {0}")]
    ShortTermNotFound(String),
    #[error("transfer step failed: {0}")]
    Transfer(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
