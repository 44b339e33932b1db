//! `engram-core`: the synchronous, `Send + Sync` graph/vector/persistence
//! engine underlying the three-tier memory system — a pure library with no
//! event loop of its own, wrapped by `engram-runtime`'s async managers.

pub mod builder;
pub mod config;
pub mod embed;
pub mod extract;
pub mod graph;
pub mod path_expansion;
pub mod persist;
pub mod tools;
pub mod vector;

pub use builder::Builder;
pub use config::EngramConfig;
pub use embed::{EmbeddingClient, Embedder, TextCompleter};
pub use extract::{CreateMemoryParams, ExtractedMemory, Extractor};
pub use graph::{Edge, EdgeType, GraphStore, Memory, MemoryType, Node, NodeType};
pub use path_expansion::{expand_with_path_scoring, ExpansionResult, PathContribution};
pub use persist::Store as PersistenceStore;
pub use tools::{MemoryTools, ScoredMemory, SearchMemoriesParams};
pub use vector::{FusionMethod, VectorIndex, VectorIndexConfig};

#[cfg(any(test, feature = "test-support"))]
pub use embed::testing;
