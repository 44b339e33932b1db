//! Shared knowledge graph: nodes, edges, memories, and the subgraph store.

mod edge;
mod error;
mod memory;
mod node;
mod store;

pub use edge::{Edge, EdgeType};
pub use error::{GraphError, Result};
pub use memory::{Activation, Memory, MemoryStatus, MemoryType};
pub use node::{Node, NodeType};
pub use store::{Direction, GraphSnapshot, GraphStore, SnapshotMetadata, SnapshotStatistics};
