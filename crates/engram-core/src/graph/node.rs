//! Knowledge-graph node — the atomic unit shared across memories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The role a node plays within a memory's canonical subgraph.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeType {
    #[default]
    Subject,
    Topic,
    Object,
    Attribute,
    Value,
    Entity,
    Event,
    Relation,
    Reference,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Subject => "SUBJECT",
            NodeType::Topic => "TOPIC",
            NodeType::Object => "OBJECT",
            NodeType::Attribute => "ATTRIBUTE",
            NodeType::Value => "VALUE",
            NodeType::Entity => "ENTITY",
            NodeType::Event => "EVENT",
            NodeType::Relation => "RELATION",
            NodeType::Reference => "REFERENCE",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "SUBJECT" => NodeType::Subject,
            "TOPIC" => NodeType::Topic,
            "OBJECT" => NodeType::Object,
            "ATTRIBUTE" => NodeType::Attribute,
            "VALUE" => NodeType::Value,
            "ENTITY" => NodeType::Entity,
            "EVENT" => NodeType::Event,
            "RELATION" => NodeType::Relation,
            "REFERENCE" => NodeType::Reference,
            _ => NodeType::Subject,
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A node in the shared knowledge graph.
///
/// Nodes are shared across memories: ownership is tracked out-of-band in
/// `GraphStore::node_to_memories`, never inline on the node itself, so that
/// a node's identity does not change as it gains or loses owning memories.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub content: String,
    pub node_type: NodeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Flat scalar-only metadata; nested values must already be JSON strings.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    /// True iff this node's embedding is also indexed in the vector store.
    /// Invariant: `has_vector == true` iff the vector index contains `id`.
    #[serde(default)]
    pub has_vector: bool,
}

impl Node {
    pub fn new(content: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            node_type,
            embedding: None,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            has_vector: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_roundtrip() {
        for nt in [
            NodeType::Subject,
            NodeType::Topic,
            NodeType::Object,
            NodeType::Attribute,
            NodeType::Value,
            NodeType::Entity,
            NodeType::Event,
            NodeType::Relation,
            NodeType::Reference,
        ] {
            assert_eq!(NodeType::parse_name(nt.as_str()), nt);
        }
    }

    #[test]
    fn new_node_has_no_vector_until_indexed() {
        let node = Node::new("Alice", NodeType::Subject);
        assert!(!node.has_vector);
        assert!(node.embedding.is_none());
    }
}
