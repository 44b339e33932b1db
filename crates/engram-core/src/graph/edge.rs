//! Directed, typed edges between knowledge nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The relationship class an edge plays in a memory's canonical subgraph,
/// or in an auto-linked cross-memory relation.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    #[default]
    MemoryType,
    CoreRelation,
    Attribute,
    Causality,
    Reference,
    Relation,
    Temporal,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::MemoryType => "memory_type",
            EdgeType::CoreRelation => "core_relation",
            EdgeType::Attribute => "attribute",
            EdgeType::Causality => "causality",
            EdgeType::Reference => "reference",
            EdgeType::Relation => "relation",
            EdgeType::Temporal => "temporal",
        }
    }

    /// Edge-type weight used by path-score expansion's per-hop ranking.
    /// Unlisted edge types, including `MemoryType`/`Causality`, default to
    /// `1.0`.
    pub fn expansion_weight(&self) -> f32 {
        match self {
            EdgeType::Reference => 1.3,
            EdgeType::Attribute => 1.2,
            EdgeType::Relation => 0.9,
            EdgeType::Temporal => 0.7,
            EdgeType::MemoryType | EdgeType::CoreRelation | EdgeType::Causality => 1.0,
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed edge in the knowledge graph.
///
/// Self-loops are forbidden during `merge_nodes`. Multi-edges between the
/// same endpoints are allowed only with distinct `edge_type`s.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation: String,
    pub edge_type: EdgeType,
    pub importance: f32,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation: impl Into<String>,
        edge_type: EdgeType,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation: relation.into(),
            edge_type,
            importance: 1.0,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn is_self_loop(&self) -> bool {
        self.source_id == self.target_id
    }

    /// Combined ranking weight for path-score expansion's neighbor ordering:
    /// `edge_importance * edge_type_weight`.
    pub fn ranking_weight(&self) -> f32 {
        self.importance.clamp(0.0, 1.0) * self.edge_type.expansion_weight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_weights_match_documented_table() {
        assert_eq!(EdgeType::Reference.expansion_weight(), 1.3);
        assert_eq!(EdgeType::Attribute.expansion_weight(), 1.2);
        assert_eq!(EdgeType::Relation.expansion_weight(), 0.9);
        assert_eq!(EdgeType::Temporal.expansion_weight(), 0.7);
        assert_eq!(EdgeType::CoreRelation.expansion_weight(), 1.0);
    }

    #[test]
    fn self_loop_detection() {
        let e = Edge::new("a", "a", "likes", EdgeType::Relation);
        assert!(e.is_self_loop());
    }
}
