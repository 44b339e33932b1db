//! `Memory` — a coherent subgraph owned by the long-term graph store.

use super::{Edge, Node};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What kind of memory a subgraph represents.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryType {
    #[default]
    Event,
    Fact,
    Relation,
    Opinion,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Event => "EVENT",
            MemoryType::Fact => "FACT",
            MemoryType::Relation => "RELATION",
            MemoryType::Opinion => "OPINION",
        }
    }

    /// Normalize a free-form memory-type string, including the Chinese
    /// synonyms the extractor must accept.
    pub fn normalize(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "EVENT" | "事件" => MemoryType::Event,
            "FACT" | "事实" => MemoryType::Fact,
            "RELATION" | "关系" => MemoryType::Relation,
            "OPINION" | "观点" | "意见" => MemoryType::Opinion,
            _ => MemoryType::Fact,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryStatus {
    #[default]
    Staged,
    Committed,
    Forgotten,
}

/// Activation bookkeeping, always mirrored into `Memory::metadata["activation"]`
/// on serialize so on-disk snapshots carry it even through schema drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    /// Current activation level, in `[0, 1]`.
    pub level: f32,
    pub last_access: DateTime<Utc>,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Activation {
    pub fn new(level: f32) -> Self {
        let now = Utc::now();
        Self {
            level: level.clamp(0.0, 1.0),
            last_access: now,
            access_count: 0,
            created_at: now,
        }
    }
}

/// A coherent subgraph: `SUBJECT --memory_type--> TOPIC`, optionally
/// `TOPIC --core_relation--> OBJECT`, with attributes hanging off TOPIC as
/// `TOPIC --attribute--> ATTRIBUTE --attribute--> VALUE`.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: String,
    pub subject_id: String,
    pub memory_type: MemoryType,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub importance: f32,
    pub activation: Activation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub status: MemoryStatus,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Memory {
    pub fn new(subject_id: impl Into<String>, memory_type: MemoryType, importance: f32) -> Self {
        let now = Utc::now();
        let importance = importance.clamp(0.0, 1.0);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject_id.into(),
            memory_type,
            nodes: Vec::new(),
            edges: Vec::new(),
            importance,
            activation: Activation::new(0.75),
            created_at: now,
            updated_at: now,
            last_accessed: now,
            access_count: 0,
            status: MemoryStatus::Staged,
            metadata: BTreeMap::new(),
        }
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    pub fn age_days(&self) -> f64 {
        (Utc::now() - self.created_at).num_seconds() as f64 / 86_400.0
    }

    /// `recency = 1 / (1 + age_days / 30)`, used in final retrieval scoring.
    pub fn recency_score(&self) -> f32 {
        (1.0 / (1.0 + self.age_days() / 30.0)) as f32
    }

    /// Sync `metadata["activation"]` with the live `Activation` struct so
    /// JSON snapshots always carry a coherent view.
    pub fn sync_activation_metadata(&mut self) {
        if let Ok(value) = serde_json::to_value(&self.activation) {
            self.metadata.insert("activation".to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_accepts_chinese_synonyms() {
        assert_eq!(MemoryType::normalize("事实"), MemoryType::Fact);
        assert_eq!(MemoryType::normalize("事件"), MemoryType::Event);
        assert_eq!(MemoryType::normalize("fact"), MemoryType::Fact);
    }

    #[test]
    fn new_memory_starts_staged_with_bounded_importance() {
        let m = Memory::new("subj-1", MemoryType::Fact, 1.5);
        assert_eq!(m.status, MemoryStatus::Staged);
        assert_eq!(m.importance, 1.0);
        assert!(m.activation.level > 0.0);
    }

    #[test]
    fn recency_decays_with_age() {
        let mut m = Memory::new("subj-1", MemoryType::Fact, 0.5);
        let fresh = m.recency_score();
        m.created_at = Utc::now() - chrono::Duration::days(30);
        let aged = m.recency_score();
        assert!(aged < fresh);
    }
}
