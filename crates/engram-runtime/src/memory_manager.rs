//! Owns the long-term graph + vector index pair and exposes the async
//! operations the unified coordinator and transfer pipeline drive:
//! create/link/search, activation decay, auto-forget, and consolidation.

use crate::config::{ActivationConfig, ConsolidationConfig, ForgettingConfig};
use crate::error::Result;
use engram_core::config::{BuilderConfig, PathExpansionConfig};
use engram_core::embed::{EmbeddingClient, TextCompleter};
use engram_core::graph::{EdgeType, GraphSnapshot, GraphStore, Memory, MemoryStatus, Node, NodeType};
use engram_core::tools::{MemoryTools, ScoredMemory, SearchMemoriesParams};
use engram_core::vector::{VectorIndex, VectorIndexConfig, VectorUpsert};
use engram_core::{CreateMemoryParams, Edge};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

struct Inner {
    graph: GraphStore,
    vector_index: VectorIndex,
}

pub struct MemoryManager {
    inner: Mutex<Inner>,
    embedder: EmbeddingClient,
    completer: Option<Arc<dyn TextCompleter>>,
    builder_config: BuilderConfig,
    path_expansion_config: PathExpansionConfig,
    activation: ActivationConfig,
    forgetting: ForgettingConfig,
    consolidation: ConsolidationConfig,
}

impl MemoryManager {
    pub fn new(
        embedder: EmbeddingClient,
        completer: Option<Arc<dyn TextCompleter>>,
        builder_config: BuilderConfig,
        path_expansion_config: PathExpansionConfig,
        vector_config: VectorIndexConfig,
        activation: ActivationConfig,
        forgetting: ForgettingConfig,
        consolidation: ConsolidationConfig,
    ) -> engram_core::vector::Result<Self> {
        Ok(Self {
            inner: Mutex::new(Inner {
                graph: GraphStore::new(),
                vector_index: VectorIndex::new(vector_config)?,
            }),
            embedder,
            completer,
            builder_config,
            path_expansion_config,
            activation,
            forgetting,
            consolidation,
        })
    }

    pub async fn restore(&self, snapshot: GraphSnapshot) {
        let mut inner = self.inner.lock().await;
        inner.graph = GraphStore::restore(snapshot);
        for memory in inner.graph.memories().cloned().collect::<Vec<_>>() {
            for node in &memory.nodes {
                if let Some(embedding) = &node.embedding {
                    let _ = inner.vector_index.add(engram_core::vector::VectorUpsert {
                        id: node.id.clone(),
                        embedding: embedding.clone(),
                        metadata: Default::default(),
                        document: Some(node.content.clone()),
                    });
                }
            }
        }
    }

    pub async fn snapshot(&self) -> GraphSnapshot {
        self.inner.lock().await.graph.snapshot()
    }

    fn tools<'a>(&'a self, inner: &'a mut Inner) -> MemoryTools<'a> {
        MemoryTools::new(
            &mut inner.graph,
            &mut inner.vector_index,
            &self.embedder,
            self.completer.as_deref(),
            self.builder_config.clone(),
            self.path_expansion_config.clone(),
        )
    }

    pub async fn create_memory(&self, params: CreateMemoryParams) -> Result<Memory> {
        let mut inner = self.inner.lock().await;
        Ok(self.tools(&mut inner).create_memory(params)?)
    }

    pub async fn link_memories(
        &self,
        source_description: &str,
        target_description: &str,
        relation_type: &str,
        importance: Option<f64>,
    ) -> Result<Edge> {
        let mut inner = self.inner.lock().await;
        Ok(self
            .tools(&mut inner)
            .link_memories(source_description, target_description, relation_type, importance)?)
    }

    pub async fn search_memories(&self, params: &SearchMemoriesParams) -> Result<Vec<ScoredMemory>> {
        let mut inner = self.inner.lock().await;
        Ok(self.tools(&mut inner).search_memories(params)?)
    }

    pub async fn commit(&self, memory_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.graph.update_memory(memory_id, |m| m.status = MemoryStatus::Committed)?;
        Ok(())
    }

    pub async fn memory_count(&self) -> usize {
        self.inner.lock().await.graph.memory_count()
    }

    /// Raw graph-level operations used by the long-term transfer pipeline's
    /// LLM-decided `CREATE_NODE`/`UPDATE_NODE`/`MERGE_NODES`/`CREATE_EDGE`/
    /// `UPDATE_EDGE`/`DELETE_EDGE`/`MERGE_MEMORIES`/`UPDATE_MEMORY` ops,
    /// bypassing `MemoryTools`'s canonical-subgraph construction since these
    /// touch the graph directly rather than through the extractor/builder
    /// pipeline.
    pub async fn create_node(&self, content: &str, node_type: NodeType) -> Result<Node> {
        let mut inner = self.inner.lock().await;
        let mut node = Node::new(content, node_type);
        node.embedding = self.embedder.embed(content);
        if let Some(embedding) = node.embedding.clone() {
            let _ = inner.vector_index.add(VectorUpsert {
                id: node.id.clone(),
                embedding,
                metadata: Default::default(),
                document: Some(content.to_string()),
            });
            node.has_vector = true;
        }
        inner.graph.add_node(node.clone());
        Ok(node)
    }

    pub async fn update_node_content(&self, id: &str, content: Option<String>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.graph.update_node(id, |n| {
            if let Some(content) = content {
                n.content = content;
            }
        })?;
        Ok(())
    }

    pub async fn merge_nodes(&self, source: &str, target: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.graph.merge_nodes(source, target)?;
        Ok(())
    }

    pub async fn create_edge(
        &self,
        source_id: &str,
        target_id: &str,
        relation: &str,
        edge_type: EdgeType,
        importance: f32,
    ) -> Result<Edge> {
        let mut inner = self.inner.lock().await;
        let edge = Edge::new(source_id, target_id, relation, edge_type).with_importance(importance);
        inner.graph.add_edge(edge.clone())?;
        Ok(edge)
    }

    pub async fn update_edge_importance(&self, id: &str, importance: f32) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.graph.update_edge(id, |e| e.importance = importance.clamp(0.0, 1.0))?;
        Ok(())
    }

    pub async fn delete_edge(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.graph.remove_edge(id);
        Ok(())
    }

    pub async fn merge_memories(&self, target: &str, sources: &[String]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.graph.merge_memories(target, sources)?;
        Ok(())
    }

    pub async fn update_memory_fields(&self, id: &str, importance: Option<f64>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.graph.update_memory(id, |m| {
            if let Some(importance) = importance {
                m.importance = (importance as f32).clamp(0.0, 1.0);
            }
        })?;
        Ok(())
    }

    /// Mutates importance and/or metadata on an existing memory, writing
    /// `updated_at`.
    pub async fn update_memory(
        &self,
        id: &str,
        importance: Option<f64>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Memory> {
        let mut inner = self.inner.lock().await;
        inner.graph.update_memory(id, |m| {
            if let Some(importance) = importance {
                m.importance = (importance as f32).clamp(0.0, 1.0);
            }
            if let Some(fields) = metadata {
                for (k, v) in fields {
                    m.metadata.insert(k, v);
                }
            }
        })?;
        inner
            .graph
            .get_memory(id)
            .cloned()
            .ok_or_else(|| crate::error::RuntimeError::MemoryNotFound(id.to_string()))
    }

    /// Hard delete with orphan cleanup always on — equivalent to
    /// `forget_memory(id, true)`.
    pub async fn delete_memory(&self, id: &str) -> Result<bool> {
        self.forget_memory(id, true).await
    }

    /// Deletes the vectors of nodes this memory exclusively owns *before*
    /// removing the memory from the graph, so an observer restarting
    /// mid-call never sees a vector whose node is already gone — the reverse
    /// (a node whose vector was already dropped) is the safe direction. A
    /// no-op returning `false` if the memory is already gone.
    pub async fn forget_memory(&self, id: &str, cleanup_orphans: bool) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(memory) = inner.graph.get_memory(id).cloned() else {
            return Ok(false);
        };

        let mut exclusively_owned = Vec::new();
        for node in &memory.nodes {
            let owners = inner.graph.owners_of(&node.id);
            if owners.len() == 1 && owners.contains(id) {
                exclusively_owned.push(node.id.clone());
            }
        }
        for node_id in &exclusively_owned {
            let _ = inner.vector_index.delete(node_id);
        }

        inner.graph.remove_memory(id, cleanup_orphans)?;
        Ok(true)
    }

    /// Decays the stored activation level by time-since-last-access, adds
    /// `strength`, clamps to `[0,1]`, and bumps `last_access`/`access_count`.
    /// When the applied `strength` clears `propagation_min_strength`,
    /// recursively activates up to `max_related_memories` memories sharing a
    /// node with this one, at `strength * propagation_strength`, down to
    /// `propagation_depth` hops. `activate(id, 0)` is a no-op beyond
    /// timestamps.
    pub async fn activate(&self, id: &str, strength: f32) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.graph.get_memory(id).is_none() {
            return Err(crate::error::RuntimeError::MemoryNotFound(id.to_string()));
        }
        let mut visited = std::collections::HashSet::new();
        activate_recursive(&mut inner.graph, id, strength, self.activation.propagation_depth, &self.activation, &mut visited);
        Ok(())
    }

    /// Activation decay + auto-forget sweep: every committed memory's
    /// activation decays by `decay_rate` per day
    /// since last access; memories that fall below `forgetting.threshold`
    /// while remaining under `forgetting.min_importance` are marked
    /// `Forgotten`, removed, and their now-orphaned nodes are swept.
    pub async fn decay_and_forget(&self) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let decay_rate = self.activation.decay_rate;
        let now = chrono::Utc::now();

        let candidates: Vec<String> = inner
            .graph
            .committed_memories()
            .map(|m| m.id.clone())
            .collect();

        let mut to_forget = Vec::new();
        for id in &candidates {
            inner.graph.update_memory(id, |m| {
                let days = (now - m.activation.last_access).num_seconds().max(0) as f32 / 86_400.0;
                m.activation.level = (m.activation.level * decay_rate.powf(days)).clamp(0.0, 1.0);
                m.sync_activation_metadata();
            })?;
        }
        for id in &candidates {
            if let Some(memory) = inner.graph.get_memory(id) {
                if memory.activation.level < self.forgetting.threshold && memory.importance < self.forgetting.min_importance {
                    to_forget.push(id.clone());
                }
            }
        }

        for id in &to_forget {
            inner.graph.update_memory(id, |m| m.status = MemoryStatus::Forgotten)?;
            inner.graph.remove_memory(id, false)?;
        }
        let swept = inner.graph.sweep_orphans();
        debug!(forgotten = to_forget.len(), orphans_swept = swept, "auto-forget sweep complete");
        Ok(to_forget.len())
    }

    /// Dedup consolidation: within `time_window_hours`, memories above
    /// `min_importance` are grouped by
    /// memory type, then compared pairwise within each group by
    /// topic-node cosine similarity; pairs clearing `pre_filter_threshold`
    /// are re-scored, and pairs at or above `similarity_threshold` with at
    /// least `min_confidence` are merged — the higher-importance memory of
    /// the pair survives, boosted by `+0.05`, and the other is absorbed —
    /// up to `max_batch_size` merges per run.
    pub async fn consolidate(&self) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let window = chrono::Duration::hours(self.consolidation.time_window_hours);
        let now = chrono::Utc::now();

        let mut candidates: Vec<Memory> = inner
            .graph
            .committed_memories()
            .filter(|m| now - m.created_at <= window)
            .filter(|m| m.importance >= self.consolidation.min_importance)
            .cloned()
            .collect();
        candidates.sort_by_key(|m| std::cmp::Reverse(m.created_at));
        candidates.truncate(self.consolidation.max_candidates);

        let mut merged = 0usize;
        let mut absorbed: std::collections::HashSet<String> = std::collections::HashSet::new();
        'outer: for i in 0..candidates.len() {
            if merged >= self.consolidation.max_batch_size {
                break;
            }
            if absorbed.contains(&candidates[i].id) {
                continue;
            }
            let Some(embed_i) = topic_embedding(&candidates[i]) else {
                continue;
            };
            for j in (i + 1)..candidates.len() {
                if merged >= self.consolidation.max_batch_size {
                    break 'outer;
                }
                if absorbed.contains(&candidates[j].id) {
                    continue;
                }
                if candidates[i].memory_type != candidates[j].memory_type {
                    continue;
                }
                let Some(embed_j) = topic_embedding(&candidates[j]) else {
                    continue;
                };
                let similarity = cosine_similarity(embed_i, embed_j);
                if similarity < self.consolidation.pre_filter_threshold {
                    continue;
                }
                let confidence = similarity;
                if similarity >= self.consolidation.similarity_threshold && confidence >= self.consolidation.min_confidence {
                    let (keep_id, drop_id) = if candidates[j].importance > candidates[i].importance {
                        (candidates[j].id.clone(), candidates[i].id.clone())
                    } else {
                        (candidates[i].id.clone(), candidates[j].id.clone())
                    };
                    inner.graph.merge_memories(&keep_id, &[drop_id.clone()])?;
                    inner.graph.update_memory(&keep_id, |m| {
                        m.importance = (m.importance + 0.05).clamp(0.0, 1.0);
                    })?;
                    absorbed.insert(drop_id);
                    merged += 1;
                    // If the surviving memory was `j`, keep `i`'s slot out of
                    // further consideration too — it no longer exists.
                    if keep_id == candidates[j].id {
                        absorbed.insert(candidates[i].id.clone());
                        continue 'outer;
                    }
                }
            }
        }
        let swept = inner.graph.sweep_orphans();
        info!(merged, orphans_swept = swept, "consolidation pass complete");
        Ok(merged)
    }

    /// Embeds any committed-memory node left without an embedding (e.g.
    /// ingested while the embedding backend was unavailable) and indexes it,
    /// up to `max_embeddings_per_run` per call.
    pub async fn backfill_missing_embeddings(&self) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let node_ids: Vec<String> = inner
            .graph
            .nodes()
            .filter(|n| n.embedding.is_none())
            .take(self.consolidation.max_embeddings_per_run)
            .map(|n| n.id.clone())
            .collect();

        let mut backfilled = 0usize;
        for id in &node_ids {
            let Some(content) = inner.graph.get_node(id).map(|n| n.content.clone()) else {
                continue;
            };
            let Some(embedding) = self.embedder.embed(&content) else {
                continue;
            };
            inner.graph.update_node(id, |n| n.embedding = Some(embedding.clone()))?;
            inner.vector_index.add(engram_core::vector::VectorUpsert {
                id: id.clone(),
                embedding,
                metadata: Default::default(),
                document: Some(content),
            })?;
            backfilled += 1;
        }
        debug!(backfilled, "embedding backfill pass complete");
        Ok(backfilled)
    }
}

/// Recursive half of `MemoryManager::activate`, split out to a free function
/// since it recurses on a `&mut GraphStore` borrow rather than `&self`.
fn activate_recursive(
    graph: &mut GraphStore,
    id: &str,
    strength: f32,
    depth_remaining: usize,
    config: &ActivationConfig,
    visited: &mut std::collections::HashSet<String>,
) {
    if !visited.insert(id.to_string()) {
        return;
    }
    let Some(own_node_ids) = graph
        .get_memory(id)
        .map(|m| m.node_ids().map(str::to_string).collect::<std::collections::HashSet<String>>())
    else {
        return;
    };

    let decay_rate = config.decay_rate;
    let _ = graph.update_memory(id, |m| {
        let hours = (chrono::Utc::now() - m.activation.last_access).num_seconds().max(0) as f32 / 3600.0;
        let decayed = m.activation.level * decay_rate.powf(hours / 24.0);
        m.activation.level = (decayed + strength).clamp(0.0, 1.0);
        m.activation.last_access = chrono::Utc::now();
        m.activation.access_count += 1;
        m.access_count += 1;
        m.last_accessed = chrono::Utc::now();
        m.sync_activation_metadata();
    });

    if strength <= config.propagation_min_strength || depth_remaining == 0 {
        return;
    }

    // Neighbors by shared node ownership, read from the canonical
    // `node_to_memories` index rather than each memory's own materialized
    // node list — the latter can lag behind after a `merge_nodes` rewires
    // ownership onto a node a memory never locally copied.
    let mut neighbor_ids: Vec<String> = Vec::new();
    let mut seen_neighbors = std::collections::HashSet::new();
    'outer: for node_id in &own_node_ids {
        for owner in graph.owners_of(node_id) {
            if owner == id || !seen_neighbors.insert(owner.clone()) {
                continue;
            }
            if graph.get_memory(&owner).map(|m| m.status != MemoryStatus::Forgotten).unwrap_or(false) {
                neighbor_ids.push(owner);
                if neighbor_ids.len() >= config.max_related_memories {
                    break 'outer;
                }
            }
        }
    }

    let next_strength = strength * config.propagation_strength;
    for neighbor_id in neighbor_ids {
        activate_recursive(graph, &neighbor_id, next_strength, depth_remaining - 1, config, visited);
    }
}

/// The embedding of a memory's TOPIC node — dedup compares topics, not
/// subjects, so two different people who both "like coffee" don't collapse
/// into one memory just because their subject text differs.
fn topic_embedding(memory: &Memory) -> Option<&[f32]> {
    memory
        .nodes
        .iter()
        .find(|n| n.node_type == engram_core::graph::NodeType::Topic)
        .and_then(|n| n.embedding.as_deref())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::testing::FakeEmbedder;

    fn manager() -> MemoryManager {
        MemoryManager::new(
            EmbeddingClient::new(Arc::new(FakeEmbedder { dims: 8 })),
            None,
            BuilderConfig::default(),
            PathExpansionConfig::default(),
            VectorIndexConfig::new(8),
            ActivationConfig::default(),
            ForgettingConfig::default(),
            ConsolidationConfig::default(),
        )
        .unwrap()
    }

    fn params(subject: &str, importance: f64) -> CreateMemoryParams {
        CreateMemoryParams {
            subject: subject.to_string(),
            memory_type: "FACT".to_string(),
            topic: "likes".to_string(),
            object: Some("coffee".to_string()),
            importance: Some(importance),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_memory_is_staged_until_committed() {
        let mgr = manager();
        let memory = mgr.create_memory(params("Alice", 0.8)).await.unwrap();
        assert_eq!(memory.status, MemoryStatus::Staged);
        mgr.commit(&memory.id).await.unwrap();
        assert_eq!(mgr.memory_count().await, 1);
    }

    #[tokio::test]
    async fn decay_and_forget_drops_low_activation_low_importance_memories() {
        let mgr = manager();
        let memory = mgr.create_memory(params("Alice", 0.1)).await.unwrap();
        mgr.commit(&memory.id).await.unwrap();
        {
            let mut inner = mgr.inner.lock().await;
            inner
                .graph
                .update_memory(&memory.id, |m| {
                    m.activation.level = 0.01;
                    m.activation.last_access = chrono::Utc::now() - chrono::Duration::days(100);
                })
                .unwrap();
        }
        let forgotten = mgr.decay_and_forget().await.unwrap();
        assert_eq!(forgotten, 1);
        assert_eq!(mgr.memory_count().await, 0);
    }

    #[tokio::test]
    async fn backfill_embeds_nodes_left_without_one() {
        let mgr = manager();
        let memory = mgr.create_memory(params("Alice", 0.8)).await.unwrap();
        let node_id = memory.subject_id.clone();
        {
            let mut inner = mgr.inner.lock().await;
            inner.graph.update_node(&node_id, |n| n.embedding = None).unwrap();
        }

        let backfilled = mgr.backfill_missing_embeddings().await.unwrap();
        assert_eq!(backfilled, 1);

        let inner = mgr.inner.lock().await;
        assert!(inner.graph.get_node(&node_id).unwrap().embedding.is_some());
    }

    #[tokio::test]
    async fn consolidate_keeps_higher_importance_and_boosts_it() {
        let mgr = manager();
        let low = mgr.create_memory(params("Bob", 0.5)).await.unwrap();
        let high = mgr.create_memory(params("Bob", 0.6)).await.unwrap();
        mgr.commit(&low.id).await.unwrap();
        mgr.commit(&high.id).await.unwrap();

        let merged = mgr.consolidate().await.unwrap();
        assert_eq!(merged, 1);
        assert_eq!(mgr.memory_count().await, 1);

        let inner = mgr.inner.lock().await;
        let survivor = inner.graph.get_memory(&high.id);
        assert!(survivor.is_some(), "higher-importance memory must survive");
        assert!((survivor.unwrap().importance - 0.65).abs() < 1e-6);
        assert!(inner.graph.get_memory(&low.id).is_none());
    }

    #[tokio::test]
    async fn decay_and_forget_preserves_important_memories() {
        let mgr = manager();
        let memory = mgr.create_memory(params("Alice", 0.95)).await.unwrap();
        mgr.commit(&memory.id).await.unwrap();
        {
            let mut inner = mgr.inner.lock().await;
            inner
                .graph
                .update_memory(&memory.id, |m| {
                    m.activation.level = 0.01;
                    m.activation.last_access = chrono::Utc::now() - chrono::Duration::days(100);
                })
                .unwrap();
        }
        let forgotten = mgr.decay_and_forget().await.unwrap();
        assert_eq!(forgotten, 0);
        assert_eq!(mgr.memory_count().await, 1);
    }

    #[tokio::test]
    async fn update_memory_sets_importance_and_updated_at() {
        let mgr = manager();
        let memory = mgr.create_memory(params("Alice", 0.5)).await.unwrap();
        mgr.commit(&memory.id).await.unwrap();

        let before = memory.updated_at;
        let updated = mgr.update_memory(&memory.id, Some(0.9), None).await.unwrap();
        assert!((updated.importance - 0.9).abs() < 1e-6);
        assert!(updated.updated_at >= before);
    }

    #[tokio::test]
    async fn delete_memory_removes_exclusively_owned_nodes_and_vectors() {
        let mgr = manager();
        let memory = mgr.create_memory(params("Alice", 0.5)).await.unwrap();
        mgr.commit(&memory.id).await.unwrap();
        let subject_id = memory.subject_id.clone();

        let deleted = mgr.delete_memory(&memory.id).await.unwrap();
        assert!(deleted);
        assert_eq!(mgr.memory_count().await, 0);

        let inner = mgr.inner.lock().await;
        assert!(inner.graph.get_node(&subject_id).is_none());
        assert!(inner.vector_index.get(&subject_id).is_none());
    }

    #[tokio::test]
    async fn forget_memory_is_idempotent() {
        let mgr = manager();
        let memory = mgr.create_memory(params("Alice", 0.5)).await.unwrap();
        mgr.commit(&memory.id).await.unwrap();

        assert!(mgr.forget_memory(&memory.id, true).await.unwrap());
        assert!(!mgr.forget_memory(&memory.id, true).await.unwrap());
    }

    #[tokio::test]
    async fn activate_zero_strength_is_a_near_no_op() {
        let mgr = manager();
        let memory = mgr.create_memory(params("Alice", 0.5)).await.unwrap();
        mgr.commit(&memory.id).await.unwrap();
        let before_level = memory.activation.level;

        mgr.activate(&memory.id, 0.0).await.unwrap();

        let inner = mgr.inner.lock().await;
        let after = inner.graph.get_memory(&memory.id).unwrap();
        assert!((after.activation.level - before_level).abs() < 1e-4);
    }

    #[tokio::test]
    async fn activate_propagates_to_memories_sharing_a_node() {
        let mgr = manager();
        let a = mgr.create_memory(params("Alice", 0.5)).await.unwrap();
        mgr.commit(&a.id).await.unwrap();

        // Build a second memory that reuses `a`'s subject node by merging
        // its own subject into it, so the two memories share a node.
        let b = mgr.create_memory(params("Alice", 0.5)).await.unwrap();
        mgr.commit(&b.id).await.unwrap();
        {
            let mut inner = mgr.inner.lock().await;
            inner.graph.merge_nodes(&b.subject_id, &a.subject_id).unwrap();
        }

        let before = {
            let inner = mgr.inner.lock().await;
            inner.graph.get_memory(&b.id).unwrap().activation.level
        };
        mgr.activate(&a.id, 0.8).await.unwrap();

        let inner = mgr.inner.lock().await;
        let after = inner.graph.get_memory(&b.id).unwrap().activation.level;
        assert!(after >= before, "propagated activation should not decrease the neighbor's level");
    }
}
