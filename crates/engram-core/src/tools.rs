//! `MemoryTools` — the three tool-call operations LLM agents invoke:
//! `create_memory`, `link_memories`, `search_memories`.

use crate::builder::Builder;
use crate::config::{BuilderConfig, PathExpansionConfig};
use crate::embed::{EmbeddingClient, TextCompleter};
use crate::extract::{CreateMemoryParams, ExtractError, Extractor};
use crate::graph::{Activation, Edge, EdgeType, GraphStore, Memory, MemoryStatus, NodeType};
use crate::path_expansion::{expand_with_path_scoring, PathContribution};
use crate::vector::{FusionMethod, VectorIndex, VectorUpsert};
use std::collections::BTreeMap;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Vector(#[from] crate::vector::VectorSearchError),
    #[error(transparent)]
    Graph(#[from] crate::graph::GraphError),
    #[error("no memory matched description: {0}")]
    NoMatch(String),
}

pub type Result<T> = std::result::Result<T, ToolError>;

/// Parameters for `search_memories`, mirroring the tool's schema.
#[derive(Debug, Clone)]
pub struct SearchMemoriesParams {
    pub query: String,
    pub chat_history: Vec<String>,
    pub top_k: usize,
    pub expand_depth: usize,
    pub use_multi_query: bool,
    pub min_importance: f32,
}

impl Default for SearchMemoriesParams {
    fn default() -> Self {
        Self {
            query: String::new(),
            chat_history: Vec::new(),
            top_k: 10,
            expand_depth: 2,
            use_multi_query: true,
            min_importance: 0.3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory_id: String,
    pub score: f32,
    pub contributing_paths: Vec<PathContribution>,
}

/// Embeds, indexes, and retrieves memories over a `GraphStore` + `VectorIndex`
/// pair. Holds no state of its own beyond its collaborators' handles.
pub struct MemoryTools<'a> {
    pub graph: &'a mut GraphStore,
    pub vector_index: &'a mut VectorIndex,
    pub embedder: &'a EmbeddingClient,
    pub completer: Option<&'a dyn TextCompleter>,
    pub builder_config: BuilderConfig,
    pub path_expansion_config: PathExpansionConfig,
}

impl<'a> MemoryTools<'a> {
    pub fn new(
        graph: &'a mut GraphStore,
        vector_index: &'a mut VectorIndex,
        embedder: &'a EmbeddingClient,
        completer: Option<&'a dyn TextCompleter>,
        builder_config: BuilderConfig,
        path_expansion_config: PathExpansionConfig,
    ) -> Self {
        Self {
            graph,
            vector_index,
            embedder,
            completer,
            builder_config,
            path_expansion_config,
        }
    }

    /// `create_memory` tool. Builds the canonical subgraph, indexes every
    /// embedded node, and stages the memory.
    pub fn create_memory(&mut self, params: CreateMemoryParams) -> Result<Memory> {
        let extracted = Extractor::new().extract_from_tool_params(params)?;
        let memory = {
            let builder = Builder::new(self.graph, self.embedder, self.builder_config.clone());
            builder.build_memory(&extracted)
        };

        for node in &memory.nodes {
            if let Some(embedding) = &node.embedding {
                let mut metadata = BTreeMap::new();
                metadata.insert(
                    "node_type".to_string(),
                    serde_json::Value::String(node.node_type.as_str().to_string()),
                );
                self.vector_index.add(VectorUpsert {
                    id: node.id.clone(),
                    embedding: embedding.clone(),
                    metadata,
                    document: Some(node.content.clone()),
                })?;
            }
        }
        self.graph.add_memory(memory.clone())?;
        Ok(memory)
    }

    /// `link_memories` tool. Matches source/target memories by the highest
    /// subject-text similarity to their descriptions, then connects their
    /// subject nodes with a `RELATION` edge.
    pub fn link_memories(
        &mut self,
        source_description: &str,
        target_description: &str,
        relation_type: &str,
        importance: Option<f64>,
    ) -> Result<Edge> {
        let (source_desc, target_desc, relation, importance) =
            Extractor::new().extract_link_params(source_description, target_description, relation_type, importance)?;

        let source_memory = self
            .find_memory_by_description(&source_desc)
            .ok_or_else(|| ToolError::NoMatch(source_desc.clone()))?;
        let target_memory = self
            .find_memory_by_description(&target_desc)
            .ok_or_else(|| ToolError::NoMatch(target_desc.clone()))?;

        let edge = Edge::new(source_memory.subject_id.clone(), target_memory.subject_id.clone(), relation, EdgeType::Relation)
            .with_importance(importance);
        self.graph.add_edge(edge.clone())?;
        Ok(edge)
    }

    fn find_memory_by_description(&self, description: &str) -> Option<Memory> {
        let query_embedding = self.embedder.embed(description);
        let mut best: Option<(f32, Memory)> = None;
        for memory in self.graph.memories() {
            let subject = memory.nodes.iter().find(|n| n.node_type == NodeType::Subject);
            let score = match (&query_embedding, subject.and_then(|s| s.embedding.as_deref())) {
                (Some(q), Some(e)) => cosine_similarity(q, e),
                _ => {
                    if subject.map(|s| s.content.eq_ignore_ascii_case(description)).unwrap_or(false) {
                        1.0
                    } else {
                        0.0
                    }
                }
            };
            if best.as_ref().map(|(b, _)| score > *b).unwrap_or(true) {
                best = Some((score, memory.clone()));
            }
        }
        best.filter(|(score, _)| *score > 0.0).map(|(_, m)| m)
    }

    /// `search_memories` tool.
    pub fn search_memories(&mut self, params: &SearchMemoriesParams) -> Result<Vec<ScoredMemory>> {
        let (sub_queries, prefer_node_types) = self.generate_sub_queries(params);

        let query_embeddings: Vec<Option<Vec<f32>>> =
            sub_queries.iter().map(|(q, _)| self.embedder.embed(q)).collect();
        let primary_embedding = query_embeddings.first().cloned().flatten();

        let embedded: Vec<(Vec<f32>, f32)> = sub_queries
            .iter()
            .zip(query_embeddings.iter())
            .filter_map(|((_, w), e)| e.clone().map(|e| (e, *w)))
            .collect();

        let hits = if embedded.len() > 1 {
            let queries: Vec<Vec<f32>> = embedded.iter().map(|(e, _)| e.clone()).collect();
            let weights: Vec<f32> = embedded.iter().map(|(_, w)| *w).collect();
            self.vector_index
                .search_multi(&queries, &weights, params.top_k * 2, FusionMethod::WeightedMax)?
        } else if let Some((embedding, _)) = embedded.first() {
            self.vector_index
                .search(embedding, params.top_k * crate::vector::SINGLE_QUERY_FALLBACK_OVERFETCH, None, 0.0)?
        } else {
            Vec::new()
        };

        // Initial memory set: highest per-memory similarity among its hit nodes.
        let mut initial: BTreeMap<String, f32> = BTreeMap::new();
        for (node_id, similarity, _record) in &hits {
            for memory_id in self.graph.owners_of(node_id) {
                initial
                    .entry(memory_id)
                    .and_modify(|s| *s = s.max(*similarity))
                    .or_insert(*similarity);
            }
        }
        let initial_nodes: Vec<(String, f32)> = hits.iter().map(|(id, s, _)| (id.clone(), *s)).collect();

        if params.expand_depth > 0 {
            let expanded = expand_with_path_scoring(
                self.graph,
                &initial_nodes,
                primary_embedding.as_deref(),
                params.top_k,
                &prefer_node_types,
                &self.path_expansion_config,
            );
            if !expanded.is_empty() {
                let results: Vec<ScoredMemory> = expanded
                    .into_iter()
                    .filter(|r| {
                        self.graph
                            .get_memory(&r.memory_id)
                            .map(|m| m.importance >= params.min_importance)
                            .unwrap_or(false)
                    })
                    .map(|r| ScoredMemory {
                        memory_id: r.memory_id,
                        score: r.score,
                        contributing_paths: r.paths,
                    })
                    .collect();
                self.activate_top_results(&results);
                return Ok(results);
            }
        }

        let results = self.fallback_composite_scoring(&initial, params, &prefer_node_types);
        self.activate_top_results(&results);
        Ok(results)
    }

    /// LLM-backed multi-query reformulation; on missing completer or LLM
    /// failure, falls back to the single original query at weight 1.0 with
    /// no type preference.
    fn generate_sub_queries(&self, params: &SearchMemoriesParams) -> (Vec<(String, f32)>, Vec<NodeType>) {
        if !params.use_multi_query {
            return (vec![(params.query.clone(), 1.0)], Vec::new());
        }
        let Some(completer) = self.completer else {
            return (vec![(params.query.clone(), 1.0)], Vec::new());
        };

        let recent_history: Vec<&str> = params.chat_history.iter().rev().take(10).map(|s| s.as_str()).collect();
        let prompt = format!(
            "Reformulate this query into 3-5 weighted search queries and list preferred node types.\nQuery: {}\nHistory: {:?}",
            params.query, recent_history
        );
        let Some(response) = completer.complete(&prompt) else {
            return (vec![(params.query.clone(), 1.0)], Vec::new());
        };
        parse_multi_query_response(&response).unwrap_or_else(|| (vec![(params.query.clone(), 1.0)], Vec::new()))
    }

    /// Fallback composite scoring, used when path expansion is disabled or
    /// yields nothing.
    fn fallback_composite_scoring(
        &self,
        initial: &BTreeMap<String, f32>,
        params: &SearchMemoriesParams,
        prefer_node_types: &[NodeType],
    ) -> Vec<ScoredMemory> {
        const BASE_W_SIM: f32 = 0.5;
        const BASE_W_IMP: f32 = 0.3;
        const BASE_W_REC: f32 = 0.2;

        let mut scored: Vec<ScoredMemory> = initial
            .iter()
            .filter_map(|(memory_id, similarity)| {
                let memory = self.graph.get_memory(memory_id)?;
                if memory.importance < params.min_importance {
                    return None;
                }
                let (sim_adj, imp_adj, rec_adj) = type_adjustment(memory);
                let weights = crate::vector::normalize_weights(&[
                    BASE_W_SIM * sim_adj,
                    BASE_W_IMP * imp_adj,
                    BASE_W_REC * rec_adj,
                ]);
                let recency = memory.recency_score();
                let mut final_score = similarity * weights[0] + memory.importance * weights[1] + recency * weights[2];

                if memory
                    .nodes
                    .iter()
                    .any(|n| matches!(n.node_type, NodeType::Reference | NodeType::Attribute))
                {
                    final_score *= 1.10;
                }
                for _ in memory.nodes.iter().filter(|n| prefer_node_types.contains(&n.node_type)) {
                    final_score *= 1.15;
                }

                Some(ScoredMemory {
                    memory_id: memory_id.clone(),
                    score: final_score,
                    contributing_paths: Vec::new(),
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        scored.truncate(params.top_k);
        scored
    }

    /// Auto-activation: boosts the top up-to-2 retrieved memories,
    /// propagating to neighbors at half strength.
    fn activate_top_results(&mut self, results: &[ScoredMemory]) {
        let mut ranked: Vec<&ScoredMemory> = results.iter().collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        for scored in ranked.into_iter().take(2) {
            let Some((importance, own_node_ids)) = self
                .graph
                .get_memory(&scored.memory_id)
                .map(|m| (m.importance, m.node_ids().map(str::to_string).collect::<std::collections::HashSet<String>>()))
            else {
                continue;
            };
            let strength = 0.3 * importance.max(0.1);
            let _ = self.graph.update_memory(&scored.memory_id, |m| {
                apply_activation(&mut m.activation, strength);
                m.access_count += 1;
                m.last_accessed = chrono::Utc::now();
                m.sync_activation_metadata();
            });

            if strength > 0.1 {
                let neighbor_ids: Vec<String> = self
                    .graph
                    .memories()
                    .filter(|m| m.id != scored.memory_id && m.status != MemoryStatus::Forgotten)
                    .filter(|m| m.node_ids().any(|n| own_node_ids.contains(n)))
                    .map(|m| m.id.clone())
                    .take(2)
                    .collect();
                for neighbor_id in neighbor_ids {
                    let spread = strength * 0.5;
                    let _ = self.graph.update_memory(&neighbor_id, |m| {
                        apply_activation(&mut m.activation, spread);
                        m.sync_activation_metadata();
                    });
                }
            }
        }
    }
}

fn apply_activation(activation: &mut Activation, strength: f32) {
    let hours = (chrono::Utc::now() - activation.last_access).num_seconds().max(0) as f32 / 3600.0;
    let decayed = activation.level * 0.95f32.powf(hours / 24.0);
    activation.level = (decayed + strength).clamp(0.0, 1.0);
    activation.last_access = chrono::Utc::now();
    activation.access_count += 1;
}

/// Per-memory-type weight adjustment for fallback scoring:
/// `(similarity_factor, importance_factor, recency_factor)`.
fn type_adjustment(memory: &Memory) -> (f32, f32, f32) {
    let has_type = |types: &[NodeType]| memory.nodes.iter().any(|n| types.contains(&n.node_type));
    if has_type(&[NodeType::Attribute, NodeType::Reference]) {
        (1.08, 1.0, 0.5)
    } else if has_type(&[NodeType::Event]) {
        (0.85, 0.8, 2.5)
    } else if has_type(&[NodeType::Entity]) {
        (0.92, 1.2, 1.0)
    } else {
        (1.0, 1.0, 1.0)
    }
}

/// Parses an LLM multi-query response of the form:
/// `query|weight` lines, followed by a `TYPES: a,b,c` line.
fn parse_multi_query_response(response: &str) -> Option<(Vec<(String, f32)>, Vec<NodeType>)> {
    let mut queries = Vec::new();
    let mut types = Vec::new();
    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("TYPES:") {
            types = rest.split(',').map(|s| NodeType::parse_name(s.trim())).collect();
            continue;
        }
        if let Some((q, w)) = line.rsplit_once('|') {
            if let Ok(weight) = w.trim().parse::<f32>() {
                queries.push((q.trim().to_string(), weight.clamp(0.5, 1.0)));
            }
        }
    }
    if queries.is_empty() {
        None
    } else {
        Some((queries, types))
    }
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
    use crate::embed::test_support::FakeEmbedder;
    use crate::vector::{VectorIndex, VectorIndexConfig};
    use std::sync::Arc;

    fn setup() -> (GraphStore, VectorIndex, EmbeddingClient) {
        let graph = GraphStore::new();
        let index = VectorIndex::new(VectorIndexConfig::new(8)).unwrap();
        let embedder = EmbeddingClient::new(Arc::new(FakeEmbedder { dims: 8 }));
        (graph, index, embedder)
    }

    #[test]
    fn create_memory_indexes_embedded_nodes() {
        let (mut graph, mut index, embedder) = setup();
        let mut tools = MemoryTools::new(&mut graph, &mut index, &embedder, None, BuilderConfig::default(), PathExpansionConfig::default());
        let params = CreateMemoryParams {
            subject: "Alice".to_string(),
            memory_type: "FACT".to_string(),
            topic: "lives_in".to_string(),
            object: Some("Tokyo".to_string()),
            ..Default::default()
        };
        let memory = tools.create_memory(params).unwrap();
        assert_eq!(memory.status, MemoryStatus::Staged);
        assert!(tools.vector_index.count() >= 2);
    }

    #[test]
    fn search_memories_falls_back_without_completer() {
        let (mut graph, mut index, embedder) = setup();
        {
            let mut tools = MemoryTools::new(&mut graph, &mut index, &embedder, None, BuilderConfig::default(), PathExpansionConfig::default());
            let params = CreateMemoryParams {
                subject: "Alice".to_string(),
                memory_type: "FACT".to_string(),
                topic: "lives_in".to_string(),
                object: Some("Tokyo".to_string()),
                importance: Some(0.9),
                ..Default::default()
            };
            tools.create_memory(params).unwrap();
        }

        let mut tools = MemoryTools::new(&mut graph, &mut index, &embedder, None, BuilderConfig::default(), PathExpansionConfig::default());
        let search_params = SearchMemoriesParams {
            query: "lives_in".to_string(),
            expand_depth: 0,
            ..Default::default()
        };
        let results = tools.search_memories(&search_params).unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn link_memories_requires_existing_match() {
        let (mut graph, mut index, embedder) = setup();
        let mut tools = MemoryTools::new(&mut graph, &mut index, &embedder, None, BuilderConfig::default(), PathExpansionConfig::default());
        let result = tools.link_memories("nonexistent", "also-nonexistent", "related", None);
        assert!(result.is_err());
    }
}
