//! Path-score expansion: a damped graph-walk retrieval kernel.
//!
//! Paths are stored in a flat arena addressed by index rather than as a
//! parent/child object graph, since Rust has no convenient shared-ownership
//! tree without `Rc<RefCell<_>>` — an arena is the idiomatic substitute and
//! happens to make leaf extraction (retaining only paths without children)
//! a simple children-count pass over the whole arena instead of a single
//! frontier snapshot.

use crate::config::PathExpansionConfig;
use crate::graph::{EdgeType, GraphStore, Memory, NodeType};
use std::collections::{BinaryHeap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OrderedScore(u32);

impl OrderedScore {
    fn from_f32(score: f32) -> Self {
        Self((score.max(0.0) * 1_000_000.0) as u32)
    }
}

struct ArenaEntry {
    node_id: String,
    edge_id: Option<String>,
    score: f32,
    depth: usize,
    parent: Option<usize>,
    is_merged: bool,
    merged_from: Vec<usize>,
}

/// One path contributing to a memory's final score — the public shape of
/// an arena leaf, reconstructed by walking its parent chain.
#[derive(Debug, Clone)]
pub struct PathContribution {
    pub nodes: Vec<String>,
    pub edges: Vec<String>,
    pub score: f32,
    pub depth: usize,
    pub is_merged: bool,
}

#[derive(Debug, Clone)]
pub struct ExpansionResult {
    pub memory_id: String,
    pub score: f32,
    pub paths: Vec<PathContribution>,
}

/// Runs the expansion kernel. `initial_nodes` is `(node_id, vector_score)`
/// from the caller's vector search; `query_embedding` is used to score
/// freshly-discovered neighbor nodes; `prefer_node_types` feeds the final
/// per-memory preference bonus.
pub fn expand_with_path_scoring(
    graph: &GraphStore,
    initial_nodes: &[(String, f32)],
    query_embedding: Option<&[f32]>,
    top_k: usize,
    prefer_node_types: &[NodeType],
    config: &PathExpansionConfig,
) -> Vec<ExpansionResult> {
    if initial_nodes.is_empty() {
        return Vec::new();
    }

    let mut arena: Vec<ArenaEntry> = Vec::new();
    let mut active: Vec<usize> = Vec::new();
    let mut best_score_to_node: HashMap<String, f32> = HashMap::new();

    for (node_id, score) in initial_nodes {
        arena.push(ArenaEntry {
            node_id: node_id.clone(),
            edge_id: None,
            score: *score,
            depth: 0,
            parent: None,
            is_merged: false,
            merged_from: Vec::new(),
        });
        active.push(arena.len() - 1);
        best_score_to_node
            .entry(node_id.clone())
            .and_modify(|s| *s = s.max(*score))
            .or_insert(*score);
    }

    for hop in 0..config.max_hops {
        let prev_count = active.len();
        let mut hop_entries: Vec<usize> = Vec::new();
        let mut hop_leaf_node_ids: Vec<String> = Vec::new();

        for &path_idx in &active {
            let leaf = arena[path_idx].node_id.clone();
            let path_score = arena[path_idx].score;
            let max_branches = dynamic_max_branches(path_score, config);

            let mut neighbor_edges = graph.edges_incident(&leaf);
            neighbor_edges.sort_by(|a, b| {
                edge_weight(b, config)
                    .partial_cmp(&edge_weight(a, config))
                    .unwrap()
            });

            let mut branch_count = 0usize;
            for edge in neighbor_edges {
                if branch_count >= max_branches {
                    break;
                }
                let next_node = if edge.source_id == leaf {
                    edge.target_id.clone()
                } else {
                    edge.source_id.clone()
                };
                if path_contains(&arena, path_idx, &next_node) {
                    continue;
                }

                let node_score = score_node(graph, &next_node, query_embedding);
                let new_score = calculate_path_score(path_score, edge_weight(edge, config), node_score, hop + 1, config);

                if let Some(&best) = best_score_to_node.get(&next_node) {
                    if new_score < best * config.pruning_threshold {
                        continue;
                    }
                }
                best_score_to_node
                    .entry(next_node.clone())
                    .and_modify(|s| *s = s.max(new_score))
                    .or_insert(new_score);

                // Merge: if this hop already produced a path ending at the
                // same node, fuse them instead of keeping two branches.
                let merge_target = hop_leaf_node_ids
                    .iter()
                    .position(|n| n == &next_node)
                    .map(|pos| hop_entries[pos]);

                if let Some(existing_idx) = merge_target {
                    let merged_score = merge_score(new_score, arena[existing_idx].score, config);
                    arena.push(ArenaEntry {
                        node_id: next_node.clone(),
                        edge_id: Some(edge.id.clone()),
                        score: merged_score,
                        depth: hop + 1,
                        parent: Some(path_idx),
                        is_merged: true,
                        merged_from: vec![existing_idx],
                    });
                    let merged_idx = arena.len() - 1;
                    let pos = hop_leaf_node_ids.iter().position(|n| n == &next_node).unwrap();
                    hop_entries[pos] = merged_idx;
                } else {
                    arena.push(ArenaEntry {
                        node_id: next_node.clone(),
                        edge_id: Some(edge.id.clone()),
                        score: new_score,
                        depth: hop + 1,
                        parent: Some(path_idx),
                        is_merged: false,
                        merged_from: Vec::new(),
                    });
                    hop_entries.push(arena.len() - 1);
                    hop_leaf_node_ids.push(next_node);
                }

                branch_count += 1;
            }
        }

        if hop_entries.len() > config.max_active_paths {
            let retain = config.top_paths_retain.min(hop_entries.len());
            let mut heap: BinaryHeap<(OrderedScore, usize)> = hop_entries
                .iter()
                .map(|&idx| (OrderedScore::from_f32(arena[idx].score), idx))
                .collect();
            let mut kept = Vec::with_capacity(retain);
            for _ in 0..retain {
                if let Some((_, idx)) = heap.pop() {
                    kept.push(idx);
                }
            }
            hop_entries = kept;
        }

        active = hop_entries;

        if active.is_empty() {
            break;
        }
        if config.enable_early_stop && prev_count > 0 {
            let growth = (active.len() as f32 - prev_count as f32) / prev_count as f32;
            if growth < config.early_stop_growth_threshold {
                break;
            }
        }
    }

    // Leaf extraction: a path with no children in the whole arena.
    let mut has_children = vec![false; arena.len()];
    for entry in &arena {
        if let Some(p) = entry.parent {
            has_children[p] = true;
        }
    }
    let leaves: Vec<usize> = (0..arena.len()).filter(|&i| !has_children[i]).collect();

    // Map leaf paths to owning memories.
    let leaf_node_sequences: Vec<(usize, Vec<String>)> = leaves
        .iter()
        .map(|&idx| (idx, reconstruct_nodes(&arena, idx)))
        .collect();

    let mut memory_paths: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, nodes) in &leaf_node_sequences {
        let mut owners = HashSet::new();
        for node_id in nodes {
            for owner in graph.owners_of(node_id) {
                owners.insert(owner);
            }
        }
        for owner in owners {
            memory_paths.entry(owner).or_default().push(*idx);
        }
    }
    memory_paths.retain(|_, paths| paths.len() >= config.min_path_count_for_memory);

    // Rough pre-rank filter before expensive final scoring.
    if memory_paths.len() > config.max_candidate_memories {
        let mut rough: Vec<(String, f32)> = memory_paths
            .iter()
            .filter_map(|(mem_id, paths)| {
                let memory = graph.get_memory(mem_id)?;
                let max_path_score = paths.iter().map(|&i| arena[i].score).fold(0.0f32, f32::max);
                Some((mem_id.clone(), paths.len() as f32 * max_path_score * memory.importance))
            })
            .collect();
        rough.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        let retained: HashSet<String> = rough
            .into_iter()
            .take(config.max_candidate_memories)
            .map(|(id, _)| id)
            .collect();
        memory_paths.retain(|mem_id, _| retained.contains(mem_id));
    }

    // Final scoring.
    let mut scored: Vec<ExpansionResult> = memory_paths
        .into_iter()
        .filter_map(|(mem_id, path_indices)| {
            let memory = graph.get_memory(&mem_id)?;
            let path_scores: Vec<f32> = path_indices.iter().map(|&i| arena[i].score).collect();
            let path_aggregate = aggregate_path_scores(&path_scores);
            let importance_score = memory.importance;
            let recency = memory.recency_score();
            let weights = &config.final_scoring_weights;
            let base = path_aggregate * weights.path_score
                + importance_score * weights.importance
                + recency * weights.recency;

            let bonus = preference_bonus(memory, prefer_node_types, base);
            let final_score = base + bonus;

            let paths = path_indices
                .iter()
                .map(|&idx| PathContribution {
                    nodes: reconstruct_nodes(&arena, idx),
                    edges: reconstruct_edges(&arena, idx),
                    score: arena[idx].score,
                    depth: arena[idx].depth,
                    is_merged: arena[idx].is_merged,
                })
                .collect();

            Some(ExpansionResult {
                memory_id: mem_id,
                score: final_score,
                paths,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
    scored.truncate(top_k);
    scored
}

fn path_contains(arena: &[ArenaEntry], mut idx: usize, node_id: &str) -> bool {
    loop {
        if arena[idx].node_id == node_id {
            return true;
        }
        match arena[idx].parent {
            Some(p) => idx = p,
            None => return false,
        }
    }
}

fn reconstruct_nodes(arena: &[ArenaEntry], mut idx: usize) -> Vec<String> {
    let mut nodes = vec![arena[idx].node_id.clone()];
    while let Some(p) = arena[idx].parent {
        nodes.push(arena[p].node_id.clone());
        idx = p;
    }
    nodes.reverse();
    nodes
}

fn reconstruct_edges(arena: &[ArenaEntry], mut idx: usize) -> Vec<String> {
    let mut edges = Vec::new();
    loop {
        if let Some(e) = &arena[idx].edge_id {
            edges.push(e.clone());
        }
        match arena[idx].parent {
            Some(p) => idx = p,
            None => break,
        }
    }
    edges.reverse();
    edges
}

fn edge_weight(edge: &crate::graph::Edge, config: &PathExpansionConfig) -> f32 {
    let type_weight = match edge.edge_type {
        EdgeType::Reference => config.edge_type_weights.reference,
        EdgeType::Attribute => config.edge_type_weights.attribute,
        EdgeType::Relation => config.edge_type_weights.relation,
        EdgeType::Temporal => config.edge_type_weights.temporal,
        EdgeType::MemoryType | EdgeType::CoreRelation | EdgeType::Causality => config.edge_type_weights.default,
    };
    edge.importance.clamp(0.0, 1.0) * type_weight
}

fn score_node(graph: &GraphStore, node_id: &str, query_embedding: Option<&[f32]>) -> f32 {
    let Some(query) = query_embedding else {
        return 0.5;
    };
    match graph.get_node(node_id).and_then(|n| n.embedding.as_deref()) {
        Some(embedding) => cosine_similarity(query, embedding).clamp(0.0, 1.0),
        None => 0.3,
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

/// `score = old * edge_weight * damping^depth + node_score * (1 - damping^depth)`.
fn calculate_path_score(old_score: f32, edge_weight: f32, node_score: f32, depth: usize, config: &PathExpansionConfig) -> f32 {
    let decay = config.damping_factor.powi(depth as i32);
    old_score * edge_weight * decay + node_score * (1.0 - decay)
}

fn dynamic_max_branches(path_score: f32, config: &PathExpansionConfig) -> usize {
    if path_score > config.high_score_threshold {
        ((config.max_branches_per_node as f32) * 1.5) as usize
    } else if path_score > config.medium_score_threshold {
        config.max_branches_per_node
    } else {
        ((config.max_branches_per_node as f32) * 0.5) as usize
    }
}

fn merge_score(score1: f32, score2: f32, _config: &PathExpansionConfig) -> f32 {
    // `weighted_geometric` is the default merge strategy; `max_bonus` and
    // arithmetic-mean variants are alternatives callers may select by
    // post-processing.
    (score1 * score2).sqrt() * 1.2
}

fn aggregate_path_scores(scores: &[f32]) -> f32 {
    if scores.is_empty() {
        return 0.0;
    }
    let total: f32 = scores.iter().sum();
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
    let top3 = &sorted[..sorted.len().min(3)];
    let avg_top = top3.iter().sum::<f32>() / top3.len() as f32;
    total * 0.4 + avg_top * 0.6
}

/// Up to +10% of `base_score`, scaled by the fraction of a memory's nodes
/// whose type is in `prefer_node_types`.
fn preference_bonus(memory: &Memory, prefer_node_types: &[NodeType], base_score: f32) -> f32 {
    if prefer_node_types.is_empty() || memory.nodes.is_empty() {
        return 0.0;
    }
    let matched = memory
        .nodes
        .iter()
        .filter(|n| prefer_node_types.contains(&n.node_type))
        .count();
    if matched == 0 {
        return 0.0;
    }
    let ratio = matched as f32 / memory.nodes.len() as f32;
    base_score * ratio * 0.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, GraphStore, MemoryType, Node};

    fn setup_basic_graph() -> (GraphStore, String, String) {
        let mut graph = GraphStore::new();
        let subj = Node::new("Alice", NodeType::Subject);
        let mut topic = Node::new("lives_in", NodeType::Topic);
        topic.embedding = Some(vec![1.0, 0.0, 0.0]);
        let mut object = Node::new("Tokyo", NodeType::Object);
        object.embedding = Some(vec![0.9, 0.1, 0.0]);

        let mut memory = Memory::new(subj.id.clone(), MemoryType::Fact, 0.8);
        let e1 = Edge::new(subj.id.clone(), topic.id.clone(), "FACT", EdgeType::MemoryType);
        let e2 = Edge::new(topic.id.clone(), object.id.clone(), "核心关系", EdgeType::CoreRelation);
        memory.nodes = vec![subj.clone(), topic.clone(), object.clone()];
        memory.edges = vec![e1, e2];
        let topic_id = topic.id.clone();
        let mem_id = memory.id.clone();
        graph.add_memory(memory).unwrap();
        (graph, topic_id, mem_id)
    }

    #[test]
    fn expansion_from_topic_reaches_owning_memory() {
        let (graph, topic_id, mem_id) = setup_basic_graph();
        let config = PathExpansionConfig::default();
        let query = vec![1.0, 0.0, 0.0];
        let results = expand_with_path_scoring(&graph, &[(topic_id, 0.9)], Some(&query), 5, &[], &config);
        assert!(results.iter().any(|r| r.memory_id == mem_id));
    }

    #[test]
    fn empty_initial_set_returns_empty() {
        let graph = GraphStore::new();
        let config = PathExpansionConfig::default();
        let results = expand_with_path_scoring(&graph, &[], None, 5, &[], &config);
        assert!(results.is_empty());
    }

    #[test]
    fn preference_bonus_favors_matching_node_type() {
        let mut memory = Memory::new("subj", MemoryType::Fact, 0.5);
        memory.nodes = vec![Node::new("r", NodeType::Reference)];
        let bonus = preference_bonus(&memory, &[NodeType::Reference], 1.0);
        assert!(bonus > 0.0);
        let no_bonus = preference_bonus(&memory, &[NodeType::Event], 1.0);
        assert_eq!(no_bonus, 0.0);
    }

    #[test]
    fn path_score_decays_with_depth() {
        let config = PathExpansionConfig::default();
        let shallow = calculate_path_score(0.9, 1.0, 0.5, 1, &config);
        let deep = calculate_path_score(0.9, 1.0, 0.5, 3, &config);
        // Deeper hops damp the propagated term more, pulling toward node_score.
        assert_ne!(shallow, deep);
    }

    #[test]
    fn dynamic_branch_cap_scales_with_score() {
        let config = PathExpansionConfig::default();
        assert!(dynamic_max_branches(0.8, &config) > dynamic_max_branches(0.2, &config));
    }
}
