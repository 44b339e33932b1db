//! In-memory directed labeled multigraph with a memory-id subgraph index.
//!
//! Plain `&self`/`&mut self` methods over plain fields rather than a
//! database connection — this store has no IO of its own; persistence
//! (`crate::persistence`) serializes it wholesale.

use super::edge::{Edge, EdgeType};
use super::error::{GraphError, Result};
use super::memory::{Memory, MemoryStatus};
use super::node::Node;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Direction filter for neighbor traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Both,
}

/// Schema version stamped on every snapshot written to disk.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Counts stamped into a snapshot's `metadata` at save time, so a reader can
/// sanity-check a file without deserializing the full body.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SnapshotStatistics {
    pub node_count: usize,
    pub edge_count: usize,
    pub memory_count: usize,
}

/// Envelope carried by both on-disk store files, `memory_graph.json` and
/// `staged_memories.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: u32,
    pub saved_at: chrono::DateTime<chrono::Utc>,
    pub statistics: SnapshotStatistics,
}

impl Default for SnapshotMetadata {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: chrono::Utc::now(),
            statistics: SnapshotStatistics::default(),
        }
    }
}

/// On-disk shape of a store snapshot, `memory_graph.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub memories: HashMap<String, Memory>,
    pub node_to_memories: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub metadata: SnapshotMetadata,
}

/// The shared knowledge graph plus its memory-subgraph index.
#[derive(Debug, Default)]
pub struct GraphStore {
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Edge>,
    out_edges: HashMap<String, Vec<String>>,
    in_edges: HashMap<String, Vec<String>>,
    memory_index: HashMap<String, Memory>,
    node_to_memories: HashMap<String, HashSet<String>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------- reads

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn get_memory(&self, id: &str) -> Option<&Memory> {
        self.memory_index.get(id)
    }

    pub fn memory_count(&self) -> usize {
        self.memory_index.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn memories(&self) -> impl Iterator<Item = &Memory> {
        self.memory_index.values()
    }

    /// Every node in the shared graph, memory-owned or not — used by the
    /// builder's exact/semantic reuse lookups.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn committed_memories(&self) -> impl Iterator<Item = &Memory> {
        self.memory_index
            .values()
            .filter(|m| m.status == MemoryStatus::Committed)
    }

    pub fn owners_of(&self, node_id: &str) -> HashSet<String> {
        self.node_to_memories
            .get(node_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Memories owning any of `node_ids`, batched — used by path-score
    /// expansion to map leaf nodes to candidate memories in one pass.
    pub fn memories_for_nodes(&self, node_ids: &[String]) -> HashMap<String, HashSet<String>> {
        let mut out: HashMap<String, HashSet<String>> = HashMap::new();
        for nid in node_ids {
            if let Some(owners) = self.node_to_memories.get(nid) {
                out.insert(nid.clone(), owners.clone());
            }
        }
        out
    }

    // --------------------------------------------------------------- writes

    /// Add a node to the global graph (idempotent on id).
    pub fn add_node(&mut self, node: Node) {
        self.out_edges.entry(node.id.clone()).or_default();
        self.in_edges.entry(node.id.clone()).or_default();
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn update_node<F: FnOnce(&mut Node)>(&mut self, id: &str, f: F) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        f(node);
        Ok(())
    }

    /// Add an edge; rejects if either endpoint is absent from the graph.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        if !self.nodes.contains_key(&edge.source_id) || !self.nodes.contains_key(&edge.target_id) {
            return Err(GraphError::DanglingEdge {
                source_id: edge.source_id.clone(),
                target_id: edge.target_id.clone(),
            });
        }
        self.out_edges
            .entry(edge.source_id.clone())
            .or_default()
            .push(edge.id.clone());
        self.in_edges
            .entry(edge.target_id.clone())
            .or_default()
            .push(edge.id.clone());
        self.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    pub fn update_edge<F: FnOnce(&mut Edge)>(&mut self, id: &str, f: F) -> Result<()> {
        let edge = self
            .edges
            .get_mut(id)
            .ok_or_else(|| GraphError::MemoryNotFound(id.to_string()))?;
        f(edge);
        Ok(())
    }

    pub fn remove_edge(&mut self, id: &str) -> Option<Edge> {
        let edge = self.edges.remove(id)?;
        if let Some(v) = self.out_edges.get_mut(&edge.source_id) {
            v.retain(|e| e != id);
        }
        if let Some(v) = self.in_edges.get_mut(&edge.target_id) {
            v.retain(|e| e != id);
        }
        Some(edge)
    }

    /// Insert a freshly built memory: its nodes/edges are merged into the
    /// global graph, `node_to_memories` gains this memory's id for every
    /// node it touches, and the memory itself enters `memory_index`.
    pub fn add_memory(&mut self, memory: Memory) -> Result<()> {
        for node in &memory.nodes {
            self.nodes.entry(node.id.clone()).or_insert_with(|| node.clone());
            self.out_edges.entry(node.id.clone()).or_default();
            self.in_edges.entry(node.id.clone()).or_default();
            self.node_to_memories
                .entry(node.id.clone())
                .or_default()
                .insert(memory.id.clone());
        }
        for edge in &memory.edges {
            if !self.edges.contains_key(&edge.id) {
                self.out_edges
                    .entry(edge.source_id.clone())
                    .or_default()
                    .push(edge.id.clone());
                self.in_edges
                    .entry(edge.target_id.clone())
                    .or_default()
                    .push(edge.id.clone());
                self.edges.insert(edge.id.clone(), edge.clone());
            }
        }
        self.memory_index.insert(memory.id.clone(), memory);
        Ok(())
    }

    pub fn update_memory<F: FnOnce(&mut Memory)>(&mut self, id: &str, f: F) -> Result<()> {
        let memory = self
            .memory_index
            .get_mut(id)
            .ok_or_else(|| GraphError::MemoryNotFound(id.to_string()))?;
        f(memory);
        memory.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Remove a memory: for each of its nodes, drop this memory id from the
    /// owner set; if `cleanup_orphans`, nodes whose owner set becomes empty
    /// are deleted along with edges incident to them.
    pub fn remove_memory(&mut self, id: &str, cleanup_orphans: bool) -> Result<Memory> {
        let memory = self
            .memory_index
            .remove(id)
            .ok_or_else(|| GraphError::MemoryNotFound(id.to_string()))?;

        let mut orphaned = Vec::new();
        for node in &memory.nodes {
            if let Some(owners) = self.node_to_memories.get_mut(&node.id) {
                owners.remove(id);
                if owners.is_empty() {
                    orphaned.push(node.id.clone());
                }
            }
        }

        if cleanup_orphans {
            for node_id in &orphaned {
                self.delete_node_and_incident_edges(node_id);
                self.node_to_memories.remove(node_id);
            }
        }

        Ok(memory)
    }

    fn delete_node_and_incident_edges(&mut self, node_id: &str) {
        self.nodes.remove(node_id);
        let out = self.out_edges.remove(node_id).unwrap_or_default();
        let inc = self.in_edges.remove(node_id).unwrap_or_default();
        for eid in out.into_iter().chain(inc.into_iter()) {
            self.remove_edge(&eid);
        }
    }

    /// Sweep every node whose owner set is empty (post-batch-forget cleanup).
    pub fn sweep_orphans(&mut self) -> usize {
        let orphans: Vec<String> = self
            .node_to_memories
            .iter()
            .filter(|(_, owners)| owners.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &orphans {
            self.delete_node_and_incident_edges(id);
            self.node_to_memories.remove(id);
        }
        // Nodes that were never memory-owned in the first place (e.g. created
        // directly via add_node) are left untouched by design.
        orphans.len()
    }

    /// Rewire `source`'s in/out edges onto `target`, skipping self-loops,
    /// then delete `source`. Multi-edges that result are kept (multigraph).
    pub fn merge_nodes(&mut self, source: &str, target: &str) -> Result<()> {
        if source == target {
            return Err(GraphError::SelfLoopMerge(source.to_string()));
        }
        if !self.nodes.contains_key(source) || !self.nodes.contains_key(target) {
            return Err(GraphError::NodeNotFound(source.to_string()));
        }

        let out_ids = self.out_edges.get(source).cloned().unwrap_or_default();
        for eid in out_ids {
            if let Some(edge) = self.edges.get_mut(&eid) {
                edge.source_id = target.to_string();
                if edge.is_self_loop() {
                    let eid = eid.clone();
                    self.remove_edge(&eid);
                    continue;
                }
            }
            self.out_edges.entry(target.to_string()).or_default().push(eid);
        }
        self.out_edges.remove(source);

        let in_ids = self.in_edges.get(source).cloned().unwrap_or_default();
        for eid in in_ids {
            if let Some(edge) = self.edges.get_mut(&eid) {
                edge.target_id = target.to_string();
                if edge.is_self_loop() {
                    let eid = eid.clone();
                    self.remove_edge(&eid);
                    continue;
                }
            }
            if self.edges.contains_key(&eid) {
                self.in_edges.entry(target.to_string()).or_default().push(eid);
            }
        }
        self.in_edges.remove(source);

        // Target inherits source's owning memories; rewrite node references
        // inside those memories' materialized node/edge lists.
        let owners = self.node_to_memories.remove(source).unwrap_or_default();
        for mem_id in &owners {
            self.node_to_memories
                .entry(target.to_string())
                .or_default()
                .insert(mem_id.clone());
            if let Some(mem) = self.memory_index.get_mut(mem_id) {
                mem.nodes.retain(|n| n.id != source);
                for e in mem.edges.iter_mut() {
                    if e.source_id == source {
                        e.source_id = target.to_string();
                    }
                    if e.target_id == source {
                        e.target_id = target.to_string();
                    }
                }
            }
        }

        self.nodes.remove(source);
        Ok(())
    }

    /// Transfer nodes/edges of `sources` into `target`, union owner sets,
    /// delete source memories. Does not sweep orphans — that's the
    /// caller's job.
    pub fn merge_memories(&mut self, target: &str, sources: &[String]) -> Result<()> {
        if !self.memory_index.contains_key(target) {
            return Err(GraphError::MemoryNotFound(target.to_string()));
        }
        for src_id in sources {
            let Some(src) = self.memory_index.remove(src_id) else {
                continue;
            };
            for node in &src.nodes {
                if let Some(owners) = self.node_to_memories.get_mut(&node.id) {
                    owners.remove(src_id);
                    owners.insert(target.to_string());
                }
            }
            if let Some(tgt) = self.memory_index.get_mut(target) {
                for node in src.nodes {
                    if !tgt.nodes.iter().any(|n| n.id == node.id) {
                        tgt.nodes.push(node);
                    }
                }
                for edge in src.edges {
                    if !tgt.edges.iter().any(|e| e.id == edge.id) {
                        tgt.edges.push(edge);
                    }
                }
                tgt.updated_at = chrono::Utc::now();
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------ traversal

    pub fn get_neighbors(
        &self,
        id: &str,
        direction: Direction,
        type_filter: Option<EdgeType>,
    ) -> Vec<&Node> {
        let mut edge_ids: Vec<&String> = Vec::new();
        if matches!(direction, Direction::Out | Direction::Both) {
            if let Some(v) = self.out_edges.get(id) {
                edge_ids.extend(v.iter());
            }
        }
        if matches!(direction, Direction::In | Direction::Both) {
            if let Some(v) = self.in_edges.get(id) {
                edge_ids.extend(v.iter());
            }
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for eid in edge_ids {
            let Some(edge) = self.edges.get(eid) else {
                continue;
            };
            if let Some(tf) = type_filter {
                if edge.edge_type != tf {
                    continue;
                }
            }
            let other = if edge.source_id == id {
                &edge.target_id
            } else {
                &edge.source_id
            };
            if seen.insert(other.clone()) {
                if let Some(n) = self.nodes.get(other) {
                    out.push(n);
                }
            }
        }
        out
    }

    /// Outgoing edges from `node_id`, sorted descending by ranking weight —
    /// the per-hop neighbor order path-score expansion walks.
    pub fn outgoing_edges_ranked(&self, node_id: &str) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self
            .out_edges
            .get(node_id)
            .into_iter()
            .flatten()
            .filter_map(|eid| self.edges.get(eid))
            .collect();
        edges.sort_by(|a, b| b.ranking_weight().partial_cmp(&a.ranking_weight()).unwrap());
        edges
    }

    /// Every edge incident to `node_id` in either direction, deduplicated —
    /// the per-hop neighbor set path-score expansion walks.
    pub fn edges_incident(&self, node_id: &str) -> Vec<&Edge> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for eid in self
            .out_edges
            .get(node_id)
            .into_iter()
            .flatten()
            .chain(self.in_edges.get(node_id).into_iter().flatten())
        {
            if seen.insert(eid.as_str()) {
                if let Some(edge) = self.edges.get(eid) {
                    out.push(edge);
                }
            }
        }
        out
    }

    /// Breadth-first expansion from a starting set, up to `depth` hops.
    pub fn bfs_expand(
        &self,
        start: &[String],
        depth: usize,
        type_filter: Option<EdgeType>,
    ) -> HashSet<String> {
        let mut visited: HashSet<String> = start.iter().cloned().collect();
        let mut frontier: Vec<String> = start.to_vec();
        for _ in 0..depth {
            let mut next = Vec::new();
            for node_id in &frontier {
                for neighbor in self.get_neighbors(node_id, Direction::Both, type_filter) {
                    if visited.insert(neighbor.id.clone()) {
                        next.push(neighbor.id.clone());
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        visited
    }

    // --------------------------------------------------------- (de)serialize

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
            memories: self.memory_index.clone(),
            node_to_memories: self
                .node_to_memories
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
                .collect(),
            metadata: SnapshotMetadata {
                version: SNAPSHOT_SCHEMA_VERSION,
                saved_at: chrono::Utc::now(),
                statistics: SnapshotStatistics {
                    node_count: self.nodes.len(),
                    edge_count: self.edges.len(),
                    memory_count: self.memory_index.len(),
                },
            },
        }
    }

    /// Rebuild from a snapshot, then reconcile memory edge lists against the
    /// global edge table (consistency rule 3, `_sync_memory_edges_from_graph`).
    pub fn restore(snapshot: GraphSnapshot) -> Self {
        let mut store = Self::new();
        for node in snapshot.nodes {
            store.add_node(node);
        }
        for edge in snapshot.edges {
            let _ = store.add_edge(edge);
        }
        for (id, owners) in snapshot.node_to_memories {
            store
                .node_to_memories
                .insert(id, owners.into_iter().collect());
        }
        store.memory_index = snapshot.memories;
        store.sync_memory_edges_from_graph();
        store
    }

    /// For every edge in the graph whose endpoints both belong to a common
    /// memory, ensure that memory's `edges` list contains it (dedup by id).
    pub fn sync_memory_edges_from_graph(&mut self) {
        let edges: Vec<Edge> = self.edges.values().cloned().collect();
        for edge in edges {
            let src_owners = self.node_to_memories.get(&edge.source_id).cloned().unwrap_or_default();
            let tgt_owners = self.node_to_memories.get(&edge.target_id).cloned().unwrap_or_default();
            for mem_id in src_owners.intersection(&tgt_owners) {
                if let Some(mem) = self.memory_index.get_mut(mem_id) {
                    if !mem.edges.iter().any(|e| e.id == edge.id) {
                        mem.edges.push(edge.clone());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeType as ET, MemoryType, NodeType};

    fn node(content: &str, ty: NodeType) -> Node {
        Node::new(content, ty)
    }

    #[test]
    fn add_edge_rejects_dangling_endpoints() {
        let mut store = GraphStore::new();
        let a = node("a", NodeType::Subject);
        let edge = Edge::new(a.id.clone(), "missing", "rel", ET::Relation);
        store.add_node(a);
        assert!(store.add_edge(edge).is_err());
    }

    #[test]
    fn remove_memory_with_cleanup_drops_orphan_nodes_and_edges() {
        let mut store = GraphStore::new();
        let subj = node("Alice", NodeType::Subject);
        let topic = node("lives_in", NodeType::Topic);
        let mut memory = Memory::new(subj.id.clone(), MemoryType::Fact, 0.8);
        let edge = Edge::new(subj.id.clone(), topic.id.clone(), "memory_type", ET::MemoryType);
        memory.nodes = vec![subj.clone(), topic.clone()];
        memory.edges = vec![edge.clone()];
        memory.status = MemoryStatus::Committed;

        store.add_memory(memory.clone()).unwrap();
        assert_eq!(store.node_count(), 2);

        store.remove_memory(&memory.id, true).unwrap();
        assert_eq!(store.node_count(), 0);
        assert!(store.get_edge(&edge.id).is_none());
    }

    #[test]
    fn remove_memory_without_cleanup_keeps_shared_node() {
        let mut store = GraphStore::new();
        let subj = node("Alice", NodeType::Subject);
        let topic1 = node("t1", NodeType::Topic);
        let topic2 = node("t2", NodeType::Topic);

        let mut m1 = Memory::new(subj.id.clone(), MemoryType::Fact, 0.5);
        m1.nodes = vec![subj.clone(), topic1.clone()];
        let mut m2 = Memory::new(subj.id.clone(), MemoryType::Fact, 0.5);
        m2.nodes = vec![subj.clone(), topic2.clone()];

        store.add_memory(m1.clone()).unwrap();
        store.add_memory(m2).unwrap();

        store.remove_memory(&m1.id, false).unwrap();
        // subj is still owned by m2, so it must survive.
        assert!(store.get_node(&subj.id).is_some());
        // unswept orphan topic1 remains present until an explicit sweep.
        assert!(store.get_node(&topic1.id).is_some());
    }

    #[test]
    fn merge_nodes_never_creates_self_loop() {
        let mut store = GraphStore::new();
        let a = node("a", NodeType::Topic);
        let b = node("b", NodeType::Topic);
        let c = node("c", NodeType::Topic);
        store.add_node(a.clone());
        store.add_node(b.clone());
        store.add_node(c.clone());
        store
            .add_edge(Edge::new(a.id.clone(), b.id.clone(), "rel", ET::Relation))
            .unwrap();
        // a -> b merges into b -> b, which must be dropped, not kept.
        store.merge_nodes(&a.id, &b.id).unwrap();
        assert!(store.get_node(&a.id).is_none());
        assert!(store.get_neighbors(&b.id, Direction::Out, None).is_empty());
    }

    #[test]
    fn bfs_expand_respects_depth() {
        let mut store = GraphStore::new();
        let a = node("a", NodeType::Topic);
        let b = node("b", NodeType::Topic);
        let c = node("c", NodeType::Topic);
        store.add_node(a.clone());
        store.add_node(b.clone());
        store.add_node(c.clone());
        store
            .add_edge(Edge::new(a.id.clone(), b.id.clone(), "r", ET::Relation))
            .unwrap();
        store
            .add_edge(Edge::new(b.id.clone(), c.id.clone(), "r", ET::Relation))
            .unwrap();

        let one_hop = store.bfs_expand(&[a.id.clone()], 1, None);
        assert!(one_hop.contains(&b.id) && !one_hop.contains(&c.id));

        let two_hop = store.bfs_expand(&[a.id.clone()], 2, None);
        assert!(two_hop.contains(&c.id));
    }

    #[test]
    fn sync_memory_edges_from_graph_repairs_drift() {
        let mut store = GraphStore::new();
        let subj = node("Alice", NodeType::Subject);
        let topic = node("t", NodeType::Topic);
        store.add_node(subj.clone());
        store.add_node(topic.clone());
        let edge = Edge::new(subj.id.clone(), topic.id.clone(), "memory_type", ET::MemoryType);
        store.add_edge(edge.clone()).unwrap();

        let mut mem = Memory::new(subj.id.clone(), MemoryType::Fact, 0.5);
        mem.nodes = vec![subj.clone(), topic.clone()];
        // Simulate schema drift: memory.edges left empty even though the
        // graph has the edge and both endpoints are owned by this memory.
        store.memory_index.insert(mem.id.clone(), mem.clone());
        store
            .node_to_memories
            .entry(subj.id.clone())
            .or_default()
            .insert(mem.id.clone());
        store
            .node_to_memories
            .entry(topic.id.clone())
            .or_default()
            .insert(mem.id.clone());

        store.sync_memory_edges_from_graph();
        let repaired = store.get_memory(&mem.id).unwrap();
        assert!(repaired.edges.iter().any(|e| e.id == edge.id));
    }
}
