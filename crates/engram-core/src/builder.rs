//! Constructs the canonical `Memory` subgraph from extracted parameters,
//! reusing near-duplicate nodes.

use crate::config::BuilderConfig;
use crate::embed::EmbeddingClient;
use crate::extract::ExtractedMemory;
use crate::graph::{Edge, EdgeType, GraphStore, Memory, Node, NodeType};

/// Constructs `Memory` subgraphs, reusing existing SUBJECT nodes by exact
/// content match and TOPIC/OBJECT nodes by cosine similarity.
pub struct Builder<'a> {
    graph: &'a GraphStore,
    embedder: &'a EmbeddingClient,
    config: BuilderConfig,
}

impl<'a> Builder<'a> {
    pub fn new(graph: &'a GraphStore, embedder: &'a EmbeddingClient, config: BuilderConfig) -> Self {
        Self { graph, embedder, config }
    }

    /// Build a fully-formed, STAGED `Memory` from extracted parameters.
    /// Embedding failures never abort construction — the affected node is
    /// created with `embedding = None`.
    pub fn build_memory(&self, extracted: &ExtractedMemory) -> Memory {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        let subject = self.create_or_reuse_subject(&extracted.subject);
        let subject_id = subject.id.clone();
        nodes.push(subject);

        let topic = self.create_topic_node(&extracted.topic);
        let topic_id = topic.id.clone();
        nodes.push(topic);

        edges.push(Edge::new(
            subject_id.clone(),
            topic_id.clone(),
            extracted.memory_type.as_str(),
            EdgeType::MemoryType,
        ).with_importance(extracted.importance));

        if let Some(object_content) = &extracted.object {
            let object = self.create_object_node(object_content);
            let object_id = object.id.clone();
            nodes.push(object);
            edges.push(Edge::new(topic_id.clone(), object_id, "核心关系", EdgeType::CoreRelation)
                .with_importance(extracted.importance));
        }

        for (attr_name, attr_value) in &extracted.attributes {
            let (mut attr_nodes, mut attr_edges) =
                self.build_attribute(&topic_id, attr_name, attr_value, extracted.importance);
            nodes.append(&mut attr_nodes);
            edges.append(&mut attr_edges);
        }

        let mut memory = Memory::new(subject_id, extracted.memory_type, extracted.importance);
        memory.activation = crate::graph::Activation::new(self.config.initial_activation);
        memory.created_at = extracted.timestamp;
        memory.updated_at = extracted.timestamp;
        memory.last_accessed = extracted.timestamp;
        memory.nodes = nodes;
        memory.edges = edges;
        memory.metadata.insert(
            "subject".to_string(),
            serde_json::Value::String(extracted.subject.clone()),
        );
        memory.metadata.insert(
            "topic".to_string(),
            serde_json::Value::String(extracted.topic.clone()),
        );
        memory.sync_activation_metadata();
        memory
    }

    fn create_or_reuse_subject(&self, content: &str) -> Node {
        if let Some(existing) = self.find_exact_match(content, NodeType::Subject) {
            return existing;
        }
        let mut node = Node::new(content, NodeType::Subject);
        if content.trim().chars().count() >= self.config.min_embed_content_len {
            node.embedding = self.embedder.embed(content);
            node.has_vector = node.embedding.is_some();
        }
        node
    }

    fn create_topic_node(&self, content: &str) -> Node {
        let embedding = self.embedder.embed(content);
        if let Some(e) = &embedding {
            if let Some(existing) = self.find_similar(content, NodeType::Topic, e) {
                return existing;
            }
        }
        let mut node = Node::new(content, NodeType::Topic);
        node.has_vector = embedding.is_some();
        node.embedding = embedding;
        node
    }

    fn create_object_node(&self, content: &str) -> Node {
        let embedding = self.embedder.embed(content);
        if let Some(e) = &embedding {
            if let Some(existing) = self.find_similar(content, NodeType::Object, e) {
                return existing;
            }
        }
        let mut node = Node::new(content, NodeType::Object);
        node.has_vector = embedding.is_some();
        node.embedding = embedding;
        node
    }

    fn build_attribute(
        &self,
        parent_id: &str,
        attr_name: &str,
        attr_value: &str,
        importance: f32,
    ) -> (Vec<Node>, Vec<Edge>) {
        let attr_importance = importance * self.config.attribute_importance_factor;

        let attr_node = self
            .find_exact_match(attr_name, NodeType::Attribute)
            .unwrap_or_else(|| Node::new(attr_name, NodeType::Attribute));
        let attr_id = attr_node.id.clone();

        let attr_edge = Edge::new(parent_id, attr_id.clone(), "属性", EdgeType::Attribute)
            .with_importance(attr_importance);

        let mut value_node = Node::new(attr_value, NodeType::Value);
        if attr_value.trim().chars().count() >= self.config.min_embed_content_len {
            value_node.embedding = self.embedder.embed(attr_value);
            value_node.has_vector = value_node.embedding.is_some();
        }
        let value_id = value_node.id.clone();
        let value_edge = Edge::new(attr_id, value_id, "值", EdgeType::Attribute).with_importance(attr_importance);

        (vec![attr_node, value_node], vec![attr_edge, value_edge])
    }

    fn find_exact_match(&self, content: &str, node_type: NodeType) -> Option<Node> {
        self.graph
            .nodes()
            .find(|n| n.node_type == node_type && n.content == content)
            .cloned()
    }

    /// Semantic reuse: the highest-similarity node of `node_type` at or
    /// above `semantic_reuse_threshold`.
    fn find_similar(&self, _content: &str, node_type: NodeType, embedding: &[f32]) -> Option<Node> {
        let mut best: Option<(f32, &Node)> = None;
        for node in self.graph.nodes() {
            if node.node_type != node_type {
                continue;
            }
            let Some(existing_embedding) = &node.embedding else {
                continue;
            };
            let sim = cosine_similarity(embedding, existing_embedding);
            if sim >= self.config.semantic_reuse_threshold && best.map(|(b, _)| sim > b).unwrap_or(true) {
                best = Some((sim, node));
            }
        }
        best.map(|(_, n)| n.clone())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na * nb)).clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::test_support::FakeEmbedder;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn extracted(subject: &str, topic: &str, object: Option<&str>) -> ExtractedMemory {
        ExtractedMemory {
            subject: subject.to_string(),
            memory_type: crate::graph::MemoryType::Fact,
            topic: topic.to_string(),
            object: object.map(|s| s.to_string()),
            attributes: BTreeMap::new(),
            importance: 0.8,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn builds_canonical_subject_topic_shape() {
        let graph = GraphStore::new();
        let embedder = EmbeddingClient::new(Arc::new(FakeEmbedder { dims: 8 }));
        let builder = Builder::new(&graph, &embedder, BuilderConfig::default());

        let memory = builder.build_memory(&extracted("Alice", "lives_in", Some("Tokyo")));
        assert_eq!(memory.nodes.len(), 3);
        assert_eq!(memory.edges.len(), 2);
        assert_eq!(memory.importance, 0.8);
        assert!(memory.nodes.iter().any(|n| n.node_type == NodeType::Subject && n.content == "Alice"));
    }

    #[test]
    fn attributes_build_topic_attribute_value_chain() {
        let graph = GraphStore::new();
        let embedder = EmbeddingClient::new(Arc::new(FakeEmbedder { dims: 8 }));
        let builder = Builder::new(&graph, &embedder, BuilderConfig::default());

        let mut extracted = extracted("Alice", "lives_in", None);
        extracted.attributes.insert("地点".to_string(), "Tokyo".to_string());
        let memory = builder.build_memory(&extracted);

        assert!(memory.nodes.iter().any(|n| n.node_type == NodeType::Attribute));
        assert!(memory.nodes.iter().any(|n| n.node_type == NodeType::Value && n.content == "Tokyo"));
    }

    #[test]
    fn reuses_exact_match_subject_across_memories() {
        let mut graph = GraphStore::new();
        let embedder = EmbeddingClient::new(Arc::new(FakeEmbedder { dims: 8 }));
        let builder = Builder::new(&graph, &embedder, BuilderConfig::default());

        let m1 = builder.build_memory(&extracted("Alice", "lives_in", Some("Tokyo")));
        let subject_id = m1.subject_id.clone();
        graph.add_memory(m1).unwrap();

        let builder2 = Builder::new(&graph, &embedder, BuilderConfig::default());
        let m2 = builder2.build_memory(&extracted("Alice", "likes", Some("coffee")));
        assert_eq!(m2.subject_id, subject_id);
    }
}
