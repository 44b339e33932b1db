//! Short-term structured-memory tier: a staging buffer of extracted-but-not-
//! yet-graphed memories.

use crate::config::ShortTermConfig;
use crate::perceptual::PerceptualBlock;
use chrono::{DateTime, Utc};
use engram_core::{CreateMemoryParams, EmbeddingClient, TextCompleter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One not-yet-committed memory candidate, produced by perceptual-block
/// promotion or direct `create_memory` calls that haven't cleared the
/// transfer threshold yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedMemory {
    pub id: String,
    pub params: RawCreateParams,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub source_block_ids: Vec<String>,
}

/// `CreateMemoryParams` isn't `Serialize` (it's a pure tool-call payload in
/// `engram-core`); this is its on-disk-safe mirror.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCreateParams {
    pub subject: String,
    pub memory_type: String,
    pub topic: String,
    pub object: Option<String>,
    pub attributes: std::collections::BTreeMap<String, String>,
    pub importance: Option<f64>,
}

impl From<RawCreateParams> for CreateMemoryParams {
    fn from(p: RawCreateParams) -> Self {
        CreateMemoryParams {
            subject: p.subject,
            memory_type: p.memory_type,
            topic: p.topic,
            object: p.object,
            attributes: p.attributes,
            importance: p.importance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShortTermSnapshot {
    pub staged: Vec<StagedMemory>,
}

pub struct ShortTermManager {
    staged: Mutex<Vec<StagedMemory>>,
    config: ShortTermConfig,
    completer: Option<Arc<dyn TextCompleter>>,
}

/// The structured fields an LLM formatting call returns for one perceptual
/// block. Any field it omits or garbles falls back to the deterministic
/// defaults `ShortTermManager::block_fallback_params` would have produced.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct BlockFormat {
    subject: Option<String>,
    topic: Option<String>,
    content: Option<String>,
    object: Option<String>,
    memory_type: Option<String>,
    importance: Option<f64>,
    attributes: std::collections::BTreeMap<String, String>,
}

impl ShortTermManager {
    pub fn new(config: ShortTermConfig) -> Self {
        Self {
            staged: Mutex::new(Vec::new()),
            config,
            completer: None,
        }
    }

    pub fn with_completer(mut self, completer: Arc<dyn TextCompleter>) -> Self {
        self.completer = Some(completer);
        self
    }

    pub fn from_snapshot(snapshot: ShortTermSnapshot, config: ShortTermConfig) -> Self {
        Self {
            staged: Mutex::new(snapshot.staged),
            config,
            completer: None,
        }
    }

    pub async fn snapshot(&self) -> ShortTermSnapshot {
        ShortTermSnapshot {
            staged: self.staged.lock().await.clone(),
        }
    }

    /// Stage a memory candidate. When the buffer is at capacity, the lowest
    /// importance entry is evicted to make room — least-durable candidates
    /// are the ones the short-term tier is allowed to lose.
    pub async fn stage(&self, params: RawCreateParams, source_block_ids: Vec<String>) -> StagedMemory {
        let importance = params.importance.map(|v| v.clamp(0.0, 1.0) as f32).unwrap_or(0.5);
        let memory = StagedMemory {
            id: uuid::Uuid::new_v4().to_string(),
            params,
            importance,
            created_at: Utc::now(),
            source_block_ids,
        };

        let mut staged = self.staged.lock().await;
        staged.push(memory.clone());
        if staged.len() > self.config.max_memories {
            if let Some((idx, _)) = staged
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.importance.partial_cmp(&b.importance).unwrap())
            {
                staged.remove(idx);
            }
        }
        memory
    }

    /// Promotes one perceptual block into a staged memory, asking the LLM
    /// completer to format its raw messages into structured fields. Falls
    /// back to a deterministic extraction (first sender as subject, combined
    /// text as topic, `EVENT` type) when there's no completer or its
    /// response can't be parsed.
    pub async fn add_from_block(&self, block: &PerceptualBlock, importance: f64, source_block_ids: Vec<String>) -> StagedMemory {
        let params = match &self.completer {
            Some(completer) => self.format_block(completer.as_ref(), block, importance).unwrap_or_else(|| Self::block_fallback_params(block, importance)),
            None => Self::block_fallback_params(block, importance),
        };
        self.stage(params, source_block_ids).await
    }

    fn format_block(&self, completer: &dyn TextCompleter, block: &PerceptualBlock, importance: f64) -> Option<RawCreateParams> {
        let prompt = format!(
            "Format this burst of chat messages into a structured memory. Respond with a JSON object \
             with keys content, subject, topic, object, memory_type, importance, attributes. \
             memory_type should be one of EVENT, FACT, RELATION, OPINION. Messages: {:?}",
            block.messages.iter().map(|m| format!("{}: {}", m.sender_name, m.content)).collect::<Vec<_>>(),
        );
        let response = completer.complete(&prompt)?;
        let parsed: BlockFormat = serde_json::from_str(&response).ok()?;

        let fallback = Self::block_fallback_params(block, importance);
        Some(RawCreateParams {
            subject: parsed.subject.filter(|s| !s.is_empty()).unwrap_or(fallback.subject),
            memory_type: parsed.memory_type.filter(|s| !s.is_empty()).unwrap_or(fallback.memory_type),
            topic: parsed.topic.or(parsed.content).filter(|s| !s.is_empty()).unwrap_or(fallback.topic),
            object: parsed.object.or(fallback.object),
            attributes: if parsed.attributes.is_empty() { fallback.attributes } else { parsed.attributes },
            importance: parsed.importance.or(fallback.importance),
        })
    }

    /// The formatting used when no completer is wired up or the LLM's
    /// response doesn't parse: first sender as subject, combined block text
    /// as topic, tagged as an `EVENT`.
    fn block_fallback_params(block: &PerceptualBlock, importance: f64) -> RawCreateParams {
        let subject = block
            .messages
            .first()
            .map(|m| m.sender_name.clone())
            .unwrap_or_else(|| block.stream_id.clone());
        RawCreateParams {
            subject,
            memory_type: "EVENT".to_string(),
            topic: block.combined_text.clone(),
            object: None,
            attributes: Default::default(),
            importance: Some(importance),
        }
    }

    /// Candidates whose importance clears `transfer_threshold`, oldest first
    /// — the order `TransferManager` drains them in.
    pub async fn transfer_eligible(&self, limit: usize) -> Vec<StagedMemory> {
        let staged = self.staged.lock().await;
        let mut eligible: Vec<StagedMemory> = staged
            .iter()
            .filter(|m| m.importance >= self.config.transfer_threshold)
            .cloned()
            .collect();
        eligible.sort_by_key(|m| m.created_at);
        eligible.truncate(limit);
        eligible
    }

    pub async fn remove(&self, id: &str) -> bool {
        let mut staged = self.staged.lock().await;
        let before = staged.len();
        staged.retain(|m| m.id != id);
        staged.len() != before
    }

    pub async fn count(&self) -> usize {
        self.staged.lock().await.len()
    }

    pub async fn occupancy(&self) -> f32 {
        let count = self.count().await;
        count as f32 / self.config.max_memories.max(1) as f32
    }

    /// Semantic search over staged content, using cosine similarity against
    /// an embedding computed for the query. Content isn't pre-embedded at
    /// stage time — the tier is small and short-lived, so re-embedding each
    /// candidate at query time keeps `StagedMemory`'s on-disk shape simple
    /// and avoids a second embedding cache to keep consistent with
    /// staged-memory mutation.
    pub async fn search(&self, embedder: &EmbeddingClient, query_embedding: &[f32], top_k: usize) -> Vec<StagedMemory> {
        let staged = self.staged.lock().await;
        let mut scored: Vec<(f32, StagedMemory)> = staged
            .iter()
            .filter_map(|m| {
                let content = format!("{} {} {}", m.params.subject, m.params.topic, m.params.object.clone().unwrap_or_default());
                embedder.embed(&content).map(|e| (cosine_similarity(query_embedding, &e), m.clone()))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
        scored.truncate(top_k);
        scored.into_iter().map(|(_, m)| m).collect()
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
        (dot / (na * nb)).clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(subject: &str, importance: f64) -> RawCreateParams {
        RawCreateParams {
            subject: subject.to_string(),
            memory_type: "FACT".to_string(),
            topic: "likes".to_string(),
            object: Some("coffee".to_string()),
            importance: Some(importance),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn staged_memory_below_threshold_is_not_transfer_eligible() {
        let mgr = ShortTermManager::new(ShortTermConfig {
            transfer_threshold: 0.6,
            ..Default::default()
        });
        mgr.stage(params("Alice", 0.3), vec![]).await;
        assert!(mgr.transfer_eligible(10).await.is_empty());
    }

    #[tokio::test]
    async fn staged_memory_above_threshold_is_eligible_oldest_first() {
        let mgr = ShortTermManager::new(ShortTermConfig {
            transfer_threshold: 0.5,
            ..Default::default()
        });
        mgr.stage(params("Alice", 0.9), vec![]).await;
        mgr.stage(params("Bob", 0.7), vec![]).await;
        let eligible = mgr.transfer_eligible(10).await;
        assert_eq!(eligible.len(), 2);
        assert_eq!(eligible[0].params.subject, "Alice");
    }

    #[tokio::test]
    async fn capacity_overflow_evicts_lowest_importance() {
        let mgr = ShortTermManager::new(ShortTermConfig {
            max_memories: 2,
            transfer_threshold: 1.1,
            ..Default::default()
        });
        mgr.stage(params("Alice", 0.9), vec![]).await;
        mgr.stage(params("Bob", 0.1), vec![]).await;
        mgr.stage(params("Carol", 0.5), vec![]).await;
        assert_eq!(mgr.count().await, 2);
    }

    #[tokio::test]
    async fn remove_drops_staged_memory() {
        let mgr = ShortTermManager::new(ShortTermConfig::default());
        let staged = mgr.stage(params("Alice", 0.9), vec![]).await;
        assert!(mgr.remove(&staged.id).await);
        assert_eq!(mgr.count().await, 0);
    }

    #[tokio::test]
    async fn search_ranks_closer_content_first() {
        use engram_core::testing::FakeEmbedder;
        use std::sync::Arc;

        let mgr = ShortTermManager::new(ShortTermConfig::default());
        mgr.stage(params("Alice", 0.9), vec![]).await;
        let mut other = params("Bob", 0.9);
        other.topic = "dislikes_mushrooms".to_string();
        other.object = Some("mushrooms".to_string());
        mgr.stage(other, vec![]).await;

        let embedder = EmbeddingClient::new(Arc::new(FakeEmbedder { dims: 8 }));
        let query = embedder.embed("Alice likes coffee").unwrap();
        let results = mgr.search(&embedder, &query, 1).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].params.subject, "Alice");
    }

    fn sample_block() -> PerceptualBlock {
        PerceptualBlock {
            id: "block-1".to_string(),
            messages: vec![crate::perceptual::IncomingMessage {
                content: "let's ship the roadmap doc".to_string(),
                sender_id: "alice-id".to_string(),
                sender_name: "Alice".to_string(),
                timestamp: Utc::now(),
                stream_id: "stream-1".to_string(),
            }],
            combined_text: "Alice: let's ship the roadmap doc".to_string(),
            embedding: None,
            recall_count: 0,
            position_in_stack: 0,
            stream_id: "stream-1".to_string(),
            needs_transfer: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn add_from_block_without_completer_uses_deterministic_fallback() {
        let mgr = ShortTermManager::new(ShortTermConfig::default());
        let staged = mgr.add_from_block(&sample_block(), 0.5, vec!["block-1".to_string()]).await;
        assert_eq!(staged.params.subject, "Alice");
        assert_eq!(staged.params.memory_type, "EVENT");
        assert_eq!(staged.params.topic, "Alice: let's ship the roadmap doc");
        assert_eq!(staged.source_block_ids, vec!["block-1".to_string()]);
    }

    struct FixedCompleter(String);

    impl engram_core::TextCompleter for FixedCompleter {
        fn complete(&self, _prompt: &str) -> Option<String> {
            Some(self.0.clone())
        }
    }

    #[tokio::test]
    async fn add_from_block_with_completer_uses_llm_formatted_fields() {
        let mgr = ShortTermManager::new(ShortTermConfig::default()).with_completer(std::sync::Arc::new(FixedCompleter(
            r#"{"subject": "Alice", "topic": "roadmap shipping plan", "memory_type": "FACT", "importance": 0.75}"#.to_string(),
        )));

        let staged = mgr.add_from_block(&sample_block(), 0.5, vec!["block-1".to_string()]).await;
        assert_eq!(staged.params.subject, "Alice");
        assert_eq!(staged.params.memory_type, "FACT");
        assert_eq!(staged.params.topic, "roadmap shipping plan");
        assert_eq!(staged.importance, 0.75);
    }

    #[tokio::test]
    async fn add_from_block_falls_back_when_completer_response_is_unparseable() {
        let mgr = ShortTermManager::new(ShortTermConfig::default()).with_completer(std::sync::Arc::new(FixedCompleter("not json".to_string())));

        let staged = mgr.add_from_block(&sample_block(), 0.5, vec!["block-1".to_string()]).await;
        assert_eq!(staged.params.subject, "Alice");
        assert_eq!(staged.params.memory_type, "EVENT");
        assert_eq!(staged.params.topic, "Alice: let's ship the roadmap doc");
    }
}
