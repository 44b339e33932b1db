//! Perceptual manager: per-stream message block assembly, FIFO cache, and
//! recall-driven promotion.

use crate::config::PerceptualConfig;
use chrono::{DateTime, Utc};
use engram_core::embed::EmbeddingClient;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// One inbound chat message, as an external chat-ingest adapter hands it to
/// the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub content: String,
    pub sender_id: String,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    pub stream_id: String,
}

/// A fixed-size bundle of consecutive messages from one stream, embedded as
/// one vector and subject to recall/FIFO dynamics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptualBlock {
    pub id: String,
    pub messages: Vec<IncomingMessage>,
    pub combined_text: String,
    pub embedding: Option<Vec<f32>>,
    pub recall_count: u32,
    pub position_in_stack: usize,
    pub stream_id: String,
    /// Set once `recall_count` reaches `activation_threshold`; consumed by
    /// the unified manager's background promotion to short-term.
    pub needs_transfer: bool,
    pub created_at: DateTime<Utc>,
}

/// On-disk shape of `perceptual_memory.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerceptualSnapshot {
    pub pending_messages: Vec<IncomingMessage>,
    pub blocks: Vec<PerceptualBlock>,
}

struct State {
    pending: Vec<IncomingMessage>,
    /// Index 0 is the top of the stack (most recently created or recalled).
    blocks: VecDeque<PerceptualBlock>,
}

pub struct PerceptualManager {
    state: Mutex<State>,
    embedder: EmbeddingClient,
    config: PerceptualConfig,
}

impl PerceptualManager {
    pub fn new(embedder: EmbeddingClient, config: PerceptualConfig) -> Self {
        Self {
            state: Mutex::new(State {
                pending: Vec::new(),
                blocks: VecDeque::new(),
            }),
            embedder,
            config,
        }
    }

    pub fn from_snapshot(snapshot: PerceptualSnapshot, embedder: EmbeddingClient, config: PerceptualConfig) -> Self {
        Self {
            state: Mutex::new(State {
                pending: snapshot.pending_messages,
                blocks: snapshot.blocks.into(),
            }),
            embedder,
            config,
        }
    }

    pub async fn snapshot(&self) -> PerceptualSnapshot {
        let state = self.state.lock().await;
        PerceptualSnapshot {
            pending_messages: state.pending.clone(),
            blocks: state.blocks.iter().cloned().collect(),
        }
    }

    /// Append a message; enforce TTL/capacity caps; assemble a block once a
    /// stream accumulates `block_size` pending messages. Returns the newly
    /// assembled block, if any.
    pub async fn ingest_message(&self, message: IncomingMessage) -> Option<PerceptualBlock> {
        let mut state = self.state.lock().await;
        state.pending.push(message);

        let now = Utc::now();
        let ttl = chrono::Duration::seconds(self.config.pending_ttl_secs);
        state.pending.retain(|m| now - m.timestamp <= ttl);

        if state.pending.len() > self.config.max_pending_global {
            let overflow = state.pending.len() - self.config.max_pending_global;
            state.pending.drain(0..overflow);
        }

        let stream_id = state.pending.last()?.stream_id.clone();
        let stream_count = state.pending.iter().filter(|m| m.stream_id == stream_id).count();
        if stream_count > self.config.max_pending_per_stream {
            if let Some(pos) = state.pending.iter().position(|m| m.stream_id == stream_id) {
                state.pending.remove(pos);
            }
        }

        let stream_count = state.pending.iter().filter(|m| m.stream_id == stream_id).count();
        if stream_count < self.config.block_size {
            return None;
        }

        let block_size = self.config.block_size;
        let mut slice = Vec::with_capacity(block_size);
        let mut remaining = Vec::with_capacity(state.pending.len());
        let mut taken = 0usize;
        for msg in std::mem::take(&mut state.pending) {
            if taken < block_size && msg.stream_id == stream_id {
                slice.push(msg);
                taken += 1;
            } else {
                remaining.push(msg);
            }
        }
        state.pending = remaining;

        let combined_text = slice
            .iter()
            .map(|m| format!("[{}] {}: {}", m.timestamp.format("%H:%M"), m.sender_name, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let embedding = self.embedder.embed(&combined_text);

        let block = PerceptualBlock {
            id: uuid::Uuid::new_v4().to_string(),
            messages: slice,
            combined_text,
            embedding,
            recall_count: 0,
            position_in_stack: 0,
            stream_id,
            needs_transfer: false,
            created_at: now,
        };

        state.blocks.push_front(block.clone());
        renumber(&mut state.blocks);
        while state.blocks.len() > self.config.max_blocks {
            state.blocks.pop_back();
        }

        Some(block)
    }

    /// Recall blocks whose embedding is cosine-similar to `query_embedding`
    /// at or above `recall_similarity_threshold`, incrementing each hit's
    /// `recall_count`, flagging `needs_transfer` at the activation
    /// threshold, and promoting recalled blocks to the stack top in their
    /// relative recall order.
    pub async fn recall(&self, query_embedding: &[f32], top_k: usize) -> Vec<PerceptualBlock> {
        let mut state = self.state.lock().await;
        if state.blocks.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = state
            .blocks
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.embedding.as_deref().map(|e| (i, cosine_similarity(query_embedding, e))))
            .filter(|(_, sim)| *sim >= self.config.recall_similarity_threshold)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        scored.truncate(top_k);

        let recalled_ids: Vec<String> = scored.iter().map(|(i, _)| state.blocks[*i].id.clone()).collect();
        for id in &recalled_ids {
            if let Some(block) = state.blocks.iter_mut().find(|b| &b.id == id) {
                block.recall_count += 1;
                if block.recall_count >= self.config.activation_threshold {
                    block.needs_transfer = true;
                }
            }
        }

        // Promote recalled blocks to the top, preserving their relative
        // recall-score order; everything else keeps its prior relative order.
        let mut promoted = VecDeque::new();
        for id in &recalled_ids {
            if let Some(pos) = state.blocks.iter().position(|b| &b.id == id) {
                promoted.push_back(state.blocks.remove(pos).unwrap());
            }
        }
        for block in promoted.into_iter().rev() {
            state.blocks.push_front(block);
        }
        renumber(&mut state.blocks);

        recalled_ids
            .iter()
            .filter_map(|id| state.blocks.iter().find(|b| &b.id == id).cloned())
            .collect()
    }

    /// Blocks currently flagged `needs_transfer`, without removing them —
    /// the unified manager inspects these before scheduling a background
    /// transfer.
    pub async fn blocks_needing_transfer(&self) -> Vec<PerceptualBlock> {
        self.state.lock().await.blocks.iter().filter(|b| b.needs_transfer).cloned().collect()
    }

    /// Removes a block once it has been promoted to short-term. Blocks are
    /// evicted only by recall-promotion + transfer, never by raw age.
    pub async fn remove_block(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        let before = state.blocks.len();
        state.blocks.retain(|b| b.id != id);
        renumber(&mut state.blocks);
        state.blocks.len() != before
    }

    pub async fn block_count(&self) -> usize {
        self.state.lock().await.blocks.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}

fn renumber(blocks: &mut VecDeque<PerceptualBlock>) {
    for (i, block) in blocks.iter_mut().enumerate() {
        block.position_in_stack = i;
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
