//! Unified retrieval coordinator: fuses perceptual recall with long-term
//! graph search, escalates low-confidence results, and schedules
//! short-term → long-term transfer batches.

use crate::config::{AutoTransferConfig, UnifiedConfig};
use crate::error::Result;
use crate::memory_manager::MemoryManager;
use crate::perceptual::{IncomingMessage, PerceptualBlock, PerceptualManager};
use crate::short_term::{RawCreateParams, ShortTermManager, StagedMemory};
use crate::transfer::TransferManager;
use chrono::{DateTime, Utc};
use engram_core::embed::EmbeddingClient;
use engram_core::tools::{ScoredMemory, SearchMemoriesParams};
use engram_core::TextCompleter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One merged hit returned by `UnifiedMemoryManager::retrieve`, tagged with
/// the tier it was found in.
#[derive(Debug, Clone)]
pub enum RetrievedMemory {
    Perceptual(PerceptualBlock),
    LongTerm(ScoredMemory),
}

/// The LLM judge's verdict on whether perceptual + short-term retrieval is
/// already sufficient, or long-term graph retrieval must run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeDecision {
    pub is_sufficient: bool,
    pub confidence: f32,
    pub reasoning: String,
    pub additional_queries: Vec<String>,
    pub missing_aspects: Vec<String>,
}

impl Default for JudgeDecision {
    fn default() -> Self {
        Self {
            is_sufficient: false,
            confidence: 0.0,
            reasoning: String::new(),
            additional_queries: Vec::new(),
            missing_aspects: Vec::new(),
        }
    }
}

impl JudgeDecision {
    /// On LLM failure, default to insufficient with `additional_queries = [query]`.
    fn insufficient_fallback(query: &str) -> Self {
        Self {
            is_sufficient: false,
            confidence: 0.0,
            reasoning: "judge unavailable, defaulting to insufficient".to_string(),
            additional_queries: vec![query.to_string()],
            missing_aspects: Vec::new(),
        }
    }
}

/// `search_memories`'s tiered result shape:
/// `{perceptual_blocks, short_term_memories, long_term_memories, judge_decision}`.
#[derive(Debug, Clone, Default)]
pub struct TieredSearchResult {
    pub perceptual_blocks: Vec<PerceptualBlock>,
    pub short_term_memories: Vec<StagedMemory>,
    pub long_term_memories: Vec<ScoredMemory>,
    pub judge_decision: Option<JudgeDecision>,
}

pub struct UnifiedMemoryManager {
    perceptual: Arc<PerceptualManager>,
    short_term: Arc<ShortTermManager>,
    long_term: Arc<MemoryManager>,
    transfer: Arc<TransferManager>,
    embedder: EmbeddingClient,
    unified_config: UnifiedConfig,
    auto_transfer: AutoTransferConfig,
    accumulated_since_flush: Mutex<usize>,
    oldest_pending_since: Mutex<Option<DateTime<Utc>>>,
    completer: Option<Arc<dyn TextCompleter>>,
}

impl UnifiedMemoryManager {
    pub fn new(
        perceptual: Arc<PerceptualManager>,
        short_term: Arc<ShortTermManager>,
        long_term: Arc<MemoryManager>,
        transfer: Arc<TransferManager>,
        embedder: EmbeddingClient,
        unified_config: UnifiedConfig,
        auto_transfer: AutoTransferConfig,
    ) -> Self {
        Self {
            perceptual,
            short_term,
            long_term,
            transfer,
            embedder,
            unified_config,
            auto_transfer,
            accumulated_since_flush: Mutex::new(0),
            oldest_pending_since: Mutex::new(None),
            completer: None,
        }
    }

    pub fn with_completer(mut self, completer: Arc<dyn TextCompleter>) -> Self {
        self.completer = Some(completer);
        self
    }

    /// Ingests one chat message. When the perceptual tier assembles a new
    /// block, the manager optimistically stages it as a short-term
    /// candidate at half importance — promotion targets stay tentative
    /// until a later recall confirms them; when a block's recall count
    /// trips `needs_transfer`, it is promoted at full confidence and
    /// evicted from the perceptual stack.
    pub async fn ingest_message(&self, message: IncomingMessage) -> Result<()> {
        let stream_id = message.stream_id.clone();
        if let Some(block) = self.perceptual.ingest_message(message).await {
            self.stage_block(&block, 0.5).await;
        }

        for block in self.perceptual.blocks_needing_transfer().await {
            self.stage_block(&block, 0.8).await;
            self.perceptual.remove_block(&block.id).await;
        }
        debug!(stream_id, "message ingested");
        self.note_accumulation().await;
        Ok(())
    }

    async fn stage_block(&self, block: &PerceptualBlock, importance: f64) {
        self.short_term.add_from_block(block, importance, vec![block.id.clone()]).await;
    }

    async fn note_accumulation(&self) {
        let mut count = self.accumulated_since_flush.lock().await;
        *count += 1;
        let mut oldest = self.oldest_pending_since.lock().await;
        if oldest.is_none() {
            *oldest = Some(Utc::now());
        }
    }

    /// Whether the adaptive auto-transfer scheduler should flush now:
    /// batch-size reached, short-term occupancy past the flush fraction, or
    /// the oldest buffered arrival has waited past `max_delay_secs`.
    pub async fn should_flush(&self) -> bool {
        let count = *self.accumulated_since_flush.lock().await;
        if count >= self.auto_transfer.flush_batch_size {
            return true;
        }
        if self.short_term.occupancy().await >= self.auto_transfer.occupancy_flush_fraction {
            return true;
        }
        if let Some(since) = *self.oldest_pending_since.lock().await {
            if (Utc::now() - since).num_seconds() as u64 >= self.auto_transfer.max_delay_secs {
                return true;
            }
        }
        false
    }

    /// Runs a transfer batch and resets the accumulation counters.
    pub async fn flush_transfer(&self) -> Result<usize> {
        let committed = self.transfer.run_batch().await?;
        *self.accumulated_since_flush.lock().await = 0;
        *self.oldest_pending_since.lock().await = None;
        info!(committed, "auto-transfer flush complete");
        Ok(committed)
    }

    /// Tiered retrieval: perceptual recall plus long-term graph search,
    /// escalating the long-term search once with deeper expansion and
    /// multi-query reformulation when its top score misses
    /// `escalation_score_threshold`.
    pub async fn retrieve(&self, query: &str, chat_history: Vec<String>) -> Result<Vec<RetrievedMemory>> {
        let mut out = Vec::new();

        if let Some(query_embedding) = self.embedder.embed(query) {
            for block in self
                .perceptual
                .recall(&query_embedding, self.unified_config.perceptual_top_k)
                .await
            {
                out.push(RetrievedMemory::Perceptual(block));
            }
        }

        let base_params = SearchMemoriesParams {
            query: query.to_string(),
            chat_history: chat_history.clone(),
            ..Default::default()
        };
        let mut hits = self.long_term.search_memories(&base_params).await?;

        let top_score = hits.first().map(|h| h.score).unwrap_or(0.0);
        if top_score < self.unified_config.escalation_score_threshold {
            debug!(top_score, "escalating long-term search: deeper expansion + multi-query");
            let escalated_params = SearchMemoriesParams {
                query: query.to_string(),
                chat_history,
                expand_depth: self.unified_config.escalated_expand_depth,
                use_multi_query: true,
                ..Default::default()
            };
            let escalated = self.long_term.search_memories(&escalated_params).await?;
            if escalated.first().map(|h| h.score).unwrap_or(0.0) > top_score {
                hits = escalated;
            }
        }

        out.extend(hits.into_iter().map(RetrievedMemory::LongTerm));
        Ok(out)
    }

    /// Asks the LLM judge whether `perceptual`+`short_term` already answer
    /// `query`, or long-term graph retrieval must run. Falls back to
    /// `JudgeDecision::insufficient_fallback` when no completer is
    /// configured, the call fails, or the response doesn't parse.
    fn judge(&self, query: &str, perceptual: &[PerceptualBlock], short_term: &[StagedMemory], chat_history: &[String]) -> JudgeDecision {
        let Some(completer) = &self.completer else {
            return JudgeDecision::insufficient_fallback(query);
        };
        let perceptual_text: Vec<&str> = perceptual.iter().map(|b| b.combined_text.as_str()).collect();
        let short_term_topics: Vec<&str> = short_term.iter().map(|m| m.params.topic.as_str()).collect();
        let prompt = format!(
            "Query: {query}\n\
             Chat history: {chat_history:?}\n\
             Perceptual recall: {perceptual_text:?}\n\
             Short-term candidates: {short_term_topics:?}\n\
             Is this enough to answer the query, or does long-term memory search need to run? \
             Respond with a JSON object: {{\"is_sufficient\": bool, \"confidence\": number, \"reasoning\": string, \
             \"additional_queries\": [string], \"missing_aspects\": [string]}}."
        );
        completer
            .complete(&prompt)
            .and_then(|response| serde_json::from_str::<JudgeDecision>(&response).ok())
            .unwrap_or_else(|| JudgeDecision::insufficient_fallback(query))
    }

    /// Re-searches long-term memory with the judge's `additional_queries`
    /// plus the original query, weighting each by geometric decay
    /// `max(0.3, 1 − 0.15·i)` and merging on `memory_id` keeping the highest
    /// weighted score seen.
    async fn manual_multi_query_search(&self, original_query: &str, additional: &[String], chat_history: &[String]) -> Result<Vec<ScoredMemory>> {
        let mut queries = vec![original_query.to_string()];
        queries.extend(additional.iter().cloned());

        let default_top_k = SearchMemoriesParams::default().top_k;
        let mut merged: HashMap<String, (f32, ScoredMemory)> = HashMap::new();
        for (i, q) in queries.iter().enumerate() {
            let weight = (1.0 - 0.15 * i as f32).max(0.3);
            let params = SearchMemoriesParams {
                query: q.clone(),
                chat_history: chat_history.to_vec(),
                expand_depth: self.unified_config.escalated_expand_depth,
                use_multi_query: false,
                ..Default::default()
            };
            for hit in self.long_term.search_memories(&params).await? {
                let weighted = hit.score * weight;
                merged
                    .entry(hit.memory_id.clone())
                    .and_modify(|(best, best_hit)| {
                        if weighted > *best {
                            *best = weighted;
                            *best_hit = hit.clone();
                        }
                    })
                    .or_insert((weighted, hit));
            }
        }

        let mut out: Vec<ScoredMemory> = merged.into_values().map(|(score, mut hit)| {
            hit.score = score;
            hit
        }).collect();
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        out.truncate(default_top_k);
        Ok(out)
    }

    /// Judge-gated tiered search: perceptual recall and short-term search
    /// run concurrently; any perceptual block
    /// flagged by `needs_transfer` is scheduled for background promotion via
    /// a fire-and-forget task rather than awaited inline. When `use_judge` is
    /// false, long-term search is skipped entirely — callers that only want
    /// the fast tiers opt out of the judge round-trip. When true, long-term
    /// search only runs if the judge says the fast tiers are insufficient.
    pub async fn search_memories(&self, query: &str, use_judge: bool, chat_history: Vec<String>) -> Result<TieredSearchResult> {
        let query_embedding = self.embedder.embed(query);

        let perceptual_fut = async {
            match &query_embedding {
                Some(embedding) => self.perceptual.recall(embedding, self.unified_config.perceptual_top_k).await,
                None => Vec::new(),
            }
        };
        let short_term_fut = async {
            match &query_embedding {
                Some(embedding) => self.short_term.search(&self.embedder, embedding, self.unified_config.perceptual_top_k).await,
                None => Vec::new(),
            }
        };
        let (perceptual_blocks, short_term_memories) = tokio::join!(perceptual_fut, short_term_fut);

        for block in self.perceptual.blocks_needing_transfer().await {
            let short_term = self.short_term.clone();
            let perceptual = self.perceptual.clone();
            tokio::spawn(async move {
                let subject = block
                    .messages
                    .first()
                    .map(|m| m.sender_name.clone())
                    .unwrap_or_else(|| block.stream_id.clone());
                short_term
                    .stage(
                        RawCreateParams {
                            subject,
                            memory_type: "EVENT".to_string(),
                            topic: block.combined_text.clone(),
                            object: None,
                            attributes: Default::default(),
                            importance: Some(0.8),
                        },
                        vec![block.id.clone()],
                    )
                    .await;
                perceptual.remove_block(&block.id).await;
            });
        }

        if !use_judge {
            return Ok(TieredSearchResult {
                perceptual_blocks,
                short_term_memories,
                long_term_memories: Vec::new(),
                judge_decision: None,
            });
        }

        let decision = self.judge(query, &perceptual_blocks, &short_term_memories, &chat_history);
        let long_term_memories = if decision.is_sufficient {
            Vec::new()
        } else {
            self.manual_multi_query_search(query, &decision.additional_queries, &chat_history).await?
        };

        Ok(TieredSearchResult {
            perceptual_blocks,
            short_term_memories,
            long_term_memories,
            judge_decision: Some(decision),
        })
    }
}
