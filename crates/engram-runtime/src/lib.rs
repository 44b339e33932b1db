//! `engram-runtime`: the async event loop wrapping `engram-core`'s sync
//! engine with the three-tier memory system's public surface — background
//! maintenance, auto-save, and auto-transfer running across three
//! cooperating tiers.

pub mod config;
pub mod error;
pub mod memory_manager;
pub mod perceptual;
pub mod short_term;
pub mod transfer;
pub mod unified;

pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
pub use memory_manager::MemoryManager;
pub use perceptual::{IncomingMessage, PerceptualBlock, PerceptualManager};
pub use short_term::{RawCreateParams, ShortTermManager, StagedMemory};
pub use transfer::TransferManager;
pub use unified::{JudgeDecision, RetrievedMemory, TieredSearchResult, UnifiedMemoryManager};

use engram_core::embed::{Embedder, TextCompleter};
use engram_core::tools::{ScoredMemory, SearchMemoriesParams};
use engram_core::vector::VectorIndexConfig;
use engram_core::{CreateMemoryParams, Edge, EmbeddingClient, Memory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const PERCEPTUAL_FILE: &str = "perceptual_memory.json";
const SHORT_TERM_FILE: &str = "short_term_memories.json";

/// The facade an embedding chat-agent links against: owns every tier
/// manager, persists them under one data directory, and runs the
/// background maintenance/auto-save/auto-transfer loops for as long as it
/// is alive.
pub struct MemorySystem {
    perceptual: Arc<PerceptualManager>,
    short_term: Arc<ShortTermManager>,
    long_term: Arc<MemoryManager>,
    unified: Arc<UnifiedMemoryManager>,
    graph_store: engram_core::PersistenceStore,
    data_dir: PathBuf,
    cancellation: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MemorySystem {
    /// Loads any existing snapshot under `data_dir` (or the OS default
    /// project directory if `None`), constructs every tier manager, and
    /// spawns the background maintenance/auto-save/auto-transfer loops.
    pub async fn start(
        config: RuntimeConfig,
        embedder: Arc<dyn Embedder>,
        completer: Option<Arc<dyn TextCompleter>>,
        data_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => engram_core::PersistenceStore::default_dir()?,
        };

        let embedding_client = EmbeddingClient::new(embedder);
        let graph_store = engram_core::PersistenceStore::new(data_dir.clone(), config.core.persistence.clone());

        let loaded_graph = match graph_store.load() {
            Ok(store) => Some(store.snapshot()),
            Err(err) => {
                info!(error = %err, "no existing long-term graph found, starting fresh");
                None
            }
        };
        let perceptual_snapshot = read_json::<perceptual::PerceptualSnapshot>(&data_dir.join(PERCEPTUAL_FILE)).unwrap_or_default();
        let short_term_snapshot = read_json::<short_term::ShortTermSnapshot>(&data_dir.join(SHORT_TERM_FILE)).unwrap_or_default();

        let vector_dims = config.core.vector.dimensions;
        let long_term = Arc::new(MemoryManager::new(
            embedding_client.clone(),
            completer.clone(),
            config.core.builder.clone(),
            config.core.path_expansion.clone(),
            VectorIndexConfig::new(vector_dims),
            config.activation.clone(),
            config.forgetting.clone(),
            config.consolidation.clone(),
        )?);
        if let Some(snapshot) = loaded_graph {
            long_term.restore(snapshot).await;
        }

        let perceptual = Arc::new(PerceptualManager::from_snapshot(perceptual_snapshot, embedding_client.clone(), config.perceptual.clone()));
        let mut short_term_mgr = ShortTermManager::from_snapshot(short_term_snapshot, config.short_term.clone());
        if let Some(completer) = completer.clone() {
            short_term_mgr = short_term_mgr.with_completer(completer);
        }
        let short_term = Arc::new(short_term_mgr);
        let mut transfer = TransferManager::new(short_term.clone(), long_term.clone(), config.transfer.clone());
        if let Some(completer) = completer.clone() {
            transfer = transfer.with_completer(completer);
        }
        let transfer = Arc::new(transfer);
        let mut unified = UnifiedMemoryManager::new(
            perceptual.clone(),
            short_term.clone(),
            long_term.clone(),
            transfer.clone(),
            embedding_client,
            config.unified.clone(),
            config.auto_transfer.clone(),
        );
        if let Some(completer) = completer {
            unified = unified.with_completer(completer);
        }
        let unified = Arc::new(unified);

        let cancellation = CancellationToken::new();
        let tasks = spawn_background_tasks(&config, &long_term, &unified, &graph_store, &perceptual, &short_term, &data_dir, &cancellation);

        Ok(Self {
            perceptual,
            short_term,
            long_term,
            unified,
            graph_store,
            data_dir,
            cancellation,
            tasks,
        })
    }

    pub async fn create_memory(&self, params: CreateMemoryParams) -> Result<Memory> {
        let memory = self.long_term.create_memory(params).await?;
        self.long_term.commit(&memory.id).await?;
        Ok(memory)
    }

    pub async fn link_memories(
        &self,
        source_description: &str,
        target_description: &str,
        relation_type: &str,
        importance: Option<f64>,
    ) -> Result<Edge> {
        self.long_term
            .link_memories(source_description, target_description, relation_type, importance)
            .await
    }

    pub async fn search_memories(&self, params: &SearchMemoriesParams) -> Result<Vec<ScoredMemory>> {
        self.long_term.search_memories(params).await
    }

    /// Mutates an existing memory's importance and/or metadata.
    pub async fn update_memory(
        &self,
        id: &str,
        importance: Option<f64>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Memory> {
        self.long_term.update_memory(id, importance, metadata).await
    }

    /// Hard delete, orphan cleanup always on.
    pub async fn delete_memory(&self, id: &str) -> Result<bool> {
        self.long_term.delete_memory(id).await
    }

    /// Bumps a memory's activation level by `strength`, propagating to
    /// related memories.
    pub async fn activate_memory(&self, id: &str, strength: f32) -> Result<()> {
        self.long_term.activate(id, strength).await
    }

    /// Removes a memory, optionally sweeping nodes it exclusively owned.
    pub async fn forget_memory(&self, id: &str, cleanup_orphans: bool) -> Result<bool> {
        self.long_term.forget_memory(id, cleanup_orphans).await
    }

    pub async fn ingest_message(&self, message: IncomingMessage) -> Result<()> {
        self.unified.ingest_message(message).await
    }

    pub async fn retrieve(&self, query: &str, chat_history: Vec<String>) -> Result<Vec<RetrievedMemory>> {
        self.unified.retrieve(query, chat_history).await
    }

    /// Judge-gated tiered retrieval: perceptual and short-term recall
    /// always run; long-term graph search only runs
    /// when `use_judge` is false (unconditional) or the LLM judge decides
    /// the faster tiers are insufficient.
    pub async fn search_memories_tiered(&self, query: &str, use_judge: bool, chat_history: Vec<String>) -> Result<TieredSearchResult> {
        self.unified.search_memories(query, use_judge, chat_history).await
    }

    /// Runs one activation-decay + auto-forget sweep immediately, without
    /// waiting for the maintenance loop's interval. Returns the number of
    /// memories forgotten.
    pub async fn run_forgetting(&self) -> Result<usize> {
        self.long_term.decay_and_forget().await
    }

    /// Runs one dedup-consolidation pass immediately. Returns the number of
    /// memories merged.
    pub async fn run_consolidation(&self) -> Result<usize> {
        self.long_term.consolidate().await
    }

    /// Runs one short-term → long-term transfer batch immediately. Returns
    /// the number of memories committed.
    pub async fn run_transfer(&self) -> Result<usize> {
        self.unified.flush_transfer().await
    }

    /// Runs one embedding-backfill pass immediately. Returns the number of
    /// nodes embedded.
    pub async fn run_embedding_backfill(&self) -> Result<usize> {
        self.long_term.backfill_missing_embeddings().await
    }

    pub async fn memory_count(&self) -> usize {
        self.long_term.memory_count().await
    }

    pub async fn short_term_count(&self) -> usize {
        self.short_term.count().await
    }

    pub async fn perceptual_block_count(&self) -> usize {
        self.perceptual.block_count().await
    }

    /// Forces an immediate save of all three tiers to disk, independent of
    /// the auto-save loop's schedule.
    pub async fn save(&self) -> Result<()> {
        save_all(&self.graph_store, &self.long_term, &self.perceptual, &self.short_term, &self.data_dir).await
    }

    /// Cancels background tasks, waits for them to wind down, and performs
    /// one last save — the final save on shutdown is not optional.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancellation.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.save().await
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_background_tasks(
    config: &RuntimeConfig,
    long_term: &Arc<MemoryManager>,
    unified: &Arc<UnifiedMemoryManager>,
    graph_store: &engram_core::PersistenceStore,
    perceptual: &Arc<PerceptualManager>,
    short_term: &Arc<ShortTermManager>,
    data_dir: &Path,
    cancellation: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();

    // Maintenance loop: activation decay + auto-forget, then consolidation.
    {
        let long_term = long_term.clone();
        let token = cancellation.clone();
        let interval = Duration::from_secs(config.consolidation.interval_hours.max(1) * 3600);
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = long_term.decay_and_forget().await {
                            error!(error = %err, "auto-forget pass failed");
                        }
                        if let Err(err) = long_term.consolidate().await {
                            error!(error = %err, "consolidation pass failed");
                        }
                        if let Err(err) = long_term.backfill_missing_embeddings().await {
                            error!(error = %err, "embedding backfill pass failed");
                        }
                    }
                }
            }
        }));
    }

    // Auto-transfer loop: polls the adaptive flush condition at a fixed
    // short cadence so batch-size/occupancy/max-delay triggers are caught
    // promptly, while the actual flush stays rate-limited by those triggers.
    {
        let unified = unified.clone();
        let token = cancellation.clone();
        let poll_interval = Duration::from_secs(config.auto_transfer.base_interval_secs.min(30).max(1));
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {
                        if unified.should_flush().await {
                            if let Err(err) = unified.flush_transfer().await {
                                error!(error = %err, "auto-transfer flush failed");
                            }
                        }
                    }
                }
            }
        }));
    }

    // Auto-save loop: periodic full save plus hourly backup rotation.
    {
        let graph_store_dir = data_dir.to_path_buf();
        let persistence_config = config.core.persistence.clone();
        let long_term = long_term.clone();
        let perceptual = perceptual.clone();
        let short_term = short_term.clone();
        let token = cancellation.clone();
        let interval = Duration::from_secs(config.auto_save.interval_secs.max(1));
        tasks.push(tokio::spawn(async move {
            let store = engram_core::PersistenceStore::new(graph_store_dir.clone(), persistence_config);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = save_all(&store, &long_term, &perceptual, &short_term, &graph_store_dir).await {
                            error!(error = %err, "auto-save failed");
                        }
                        if let Err(err) = store.create_hourly_backup() {
                            error!(error = %err, "hourly backup failed");
                        }
                    }
                }
            }
        }));
    }

    tasks
}

async fn save_all(
    graph_store: &engram_core::PersistenceStore,
    long_term: &Arc<MemoryManager>,
    perceptual: &Arc<PerceptualManager>,
    short_term: &Arc<ShortTermManager>,
    data_dir: &Path,
) -> Result<()> {
    let snapshot = long_term.snapshot().await;
    let graph = engram_core::graph::GraphStore::restore(snapshot);
    graph_store.save(&graph)?;

    write_json(&data_dir.join(PERCEPTUAL_FILE), &perceptual.snapshot().await)?;
    write_json(&data_dir.join(SHORT_TERM_FILE), &short_term.snapshot().await)?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::testing::FakeEmbedder;

    #[tokio::test]
    async fn start_then_shutdown_persists_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let system = MemorySystem::start(
            RuntimeConfig::default(),
            Arc::new(FakeEmbedder { dims: 8 }),
            None,
            Some(dir.path().to_path_buf()),
        )
        .await
        .unwrap();

        let memory = system
            .create_memory(CreateMemoryParams {
                subject: "Alice".to_string(),
                memory_type: "FACT".to_string(),
                topic: "likes".to_string(),
                object: Some("coffee".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!memory.id.is_empty());

        system.shutdown().await.unwrap();
        assert!(dir.path().join("memory_graph.json").exists());
    }
}
