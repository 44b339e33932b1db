//! Tier-manager configuration, layered on top of `engram_core::EngramConfig`.
//!
//! Every tunable each tier manager exposes gets a field here, following the
//! same `#[serde(default)] + impl Default` idiom as `engram_core::config`.

use engram_core::EngramConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Perceptual block assembly + recall promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptualConfig {
    /// Messages per stream that trigger a new block.
    pub block_size: usize,
    /// Max blocks kept on the stack before FIFO eviction.
    pub max_blocks: usize,
    /// Cosine-similarity floor for a block to be considered recalled.
    pub recall_similarity_threshold: f32,
    /// Recall count at which a block's `needs_transfer` flag is set.
    pub activation_threshold: u32,
    /// How long an unassembled pending message may wait before expiring.
    pub pending_ttl_secs: i64,
    /// Per-stream cap on pending (not-yet-blocked) messages.
    pub max_pending_per_stream: usize,
    /// Global cap across all streams.
    pub max_pending_global: usize,
}

impl Default for PerceptualConfig {
    fn default() -> Self {
        Self {
            block_size: 5,
            max_blocks: 50,
            recall_similarity_threshold: 0.65,
            activation_threshold: 2,
            pending_ttl_secs: 3600,
            max_pending_per_stream: 200,
            max_pending_global: 2000,
        }
    }
}

/// Short-term structured-memory tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShortTermConfig {
    pub max_memories: usize,
    /// Importance floor a short-term memory must clear to be transfer-eligible.
    pub transfer_threshold: f32,
}

impl Default for ShortTermConfig {
    fn default() -> Self {
        Self {
            max_memories: 100,
            transfer_threshold: 0.6,
        }
    }
}

/// Short-term → long-term batch transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub search_top_k: usize,
    pub batch_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            search_top_k: 5,
            batch_size: 10,
        }
    }
}

/// Activation + propagation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    pub decay_rate: f32,
    pub propagation_strength: f32,
    pub propagation_depth: usize,
    pub max_related_memories: usize,
    /// Propagation only recurses when the applied strength exceeds this.
    pub propagation_min_strength: f32,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.95,
            propagation_strength: 0.5,
            propagation_depth: 1,
            max_related_memories: 5,
            propagation_min_strength: 0.1,
        }
    }
}

/// Auto-forgetting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgettingConfig {
    pub threshold: f32,
    pub min_importance: f32,
}

impl Default for ForgettingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            min_importance: 0.8,
        }
    }
}

/// Consolidation (dedup + auto-link), with `max_embeddings_per_run`
/// controlling the embedding-backfill maintenance pass that fills in
/// embeddings for nodes left behind by an unavailable embedding backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub interval_hours: u64,
    pub time_window_hours: i64,
    pub min_importance: f32,
    pub max_batch_size: usize,
    pub similarity_threshold: f32,
    pub pre_filter_threshold: f32,
    pub max_candidates: usize,
    pub min_confidence: f32,
    pub max_embeddings_per_run: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            interval_hours: 1,
            time_window_hours: 24,
            min_importance: 0.3,
            max_batch_size: 50,
            similarity_threshold: 0.9,
            pre_filter_threshold: 0.7,
            max_candidates: 10,
            min_confidence: 0.6,
            max_embeddings_per_run: 100,
        }
    }
}

/// Unified manager's adaptive auto-transfer scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoTransferConfig {
    /// Ceiling on the adaptive interval ("<= 5 min").
    pub base_interval_secs: u64,
    /// Flush once the accumulation buffer reaches this size.
    pub flush_batch_size: usize,
    /// Flush once short-term occupancy reaches this fraction, regardless of
    /// buffer size.
    pub occupancy_flush_fraction: f32,
    /// Hard ceiling on how long a buffered memory may wait before a flush is
    /// forced, independent of occupancy.
    pub max_delay_secs: u64,
}

impl Default for AutoTransferConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: 300,
            flush_batch_size: 10,
            occupancy_flush_fraction: 0.85,
            max_delay_secs: 600,
        }
    }
}

/// Unified coordinator's tiered-retrieval merge and judge escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnifiedConfig {
    /// How many perceptual-tier recall hits to fold into a retrieval.
    pub perceptual_top_k: usize,
    /// Below this top long-term score, retry once with multi-query +
    /// deeper expansion before returning results to the caller.
    pub escalation_score_threshold: f32,
    pub escalated_expand_depth: usize,
}

impl Default for UnifiedConfig {
    fn default() -> Self {
        Self {
            perceptual_top_k: 3,
            escalation_score_threshold: 0.4,
            escalated_expand_depth: 3,
        }
    }
}

/// Auto-save scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSaveConfig {
    pub interval_secs: u64,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

/// Workspace-wide runtime configuration: `engram_core::EngramConfig` plus
/// every tier-manager tunable. Struct defaults are authoritative only in
/// the absence of explicit TOML config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    pub core: EngramConfig,
    pub perceptual: PerceptualConfig,
    pub short_term: ShortTermConfig,
    pub transfer: TransferConfig,
    pub activation: ActivationConfig,
    pub forgetting: ForgettingConfig,
    pub consolidation: ConsolidationConfig,
    pub auto_transfer: AutoTransferConfig,
    pub auto_save: AutoSaveConfig,
    pub unified: UnifiedConfig,
}

impl RuntimeConfig {
    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = std::fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tunables() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.perceptual.block_size, 5);
        assert_eq!(cfg.forgetting.min_importance, 0.8);
        assert_eq!(cfg.activation.decay_rate, 0.95);
    }

    #[test]
    fn roundtrips_through_toml() {
        let cfg = RuntimeConfig::default();
        let rendered = toml::to_string_pretty(&cfg).unwrap();
        let parsed: RuntimeConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.consolidation.similarity_threshold, cfg.consolidation.similarity_threshold);
    }
}
