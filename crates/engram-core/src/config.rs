//! TOML-loaded configuration tree for every tunable this crate exposes,
//! following a `#[serde(default)] + impl Default` idiom so a partial or
//! missing config file still produces a fully-populated struct.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Edge-type weight table for path-score expansion's per-hop ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeTypeWeights {
    pub reference: f32,
    pub attribute: f32,
    pub relation: f32,
    pub temporal: f32,
    pub default: f32,
}

impl Default for EdgeTypeWeights {
    fn default() -> Self {
        Self {
            reference: 1.3,
            attribute: 1.2,
            relation: 0.9,
            temporal: 0.7,
            default: 1.0,
        }
    }
}

/// Final-scoring weight table: `path_score * 0.50 + importance * 0.30 + recency * 0.20`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalScoringWeights {
    pub path_score: f32,
    pub importance: f32,
    pub recency: f32,
}

impl Default for FinalScoringWeights {
    fn default() -> Self {
        Self {
            path_score: 0.50,
            importance: 0.30,
            recency: 0.20,
        }
    }
}

/// Path-score expansion tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathExpansionConfig {
    pub max_hops: usize,
    pub damping_factor: f32,
    pub max_branches_per_node: usize,
    pub pruning_threshold: f32,
    pub high_score_threshold: f32,
    pub medium_score_threshold: f32,
    pub max_active_paths: usize,
    pub top_paths_retain: usize,
    pub enable_early_stop: bool,
    pub early_stop_growth_threshold: f32,
    pub max_candidate_memories: usize,
    pub min_path_count_for_memory: usize,
    pub edge_type_weights: EdgeTypeWeights,
    pub final_scoring_weights: FinalScoringWeights,
}

impl Default for PathExpansionConfig {
    fn default() -> Self {
        Self {
            max_hops: 2,
            damping_factor: 0.85,
            max_branches_per_node: 10,
            pruning_threshold: 0.9,
            high_score_threshold: 0.7,
            medium_score_threshold: 0.4,
            max_active_paths: 1000,
            top_paths_retain: 500,
            enable_early_stop: true,
            early_stop_growth_threshold: 0.1,
            max_candidate_memories: 200,
            min_path_count_for_memory: 1,
            edge_type_weights: EdgeTypeWeights::default(),
            final_scoring_weights: FinalScoringWeights::default(),
        }
    }
}

/// Vector index tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexSettings {
    pub dimensions: usize,
    pub connectivity: usize,
    pub expansion_add: usize,
    pub expansion_search: usize,
}

impl Default for VectorIndexSettings {
    fn default() -> Self {
        Self {
            dimensions: 768,
            connectivity: crate::vector::DEFAULT_CONNECTIVITY,
            expansion_add: crate::vector::DEFAULT_EXPANSION_ADD,
            expansion_search: crate::vector::DEFAULT_EXPANSION_SEARCH,
        }
    }
}

/// Builder/extractor reuse thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Cosine similarity floor for reusing an existing TOPIC/OBJECT node.
    pub semantic_reuse_threshold: f32,
    /// Minimum content length (chars) before SUBJECT/VALUE nodes are embedded.
    pub min_embed_content_len: usize,
    pub initial_activation: f32,
    /// Attribute-edge importance discount relative to the memory's importance.
    pub attribute_importance_factor: f32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            semantic_reuse_threshold: 0.95,
            min_embed_content_len: 2,
            initial_activation: 0.75,
            attribute_importance_factor: 0.8,
        }
    }
}

/// Persistence tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub auto_save_interval_secs: u64,
    pub max_rolling_backups: usize,
    pub max_hourly_backups: usize,
    pub max_write_retries: u32,
    pub retry_base_backoff_ms: u64,
    pub load_retry_attempts: u32,
    pub load_retry_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            auto_save_interval_secs: 300,
            max_rolling_backups: 3,
            max_hourly_backups: 10,
            max_write_retries: 5,
            retry_base_backoff_ms: 50,
            load_retry_attempts: 3,
            load_retry_backoff_ms: 100,
        }
    }
}

/// Top-level config tree for `engram-core`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngramConfig {
    pub vector: VectorIndexSettings,
    pub path_expansion: PathExpansionConfig,
    pub builder: BuilderConfig,
    pub persistence: PersistenceConfig,
}

impl EngramConfig {
    /// Load from a TOML file, falling back to `Default` for any key (or the
    /// whole file) that is missing — defaults are authoritative only in the
    /// absence of explicit config.
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
        let rendered = toml::to_string_pretty(self)?;
        std::fs::write(path, rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_path_expansion_table() {
        let cfg = PathExpansionConfig::default();
        assert_eq!(cfg.max_hops, 2);
        assert_eq!(cfg.damping_factor, 0.85);
        assert_eq!(cfg.pruning_threshold, 0.9);
        assert_eq!(cfg.final_scoring_weights.path_score, 0.50);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = EngramConfig::load_from("/nonexistent/path/engram.toml").unwrap();
        assert_eq!(cfg.vector.dimensions, 768);
    }

    #[test]
    fn roundtrip_through_toml() {
        let cfg = EngramConfig::default();
        let rendered = toml::to_string_pretty(&cfg).unwrap();
        let parsed: EngramConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.path_expansion.max_hops, cfg.path_expansion.max_hops);
    }
}
