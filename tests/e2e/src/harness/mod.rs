//! Test harness: an isolated, temp-dir-backed `MemorySystem` per test.

use engram_core::testing::FakeEmbedder;
use engram_runtime::{MemorySystem, RuntimeConfig};
use std::sync::Arc;
use tempfile::TempDir;

/// Owns a `MemorySystem` backed by a scratch directory that is deleted when
/// the test finishes. Uses a deterministic fake embedder so similarity
/// assertions don't depend on a real embedding backend.
pub struct TestSystem {
    pub system: MemorySystem,
    _temp_dir: TempDir,
}

impl TestSystem {
    pub async fn new() -> Self {
        Self::with_config(RuntimeConfig::default()).await
    }

    pub async fn with_config(config: RuntimeConfig) -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let system = MemorySystem::start(config, Arc::new(FakeEmbedder { dims: 16 }), None, Some(temp_dir.path().to_path_buf()))
            .await
            .unwrap();
        Self {
            system,
            _temp_dir: temp_dir,
        }
    }

    pub fn data_dir(&self) -> std::path::PathBuf {
        self._temp_dir.path().to_path_buf()
    }
}
