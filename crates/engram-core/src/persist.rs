//! Atomic, crash-safe JSON persistence.
//!
//! A per-path `Mutex` serializes concurrent writers: this crate is
//! synchronous, and callers share one `Store` per directory rather than
//! creating one per save.

use crate::graph::{GraphSnapshot, GraphStore, Memory, MemoryStatus, SnapshotMetadata, SnapshotStatistics};
use serde::{Deserialize, Serialize};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

const GRAPH_FILE: &str = "memory_graph.json";
const STAGED_FILE: &str = "staged_memories.json";
const BACKUPS_DIR: &str = "backups";

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize store: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to decode store: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("atomic replace of {path} exhausted {attempts} retries: {last_error}")]
    AtomicReplaceExhausted {
        path: PathBuf,
        attempts: u32,
        last_error: String,
    },
    #[error("load of {path} failed after retries and no usable backup was found")]
    RecoveryExhausted { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// On-disk shape of `staged_memories.json`: the staged-status subset of
/// memories, wrapped in the same `metadata` envelope `memory_graph.json` carries.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StagedSnapshot {
    pub metadata: SnapshotMetadata,
    pub staged_memories: Vec<Memory>,
}

/// Crash-safe on-disk store for one graph directory.
pub struct Store {
    dir: PathBuf,
    config: crate::config::PersistenceConfig,
    write_lock: Mutex<()>,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>, config: crate::config::PersistenceConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The OS-appropriate default store directory, via the standard
    /// `ProjectDirs::from(qualifier, org, app)` lookup pattern.
    pub fn default_dir() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("com", "engram", "core").ok_or_else(|| {
            PersistenceError::Io {
                path: PathBuf::new(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "could not determine project directories"),
            }
        })?;
        let data_dir = proj_dirs.data_dir().to_path_buf();
        fs::create_dir_all(&data_dir).map_err(|e| io_err(data_dir.clone(), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o700);
            let _ = fs::set_permissions(&data_dir, perms);
        }
        Ok(data_dir)
    }

    /// Serializes the graph, writes `memory_graph.json` and
    /// `staged_memories.json` atomically, then prunes old rolling backups.
    pub fn save(&self, graph: &GraphStore) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        fs::create_dir_all(&self.dir).map_err(|e| io_err(self.dir.clone(), e))?;
        fs::create_dir_all(self.dir.join(BACKUPS_DIR)).map_err(|e| io_err(self.dir.clone(), e))?;

        let snapshot = graph.snapshot();
        let graph_path = self.dir.join(GRAPH_FILE);
        self.atomic_write_json(&graph_path, &snapshot)?;

        let staged_memories: Vec<Memory> = snapshot
            .memories
            .values()
            .filter(|m| m.status == MemoryStatus::Staged)
            .cloned()
            .collect();
        let staged_snapshot = StagedSnapshot {
            metadata: SnapshotMetadata {
                version: snapshot.metadata.version,
                saved_at: snapshot.metadata.saved_at,
                statistics: SnapshotStatistics {
                    node_count: snapshot.nodes.len(),
                    edge_count: snapshot.edges.len(),
                    memory_count: staged_memories.len(),
                },
            },
            staged_memories,
        };
        let staged_path = self.dir.join(STAGED_FILE);
        self.atomic_write_json(&staged_path, &staged_snapshot)?;

        self.prune_rolling_backups()?;
        Ok(())
    }

    /// Copies the current canonical file into `backups/` with an
    /// hour-granularity timestamp; called by the auto-save loop at each
    /// hour boundary.
    pub fn create_hourly_backup(&self) -> Result<()> {
        let graph_path = self.dir.join(GRAPH_FILE);
        if !graph_path.exists() {
            return Ok(());
        }
        let stamp = Utc::now().format("%Y%m%d%H");
        let backup_path = self.dir.join(BACKUPS_DIR).join(format!("memory_graph_hourly_{stamp}.json"));
        fs::copy(&graph_path, &backup_path).map_err(|e| io_err(backup_path.clone(), e))?;
        self.prune_hourly_backups()?;
        Ok(())
    }

    /// Reads the canonical file, retrying transient failures, falling back
    /// to the most recent backup if all retries are exhausted.
    pub fn load(&self) -> Result<GraphStore> {
        let graph_path = self.dir.join(GRAPH_FILE);
        match self.read_with_retries(&graph_path) {
            Ok(snapshot) => {
                let mut store = GraphStore::restore(snapshot);
                store.sync_memory_edges_from_graph();
                Ok(store)
            }
            Err(e) => {
                tracing::warn!("{}: canonical store unreadable after retries ({}), falling back to backup", graph_path.display(), e);
                self.recover_from_backup(&graph_path)
            }
        }
    }

    fn read_with_retries(&self, path: &Path) -> Result<GraphSnapshot> {
        let mut last_err = None;
        for attempt in 0..self.config.load_retry_attempts {
            match fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<GraphSnapshot>(&raw) {
                    Ok(snapshot) => return Ok(snapshot),
                    Err(e) => last_err = Some(PersistenceError::Decode(e)),
                },
                Err(e) => last_err = Some(io_err(path.to_path_buf(), e)),
            }
            if attempt + 1 < self.config.load_retry_attempts {
                std::thread::sleep(Duration::from_millis(self.config.load_retry_backoff_ms));
            }
        }
        Err(last_err.unwrap_or(PersistenceError::RecoveryExhausted { path: path.to_path_buf() }))
    }

    fn recover_from_backup(&self, graph_path: &Path) -> Result<GraphStore> {
        let backups_dir = self.dir.join(BACKUPS_DIR);
        let mut candidates: Vec<PathBuf> = fs::read_dir(&backups_dir)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        candidates.sort_by_key(|p| fs::metadata(p).and_then(|m| m.modified()).ok());
        candidates.reverse();

        for candidate in candidates {
            if let Ok(raw) = fs::read_to_string(&candidate) {
                if let Ok(snapshot) = serde_json::from_str::<GraphSnapshot>(&raw) {
                    tracing::info!("recovered store from backup {}", candidate.display());
                    let mut store = GraphStore::restore(snapshot);
                    store.sync_memory_edges_from_graph();
                    return Ok(store);
                }
            }
        }
        tracing::warn!("no usable backup found under {}", backups_dir.display());
        Err(PersistenceError::RecoveryExhausted { path: graph_path.to_path_buf() })
    }

    fn atomic_write_json<T: serde::Serialize>(&self, target: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(PersistenceError::Serialize)?;
        let tmp_path = target.with_extension("tmp");
        fs::write(&tmp_path, &bytes).map_err(|e| io_err(tmp_path.clone(), e))?;
        self.atomic_replace(&tmp_path, target)
    }

    /// POSIX: `rename` is an atomic replace. Windows has no atomic
    /// replace-on-rename, so the original unlinks the target first and
    /// falls back to `.old`/`.bak_<HHMMSS>` staging when the unlink or
    /// rename itself fails, retrying with exponential backoff.
    fn atomic_replace(&self, tmp_path: &Path, target: &Path) -> Result<()> {
        #[cfg(not(target_os = "windows"))]
        {
            fs::rename(tmp_path, target).map_err(|e| io_err(target.to_path_buf(), e))
        }
        #[cfg(target_os = "windows")]
        {
            let mut last_error = String::new();
            for attempt in 0..self.config.max_write_retries {
                if target.exists() {
                    if fs::remove_file(target).is_err() {
                        let old_path = target.with_extension("old");
                        if fs::rename(target, &old_path).is_err() {
                            let stamp = Utc::now().format("%H%M%S");
                            let bak_path = target.with_extension(format!("bak_{stamp}"));
                            let _ = fs::rename(target, &bak_path);
                        }
                    }
                }
                match fs::rename(tmp_path, target) {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        last_error = e.to_string();
                        let backoff_ms = 50u64 * 2u64.pow(attempt);
                        std::thread::sleep(Duration::from_millis(backoff_ms));
                    }
                }
            }
            Err(PersistenceError::AtomicReplaceExhausted {
                path: target.to_path_buf(),
                attempts: self.config.max_write_retries,
                last_error,
            })
        }
    }

    /// Prunes the `.old`/`.bak_*` staging files the Windows atomic-replace
    /// fallback leaves behind, keeping the most recent `max_rolling_backups`.
    fn prune_rolling_backups(&self) -> Result<()> {
        self.prune_backups_matching(
            |name| name.ends_with(".old") || name.contains(".bak_"),
            self.config.max_rolling_backups,
        )
    }

    fn prune_hourly_backups(&self) -> Result<()> {
        self.prune_backups_matching(|name| name.starts_with("memory_graph_hourly_"), self.config.max_hourly_backups)
    }

    fn prune_backups_matching(&self, matches: impl Fn(&str) -> bool, keep: usize) -> Result<()> {
        let backups_dir = self.dir.join(BACKUPS_DIR);
        let mut entries: Vec<(PathBuf, std::time::SystemTime)> = fs::read_dir(&backups_dir)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_str().map(|n| matches(n)).unwrap_or(false))
            .filter_map(|e| e.metadata().ok().and_then(|m| m.modified().ok()).map(|t| (e.path(), t)))
            .collect();
        entries.sort_by_key(|(_, t)| *t);
        entries.reverse();
        for (path, _) in entries.into_iter().skip(keep) {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }
}

fn io_err(path: PathBuf, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io { path, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Memory as Mem, MemoryType};
    use tempfile::tempdir;

    #[test]
    fn save_then_load_roundtrips_memories() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path(), crate::config::PersistenceConfig::default());

        let mut graph = GraphStore::new();
        let memory = Mem::new("subj-1", MemoryType::Fact, 0.7);
        let id = memory.id.clone();
        graph.add_memory(memory).unwrap();

        store.save(&graph).unwrap();
        let loaded = store.load().unwrap();
        assert!(loaded.get_memory(&id).is_some());
    }

    #[test]
    fn save_writes_separate_staged_file() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path(), crate::config::PersistenceConfig::default());
        let mut graph = GraphStore::new();
        graph.add_memory(Mem::new("s", MemoryType::Fact, 0.5)).unwrap();
        store.save(&graph).unwrap();
        assert!(dir.path().join("staged_memories.json").exists());
        assert!(dir.path().join("memory_graph.json").exists());
    }

    #[test]
    fn load_recovers_from_hourly_backup_when_canonical_missing() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path(), crate::config::PersistenceConfig::default());
        let mut graph = GraphStore::new();
        let memory = Mem::new("s", MemoryType::Fact, 0.5);
        let id = memory.id.clone();
        graph.add_memory(memory).unwrap();
        store.save(&graph).unwrap();
        store.create_hourly_backup().unwrap();

        fs::remove_file(dir.path().join(GRAPH_FILE)).unwrap();
        let loaded = store.load().unwrap();
        assert!(loaded.get_memory(&id).is_some());
    }
}
