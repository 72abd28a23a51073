// src/checkpoint/store.rs

use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::checkpoint::Checkpoint;
use crate::errors::{Result, TunedagError};
use crate::types::CheckpointStorageMode;

/// Abstract checkpoint persistence.
///
/// The engine only saves through this trait; deciding where checkpoints
/// live is left to the implementation.
pub trait CheckpointStore: Send + Sync + Debug {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    fn load(&self, id: &str) -> Result<Checkpoint>;

    /// All stored checkpoints, oldest first.
    fn list(&self) -> Result<Vec<Checkpoint>>;

    /// Most recent checkpoint of one execution.
    fn latest_for(&self, execution_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|cp| cp.execution_id == execution_id)
            .last())
    }
}

/// Build the store selected by `[config] checkpoint_storage`.
pub fn build_store(mode: CheckpointStorageMode, dir: impl Into<PathBuf>) -> Arc<dyn CheckpointStore> {
    match mode {
        CheckpointStorageMode::Memory => Arc::new(InMemoryCheckpointStore::new()),
        CheckpointStorageMode::File => Arc::new(FileCheckpointStore::new(dir)),
    }
}

/// Checkpoints kept in memory only (lost on restart).
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<Mutex<Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_lock<T>(&self, f: impl FnOnce(&mut Vec<Checkpoint>) -> T) -> Result<T> {
        let mut guard = self
            .checkpoints
            .lock()
            .map_err(|_| TunedagError::Checkpoint("checkpoint store lock poisoned".to_string()))?;
        Ok(f(&mut guard))
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.with_lock(|all| {
            all.retain(|cp| cp.id != checkpoint.id);
            all.push(checkpoint.clone());
        })
    }

    fn load(&self, id: &str) -> Result<Checkpoint> {
        self.with_lock(|all| all.iter().find(|cp| cp.id == id).cloned())?
            .ok_or_else(|| TunedagError::Checkpoint(format!("no checkpoint with id '{id}'")))
    }

    fn list(&self) -> Result<Vec<Checkpoint>> {
        self.with_lock(|all| all.clone())
    }
}

/// One pretty-printed JSON file per checkpoint under a directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(TunedagError::Checkpoint(format!(
                "invalid checkpoint id '{id}'"
            )));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    /// Read a checkpoint file from an arbitrary path (e.g. `--resume`).
    pub fn read_path(path: &Path) -> Result<Checkpoint> {
        let raw = fs::read_to_string(path)?;
        Checkpoint::from_json(&raw).map_err(|e| {
            TunedagError::Checkpoint(format!("reading {}: {e}", path.display()))
        })
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path_for(&checkpoint.id)?;
        fs::create_dir_all(&self.dir)?;

        // Write then rename so a crash never leaves a truncated checkpoint.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, checkpoint.to_json()?)?;
        fs::rename(&tmp, &path)?;

        debug!(checkpoint = %checkpoint.id, path = %path.display(), "checkpoint written");
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Checkpoint> {
        let path = self.path_for(id)?;
        if !path.is_file() {
            return Err(TunedagError::Checkpoint(format!(
                "no checkpoint with id '{id}' in {}",
                self.dir.display()
            )));
        }
        Self::read_path(&path)
    }

    fn list(&self) -> Result<Vec<Checkpoint>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut checkpoints = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_path(&path) {
                Ok(cp) => checkpoints.push(cp),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint file"),
            }
        }
        checkpoints.sort_by_key(|cp| cp.created_at);
        Ok(checkpoints)
    }
}
