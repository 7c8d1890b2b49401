//! Workflow state persistence
//!
//! Run records are keyed by run ID. [`FileStore`] keeps one pretty-printed
//! JSON document per run so records can be inspected or edited between
//! steps; [`MemoryStore`] is the in-process equivalent. [`StateManager`]
//! adds per-run locking on top of either.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::state::WorkflowState;
use crate::{Error, Result};

const FILE_PREFIX: &str = "workflow_context_";
const FILE_SUFFIX: &str = ".json";

/// Keyed storage for run records
///
/// `save` must be atomic per key: a concurrent `load` sees either the old
/// record or the new one, never a partial write.
pub trait StateStore: Send + Sync {
    /// Load a run record, `Error::NotFound` if there is none
    fn load(&self, run_id: &str) -> Result<WorkflowState>;

    /// Replace the run record
    fn save(&self, run_id: &str, state: &WorkflowState) -> Result<()>;

    fn exists(&self, run_id: &str) -> bool;

    /// All stored run IDs, sorted
    fn list(&self) -> Result<Vec<String>>;
}

fn not_found(run_id: &str) -> Error {
    Error::NotFound(format!("Workflow run {}", run_id))
}

/// Run records as JSON files in a directory
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the record for `run_id`; `None` for IDs that are not plain names
    pub fn state_path(&self, run_id: &str) -> Option<PathBuf> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| {
            self.base_dir
                .join(format!("{}{}{}", FILE_PREFIX, run_id, FILE_SUFFIX))
        })
    }
}

impl StateStore for FileStore {
    fn load(&self, run_id: &str) -> Result<WorkflowState> {
        let path = self.state_path(run_id).ok_or_else(|| not_found(run_id))?;
        if !path.exists() {
            return Err(not_found(run_id));
        }

        let content = std::fs::read_to_string(&path)?;
        let state = serde_json::from_str(&content)?;
        Ok(state)
    }

    fn save(&self, run_id: &str, state: &WorkflowState) -> Result<()> {
        let path = self
            .state_path(run_id)
            .ok_or_else(|| Error::Workflow(format!("Invalid run ID: {:?}", run_id)))?;

        std::fs::create_dir_all(&self.base_dir)?;

        // Write beside the target, then rename over it
        let tmp = self
            .base_dir
            .join(format!(".{}.{}.tmp", run_id, Uuid::new_v4()));
        let content = serde_json::to_string_pretty(state)?;
        std::fs::write(&tmp, content)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(Error::Io(e));
        }

        debug!("Saved workflow state to {:?}", path);
        Ok(())
    }

    fn exists(&self, run_id: &str) -> bool {
        self.state_path(run_id).map(|p| p.exists()).unwrap_or(false)
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids: Vec<String> = std::fs::read_dir(&self.base_dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_prefix(FILE_PREFIX)
                    .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
                    .map(str::to_string)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Run records held in memory, serialized the same way as on disk
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateStore for MemoryStore {
    fn load(&self, run_id: &str) -> Result<WorkflowState> {
        let records = self.records();
        let content = records.get(run_id).ok_or_else(|| not_found(run_id))?;
        Ok(serde_json::from_str(content)?)
    }

    fn save(&self, run_id: &str, state: &WorkflowState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;
        self.records().insert(run_id.to_string(), content);
        Ok(())
    }

    fn exists(&self, run_id: &str) -> bool {
        self.records().contains_key(run_id)
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.records().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Store access with one writer at a time per run
///
/// `update` and anything holding [`StateManager::lock`] are serialized per
/// run ID; different runs never wait on each other.
pub struct StateManager {
    store: Arc<dyn StateStore>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl StateManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Manager over a [`FileStore`] rooted at `base_dir`
    pub fn file(base_dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileStore::new(base_dir)))
    }

    /// Manager over a fresh [`MemoryStore`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn load(&self, run_id: &str) -> Result<WorkflowState> {
        self.store.load(run_id)
    }

    /// Save without taking the run lock; callers either hold it or own the run
    pub fn save(&self, run_id: &str, state: &WorkflowState) -> Result<()> {
        self.store.save(run_id, state)
    }

    pub fn exists(&self, run_id: &str) -> bool {
        self.store.exists(run_id)
    }

    pub fn list(&self) -> Result<Vec<String>> {
        self.store.list()
    }

    /// Exclusive access to `run_id` until the guard drops
    pub async fn lock(&self, run_id: &str) -> RunLock<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(run_id.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        RunLock {
            guard: Some(guard),
            run_id: run_id.to_string(),
            locks: &self.locks,
        }
    }

    /// Number of run IDs with a live lock entry
    pub fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Load, mutate and save `run_id` under its lock
    pub async fn update<F>(&self, run_id: &str, mutate: F) -> Result<WorkflowState>
    where
        F: FnOnce(&mut WorkflowState),
    {
        let _guard = self.lock(run_id).await;
        let mut state = self.store.load(run_id)?;
        mutate(&mut state);
        self.store.save(run_id, &state)?;
        Ok(state)
    }

    /// Store `state` under `run_id` unless a record already exists
    ///
    /// Returns whether a new record was written.
    pub async fn create(&self, run_id: &str, state: &WorkflowState) -> Result<bool> {
        let _guard = self.lock(run_id).await;
        if self.store.exists(run_id) {
            return Ok(false);
        }
        self.store.save(run_id, state)?;
        Ok(true)
    }
}

/// Held lock on one run, from [`StateManager::lock`]
///
/// The run's entry leaves the lock table once the last holder or waiter
/// is gone.
pub struct RunLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    run_id: String,
    locks: &'a Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Drop for RunLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Waiters and other holders each keep a clone
        if locks
            .get(&self.run_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.run_id);
            debug!("Released lock entry for {}", self.run_id);
        }
    }
}
