//! Checkpoint store implementations
//!
//! Provides in-memory, file-based and host-callback persistence of
//! per-stream [`SyncState`]. File persistence uses atomic writes.

use super::types::{State, SyncState};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Durable storage for sync progress.
///
/// `commit` must be atomic from the caller's perspective: after it returns
/// the new state survives a crash, and a crash during it leaves the previous
/// state intact.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last committed state for a stream, if any
    async fn load(&self, stream: &str) -> Result<Option<SyncState>>;

    /// Persist a new state for a stream
    async fn commit(&self, stream: &str, state: &SyncState) -> Result<()>;

    /// Snapshot of every stream's committed state
    async fn snapshot(&self) -> State;

    /// Last committed state, or `initial` if the stream has never committed
    async fn load_or(&self, stream: &str, initial: SyncState) -> Result<SyncState> {
        Ok(self.load(stream).await?.unwrap_or(initial))
    }
}

/// Reject a commit that would move a stream's cursor backwards
fn check_commit(current: Option<&SyncState>, next: &SyncState) -> Result<()> {
    match current {
        Some(current) => current.check_advance(next),
        None => Ok(()),
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-memory checkpoint store (no persistence)
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    state: Arc<RwLock<State>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with existing state
    pub fn with_state(state: State) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Create a store from inline JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let state: State = serde_json::from_str(json)
            .map_err(|e| Error::state(format!("Failed to parse state JSON: {e}")))?;
        Ok(Self::with_state(state))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, stream: &str) -> Result<Option<SyncState>> {
        Ok(self.state.read().await.get_stream(stream).cloned())
    }

    async fn commit(&self, stream: &str, state: &SyncState) -> Result<()> {
        let mut guard = self.state.write().await;
        check_commit(guard.get_stream(stream), state)?;
        guard.set_stream(stream, state.clone());
        Ok(())
    }

    async fn snapshot(&self) -> State {
        self.state.read().await.clone()
    }
}

// ============================================================================
// File Store
// ============================================================================

/// JSON file checkpoint store with atomic writes
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    /// Path to the state file
    path: PathBuf,
    /// Current state (cached)
    state: Arc<RwLock<State>>,
}

impl FileCheckpointStore {
    /// Open a store, loading existing state if the file is present
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::state(format!("Failed to read state file: {e}")))?;
            serde_json::from_str(&contents)
                .map_err(|e| Error::state(format!("Failed to parse state file: {e}")))?
        } else {
            State::new()
        };

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Get the state file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_file(&self, state: &State) -> Result<()> {
        let contents = serde_json::to_string_pretty(state)
            .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))?;

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| Error::checkpoint(format!("Failed to write state file: {e}")))?;

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| Error::checkpoint(format!("Failed to rename state file: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, stream: &str) -> Result<Option<SyncState>> {
        Ok(self.state.read().await.get_stream(stream).cloned())
    }

    async fn commit(&self, stream: &str, state: &SyncState) -> Result<()> {
        let mut guard = self.state.write().await;
        check_commit(guard.get_stream(stream), state)?;

        let mut next = guard.clone();
        next.set_stream(stream, state.clone());
        self.write_file(&next).await?;
        *guard = next;

        debug!(stream, path = %self.path.display(), "Checkpoint written");
        Ok(())
    }

    async fn snapshot(&self) -> State {
        self.state.read().await.clone()
    }
}

// ============================================================================
// Callback Store
// ============================================================================

type CheckpointCallback = dyn Fn(&str, &SyncState) -> Result<()> + Send + Sync;

/// Checkpoint store that hands every commit to the host orchestrator.
///
/// The host supplies prior state up front and owns persistence; the
/// callback is invoked for each checkpoint and may refuse it by returning
/// an error.
pub struct CallbackCheckpointStore {
    inner: MemoryCheckpointStore,
    callback: Box<CheckpointCallback>,
}

impl CallbackCheckpointStore {
    /// Create a store seeded with the host's prior state
    pub fn new<F>(initial: State, callback: F) -> Self
    where
        F: Fn(&str, &SyncState) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            inner: MemoryCheckpointStore::with_state(initial),
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl CheckpointStore for CallbackCheckpointStore {
    async fn load(&self, stream: &str) -> Result<Option<SyncState>> {
        self.inner.load(stream).await
    }

    async fn commit(&self, stream: &str, state: &SyncState) -> Result<()> {
        let current = self.inner.load(stream).await?;
        check_commit(current.as_ref(), state)?;
        (self.callback)(stream, state)?;
        self.inner.commit(stream, state).await
    }

    async fn snapshot(&self) -> State {
        self.inner.snapshot().await
    }
}

impl std::fmt::Debug for CallbackCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackCheckpointStore")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
