//! Engine types
//!
//! Stream descriptions, run summaries and the stop handle.

use crate::emit::Transformer;
use crate::fetch::Source;
use crate::planner::WorkUnit;
use crate::state::SyncState;
use std::sync::Arc;
use tokio::sync::watch;

/// Everything needed to sync one stream
#[derive(Clone)]
pub struct StreamSpec {
    /// Stream name (state key)
    pub name: String,
    /// Remote API
    pub source: Arc<dyn Source>,
    /// Record to row conversion
    pub transformer: Arc<dyn Transformer>,
    /// State used when the store has nothing for this stream
    pub initial: SyncState,
    /// Once an id stream reaches its end, page through it again from the
    /// start for records modified since that run began
    pub rescan_modified: bool,
}

impl StreamSpec {
    /// Create a stream spec
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn Source>,
        transformer: Arc<dyn Transformer>,
        initial: SyncState,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            transformer,
            initial,
            rescan_modified: false,
        }
    }

    /// Re-page an id stream for modified records after each complete pass
    #[must_use]
    pub fn rescan_modified(mut self) -> Self {
        self.rescan_modified = true;
        self
    }

    /// ID-cursor stream starting from the beginning
    pub fn id_cursor(
        name: impl Into<String>,
        source: Arc<dyn Source>,
        transformer: Arc<dyn Transformer>,
    ) -> Self {
        Self::new(name, source, transformer, SyncState::id_cursor())
    }
}

impl std::fmt::Debug for StreamSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSpec")
            .field("name", &self.name)
            .field("initial", &self.initial)
            .field("rescan_modified", &self.rescan_modified)
            .finish_non_exhaustive()
    }
}

/// Result of one run over one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    /// Stream name
    pub stream: String,
    /// Records returned by successful fetches that were committed
    pub records_fetched: u64,
    /// Rows upserted (child rows included)
    pub rows_upserted: u64,
    /// Rows deleted
    pub rows_deleted: u64,
    /// Records dropped by the row error policy
    pub rows_skipped: u64,
    /// Units whose rows were emitted and checkpointed
    pub units_committed: u64,
    /// Units recorded to the error sink
    pub units_failed: u64,
    /// Retries made across all units
    pub retries: u64,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// The source has nothing more for this run
    pub exhausted: bool,
    /// The run was stopped (stop handle or run timeout)
    pub stopped: bool,
    /// The run halted at a unit that failed while skipping was disabled
    pub halted_at: Option<WorkUnit>,
    /// State after the last commit
    pub final_state: SyncState,
}

impl SyncSummary {
    /// Create an empty summary
    pub fn new(stream: impl Into<String>, state: SyncState) -> Self {
        Self {
            stream: stream.into(),
            records_fetched: 0,
            rows_upserted: 0,
            rows_deleted: 0,
            rows_skipped: 0,
            units_committed: 0,
            units_failed: 0,
            retries: 0,
            duration_ms: 0,
            exhausted: false,
            stopped: false,
            halted_at: None,
            final_state: state,
        }
    }

    /// Units resolved this run, successful or not
    pub fn units_resolved(&self) -> u64 {
        self.units_committed + self.units_failed
    }

    /// Check if every unit this run succeeded
    pub fn is_clean(&self) -> bool {
        self.units_failed == 0 && self.halted_at.is_none()
    }
}

/// Requests a running engine to stop between units.
///
/// Clones share the same signal.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    /// Create a handle in the running state
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the engine to stop
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Check if a stop was requested
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver observing the stop signal
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
