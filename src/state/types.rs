//! State types for tracking sync progress
//!
//! These types are serialized to JSON and persisted between runs.

use crate::error::{Error, Result};
use crate::types::{duration_secs, CursorMode};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Progress snapshot for one stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncState {
    /// ID-ordered source
    IdCursor(IdCursor),
    /// Time-partitioned source
    TimeCursor(TimeCursor),
}

impl SyncState {
    /// Initial ID cursor state
    pub fn id_cursor() -> Self {
        Self::IdCursor(IdCursor::default())
    }

    /// Initial time cursor state starting at `start` with windows of `window_size`
    pub fn time_cursor(start: DateTime<Utc>, window_size: Duration) -> Self {
        Self::TimeCursor(TimeCursor::new(start, window_size))
    }

    /// Cursor family of this state
    pub fn mode(&self) -> CursorMode {
        match self {
            Self::IdCursor(_) => CursorMode::IdCursor,
            Self::TimeCursor(_) => CursorMode::TimeCursor,
        }
    }

    /// Total records synced over the lifetime of the stream
    pub fn total_synced(&self) -> u64 {
        match self {
            Self::IdCursor(c) => c.total_synced,
            Self::TimeCursor(c) => c.total_synced,
        }
    }

    /// Verify that `next` is a legal successor of this state.
    ///
    /// The mode must match and the cursor must not move backwards.
    pub fn check_advance(&self, next: &SyncState) -> Result<()> {
        match (self, next) {
            (Self::IdCursor(cur), Self::IdCursor(new)) => {
                if new.modified_since < cur.modified_since {
                    return Err(Error::checkpoint(format!(
                        "modified_since would move backwards: {:?} -> {:?}",
                        cur.modified_since, new.modified_since
                    )));
                }
                // A new modified-since pass restarts the id cursor
                let new_pass = new.modified_since > cur.modified_since;
                if new.last_id < cur.last_id && !new_pass {
                    return Err(Error::checkpoint(format!(
                        "id cursor would move backwards: {:?} -> {:?}",
                        cur.last_id, new.last_id
                    )));
                }
                if new.total_synced < cur.total_synced {
                    return Err(Error::checkpoint(format!(
                        "total_synced would decrease: {} -> {}",
                        cur.total_synced, new.total_synced
                    )));
                }
                Ok(())
            }
            (Self::TimeCursor(cur), Self::TimeCursor(new)) => {
                if new.window_start < cur.window_start {
                    return Err(Error::checkpoint(format!(
                        "time cursor would move backwards: {} -> {}",
                        cur.window_start, new.window_start
                    )));
                }
                Ok(())
            }
            _ => Err(Error::checkpoint(format!(
                "cursor mode mismatch: {:?} -> {:?}",
                self.mode(),
                next.mode()
            ))),
        }
    }
}

/// Cursor for sources paginated by `id > last_id`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdCursor {
    /// Highest id committed so far
    #[serde(default)]
    pub last_id: Option<i64>,

    /// Records committed over the lifetime of the stream
    #[serde(default)]
    pub total_synced: u64,

    /// Records right after `last_id` that were given up on
    #[serde(default)]
    pub skip: u64,

    /// Lower bound on the modification time of the pass in progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_since: Option<DateTime<Utc>>,

    /// Start of the last run that paged through to the end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl IdCursor {
    /// Create a new cursor at the beginning of the stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cursor resuming after `last_id`
    pub fn at(last_id: i64, total_synced: u64) -> Self {
        Self {
            last_id: Some(last_id),
            total_synced,
            ..Self::default()
        }
    }

    /// Advance past a committed page whose highest id is `max_id`
    pub fn advance(&mut self, max_id: i64, count: u64) {
        if self.last_id.map_or(true, |last| max_id > last) {
            self.last_id = Some(max_id);
        }
        self.skip = 0;
        self.total_synced += count;
    }

    /// Skip `count` records that could not be fetched
    pub fn skip_past(&mut self, count: u64) {
        self.skip += count;
    }

    /// Start a pass over records modified since the last completed one.
    ///
    /// Does nothing while a pass is still in progress or before the first
    /// pass has completed. Returns whether a new pass started.
    pub fn begin_pass(&mut self) -> bool {
        match self.last_sync_time {
            Some(since) if self.modified_since != Some(since) => {
                self.modified_since = Some(since);
                self.last_id = None;
                self.skip = 0;
                true
            }
            _ => false,
        }
    }

    /// Record that a pass started at `started` reached the end of the stream
    pub fn complete_pass(&mut self, started: DateTime<Utc>) {
        if self.last_sync_time.map_or(true, |last| started > last) {
            self.last_sync_time = Some(started);
        }
    }
}

/// Cursor for time-partitioned sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeCursor {
    /// Start of the next window to fetch
    pub window_start: DateTime<Utc>,

    /// Default size of the next window
    #[serde(with = "duration_secs")]
    pub window_size: Duration,

    /// End bound of the last run that caught up completely
    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,

    /// Records committed over the lifetime of the stream
    #[serde(default)]
    pub total_synced: u64,
}

impl TimeCursor {
    /// Create a new cursor
    pub fn new(window_start: DateTime<Utc>, window_size: Duration) -> Self {
        Self {
            window_start,
            window_size,
            last_sync_time: None,
            total_synced: 0,
        }
    }

    /// Advance past a committed window ending at `end`
    pub fn advance(&mut self, end: DateTime<Utc>, count: u64) {
        if end > self.window_start {
            self.window_start = end;
        }
        self.total_synced += count;
    }

    /// Mark the stream caught up to `end`
    pub fn complete(&mut self, end: DateTime<Utc>) {
        if end > self.window_start {
            self.window_start = end;
        }
        self.last_sync_time = Some(end);
    }
}

/// Complete state for a connector: one independent entry per stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Per-stream state
    #[serde(default)]
    pub streams: HashMap<String, SyncState>,
}

impl State {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get state for a stream
    pub fn get_stream(&self, stream: &str) -> Option<&SyncState> {
        self.streams.get(stream)
    }

    /// Replace the state for a stream
    pub fn set_stream(&mut self, stream: &str, state: SyncState) {
        self.streams.insert(stream.to_string(), state);
    }

    /// Remove the state for a stream
    pub fn remove_stream(&mut self, stream: &str) -> Option<SyncState> {
        self.streams.remove(stream)
    }
}
