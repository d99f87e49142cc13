//! Bounded fetch worker pool
//!
//! Fetch tasks run concurrently and report through a channel; the receiving
//! side reorders results so the commit loop sees them in unit order.

use super::types::{FetchResult, Source};
use crate::error::{Error, Result};
use crate::planner::WorkUnit;
use crate::types::JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Default number of concurrent fetches
pub const DEFAULT_WORKERS: usize = 8;

/// Bounded pool of fetch workers
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    fetch_timeout: Option<Duration>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl WorkerPool {
    /// Create a pool running at most `workers` fetches at once
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            fetch_timeout: None,
        }
    }

    /// Bound every fetch by `timeout`
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Maximum concurrent fetches
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start fetching `units` concurrently; results come back in unit order
    pub fn fetch_batch(&self, source: Arc<dyn Source>, units: Vec<WorkUnit>) -> OrderedResults {
        let total = units.len();
        let (tx, rx) = mpsc::channel(total.max(1));
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for (seq, unit) in units.into_iter().enumerate() {
            let tx = tx.clone();
            let source = Arc::clone(&source);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.fetch_timeout;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                debug!(seq, unit = %unit, "Fetching unit");
                let result = fetch_with_timeout(source.as_ref(), &unit, timeout).await;
                // Receiver gone means the batch was abandoned
                let _ = tx.send(FetchResult::new(seq, unit, result)).await;
            });
        }
        drop(tx);

        OrderedResults {
            rx,
            pending: BTreeMap::new(),
            next: 0,
            total,
            tasks,
        }
    }

    /// Fetch a single unit on the calling task
    pub async fn fetch_one(&self, source: &dyn Source, unit: WorkUnit) -> FetchResult {
        debug!(unit = %unit, "Fetching unit");
        let result = fetch_with_timeout(source, &unit, self.fetch_timeout).await;
        FetchResult::new(0, unit, result)
    }
}

async fn fetch_with_timeout(
    source: &dyn Source,
    unit: &WorkUnit,
    timeout: Option<Duration>,
) -> Result<Vec<JsonValue>> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, source.fetch(unit)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                timeout_ms: limit.as_millis() as u64,
            }),
        },
        None => source.fetch(unit).await,
    }
}

/// In-order view over a running batch.
///
/// Dropping it aborts any fetch still in flight.
#[derive(Debug)]
pub struct OrderedResults {
    rx: mpsc::Receiver<FetchResult>,
    pending: BTreeMap<usize, FetchResult>,
    next: usize,
    total: usize,
    tasks: JoinSet<()>,
}

impl OrderedResults {
    /// Next result in unit order, waiting for it if necessary
    pub async fn next(&mut self) -> Option<FetchResult> {
        if self.next >= self.total {
            return None;
        }

        loop {
            if let Some(result) = self.pending.remove(&self.next) {
                self.next += 1;
                return Some(result);
            }

            if let Some(result) = self.rx.recv().await {
                self.pending.insert(result.seq, result);
            } else {
                warn!(
                    missing = self.next,
                    total = self.total,
                    "Fetch task ended without reporting a result"
                );
                return None;
            }
        }
    }

    /// Units in the batch
    pub fn len(&self) -> usize {
        self.total
    }

    /// Check if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Results not yet handed out
    pub fn remaining(&self) -> usize {
        self.total - self.next
    }

    /// Abandon every fetch still in flight
    pub fn abort(&mut self) {
        self.tasks.abort_all();
    }
}
