//! Fetch types and the `Source` contract

use crate::error::{ErrorClass, Result};
use crate::planner::WorkUnit;
use crate::types::{lookup_path, JsonValue};
use async_trait::async_trait;

/// Remote API collaborator.
///
/// ID units must be answered with records where `id > after`, sorted by id
/// ascending, skipping `offset` and returning at most `take`. Time units must
/// be answered with every record inside `[start, end)`.
#[async_trait]
pub trait Source: Send + Sync {
    /// Fetch the records for one unit
    async fn fetch(&self, unit: &WorkUnit) -> Result<Vec<JsonValue>>;

    /// Cursor id of a record (ID streams only)
    fn record_id(&self, record: &JsonValue) -> Option<i64> {
        record_id_field(record, "id")
    }
}

/// Read an integer id from `field`, accepting numbers and numeric strings
pub fn record_id_field(record: &JsonValue, field: &str) -> Option<i64> {
    match lookup_path(record, field)? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Outcome tag of a fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Records returned
    Success,
    /// Timeout, rate limit or transient server error
    RetryableFailure(String),
    /// Anything that will not get better by retrying
    FatalFailure(String),
}

/// Result of one fetch attempt for one unit
#[derive(Debug)]
pub struct FetchResult {
    /// Position of the unit within its batch
    pub seq: usize,
    /// Unit that was fetched
    pub unit: WorkUnit,
    /// Records in source order, or the raw failure
    pub result: Result<Vec<JsonValue>>,
}

impl FetchResult {
    /// Create a fetch result
    pub fn new(seq: usize, unit: WorkUnit, result: Result<Vec<JsonValue>>) -> Self {
        Self { seq, unit, result }
    }

    /// Outcome tag for this attempt
    pub fn outcome(&self) -> FetchOutcome {
        match &self.result {
            Ok(_) => FetchOutcome::Success,
            Err(e) if e.class() == ErrorClass::RetryableFetch => {
                FetchOutcome::RetryableFailure(e.to_string())
            }
            Err(e) => FetchOutcome::FatalFailure(e.to_string()),
        }
    }

    /// Number of records fetched (zero on failure)
    pub fn record_count(&self) -> usize {
        self.result.as_ref().map_or(0, Vec::len)
    }
}
