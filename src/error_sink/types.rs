//! Error record type

use crate::error::Error;
use crate::planner::WorkUnit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Write-once record of a unit the engine gave up on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Stream the unit belonged to
    pub stream: String,
    /// The last (possibly shrunk) unit attempted
    pub work_unit: WorkUnit,
    /// Fetch attempts made, first try included
    pub attempt_count: u32,
    /// Final error message
    pub error_message: String,
    /// Error class name
    pub error_kind: String,
    /// When the unit was declared fatal
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    /// Build a record from the final error of a unit
    pub fn new(
        stream: impl Into<String>,
        work_unit: WorkUnit,
        attempt_count: u32,
        error: &Error,
    ) -> Self {
        Self {
            stream: stream.into(),
            work_unit,
            attempt_count,
            error_message: error.to_string(),
            error_kind: error.kind().to_string(),
            timestamp: Utc::now(),
        }
    }
}
