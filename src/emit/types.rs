//! Emit types
//!
//! Row operations and per-call reports.

use crate::types::JsonObject;
use serde::{Deserialize, Serialize};

/// Normalized row: column name to value
pub type Row = JsonObject;

/// One write against the row sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RowOp {
    /// Insert or replace the row stored under `key`
    Upsert {
        table: String,
        key: String,
        row: Row,
    },
    /// Remove the row stored under `key`
    Delete { table: String, key: String },
}

impl RowOp {
    /// Create an upsert
    pub fn upsert(table: impl Into<String>, key: impl Into<String>, row: Row) -> Self {
        Self::Upsert {
            table: table.into(),
            key: key.into(),
            row,
        }
    }

    /// Create a delete
    pub fn delete(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Delete {
            table: table.into(),
            key: key.into(),
        }
    }

    /// Target table
    pub fn table(&self) -> &str {
        match self {
            Self::Upsert { table, .. } | Self::Delete { table, .. } => table,
        }
    }

    /// Primary key value
    pub fn key(&self) -> &str {
        match self {
            Self::Upsert { key, .. } | Self::Delete { key, .. } => key,
        }
    }

    /// Check if this is an upsert
    pub fn is_upsert(&self) -> bool {
        matches!(self, Self::Upsert { .. })
    }
}

/// What one `emit` call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Rows upserted (child rows included)
    pub upserted: usize,
    /// Rows deleted
    pub deleted: usize,
    /// Records dropped by the row error policy
    pub skipped: usize,
    /// Messages for the skipped records
    pub errors: Vec<String>,
}

impl EmitReport {
    /// Create an empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: EmitReport) {
        self.upserted += other.upserted;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }
}
