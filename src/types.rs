//! Common types used throughout Solidafy Sync
//!
//! This module contains shared type definitions, type aliases,
//! and utility types used across multiple modules.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type
pub type JsonObject = serde_json::Map<String, JsonValue>;

/// Generic key-value map with string keys and values
pub type StringMap = HashMap<String, String>;

// ============================================================================
// Cursor Mode
// ============================================================================

/// Which cursor family a stream uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorMode {
    /// `id > cursor` keyset pagination with a deterministic sort order
    #[default]
    IdCursor,
    /// Time-partitioned windows
    TimeCursor,
}

// ============================================================================
// Row Error Policy
// ============================================================================

/// What to do when a single row fails to transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorPolicy {
    /// Log the row, count it as skipped, keep going
    #[default]
    Skip,
    /// Fail the whole work unit
    Fail,
}

// ============================================================================
// Backoff Type
// ============================================================================

/// Type of backoff for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between retries
    Constant,
    /// Linear increase in delay
    Linear,
    /// Exponential increase in delay
    #[default]
    Exponential,
}

impl BackoffType {
    /// Delay before retry number `attempt` (0-indexed), capped at `max`
    pub fn delay(self, attempt: u32, initial: Duration, max: Duration) -> Duration {
        let delay = match self {
            BackoffType::Constant => initial,
            BackoffType::Linear => initial.saturating_mul(attempt.saturating_add(1)),
            BackoffType::Exponential => initial.saturating_mul(2u32.saturating_pow(attempt)),
        };

        std::cmp::min(delay, max)
    }
}

// ============================================================================
// Path Lookup
// ============================================================================

/// Look up a value by dot-notation path (`data.items[0].id`, optional `$.` prefix).
///
/// Negative indices count from the end of an array.
pub fn lookup_path<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    if path.is_empty() || path == "$" {
        return Some(value);
    }

    let mut current = value;
    for part in path.split('.') {
        match part.find('[') {
            Some(bracket_pos) if part.ends_with(']') => {
                let name = &part[..bracket_pos];
                if !name.is_empty() {
                    current = current.get(name)?;
                }

                let index: i64 = part[bracket_pos + 1..part.len() - 1].parse().ok()?;
                let JsonValue::Array(arr) = current else {
                    return None;
                };
                let idx = if index < 0 {
                    arr.len().checked_sub(index.unsigned_abs() as usize)?
                } else {
                    index as usize
                };
                current = arr.get(idx)?;
            }
            _ => current = current.get(part)?,
        }
    }

    Some(current)
}

// ============================================================================
// Serde helpers
// ============================================================================

/// Serialize a `chrono::Duration` as whole seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &chrono::Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(value.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<chrono::Duration, D::Error> {
        let secs = i64::deserialize(d)?;
        Ok(chrono::Duration::seconds(secs))
    }
}
