//! Work unit and plan types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One bounded, independently retryable slice of fetch work.
///
/// Immutable once planned. A retry never mutates a unit; it plans a new,
/// smaller one with the same start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkUnit {
    /// Records with `id > after` in id order, skipping `offset`, at most `take`
    IdPage {
        after: Option<i64>,
        offset: u64,
        take: u64,
        /// Only records modified at or after this time
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modified_since: Option<DateTime<Utc>>,
    },
    /// Records inside the half-open window `[start, end)`
    TimeWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Size of a work unit, used to carry shrink hints between plans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitSize {
    /// Page size in records
    Records(u64),
    /// Window length
    Window(Duration),
}

impl WorkUnit {
    /// Create an ID page unit
    pub fn id_page(after: Option<i64>, offset: u64, take: u64) -> Self {
        Self::IdPage {
            after,
            offset,
            take,
            modified_since: None,
        }
    }

    /// Restrict an ID page to records modified since `since`
    #[must_use]
    pub fn modified_since(self, since: Option<DateTime<Utc>>) -> Self {
        match self {
            Self::IdPage {
                after,
                offset,
                take,
                ..
            } => Self::IdPage {
                after,
                offset,
                take,
                modified_since: since,
            },
            window => window,
        }
    }

    /// Create a time window unit
    pub fn time_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::TimeWindow { start, end }
    }

    /// Size of this unit
    pub fn size(&self) -> UnitSize {
        match self {
            Self::IdPage { take, .. } => UnitSize::Records(*take),
            Self::TimeWindow { start, end } => UnitSize::Window(*end - *start),
        }
    }

    /// Page size for ID units
    pub fn take(&self) -> Option<u64> {
        match self {
            Self::IdPage { take, .. } => Some(*take),
            Self::TimeWindow { .. } => None,
        }
    }

    /// A unit with the same start but a smaller size
    pub fn resized(&self, size: UnitSize) -> Self {
        match (self, size) {
            (
                Self::IdPage {
                    after,
                    offset,
                    modified_since,
                    ..
                },
                UnitSize::Records(take),
            ) => Self::IdPage {
                after: *after,
                offset: *offset,
                take,
                modified_since: *modified_since,
            },
            (Self::TimeWindow { start, .. }, UnitSize::Window(window)) => Self::TimeWindow {
                start: *start,
                end: *start + window,
            },
            _ => self.clone(),
        }
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdPage {
                after,
                offset,
                take,
                modified_since,
            } => {
                match after {
                    Some(id) => write!(f, "id>{id} offset={offset} take={take}")?,
                    None => write!(f, "id>start offset={offset} take={take}")?,
                }
                match modified_since {
                    Some(since) => write!(f, " modified>={}", since.to_rfc3339()),
                    None => Ok(()),
                }
            }
            Self::TimeWindow { start, end } => {
                write!(f, "[{}, {})", start.to_rfc3339(), end.to_rfc3339())
            }
        }
    }
}

/// Outcome of planning
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Units to fetch, in cursor order
    Units(Vec<WorkUnit>),
    /// Nothing left to do this run
    Complete,
}

impl Plan {
    /// Check if the stream is complete
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Run-level inputs to the planner besides the stream state
#[derive(Debug, Clone)]
pub struct PlanContext {
    /// End bound for time windows (usually "now" at run start)
    pub end: DateTime<Utc>,
    /// Set once an ID page came back short
    pub exhausted: bool,
    /// How many more units may resolve this run (`None` = unlimited)
    pub units_remaining: Option<usize>,
    /// Size to plan with instead of the default
    pub size_hint: Option<UnitSize>,
}

impl PlanContext {
    /// Create a context for a run ending at `end`
    pub fn new(end: DateTime<Utc>) -> Self {
        Self {
            end,
            exhausted: false,
            units_remaining: None,
            size_hint: None,
        }
    }
}
