//! Batch planning module
//!
//! Decides the next units of work for a stream from its committed
//! `SyncState` and the sizing policy.
//!
//! # Overview
//!
//! - `WorkUnit` - An ID page (`id > after`, offset, take) or a time window
//! - `BatchPlanner` - Plans one batch of consecutive units per fetch round
//! - `SizingPolicy` - Descending page ladder and window halving rules

#[allow(clippy::module_inception)]
mod planner;
mod sizing;
mod types;

pub use planner::BatchPlanner;
pub use sizing::{SizeLadder, SizingPolicy, WindowSizing, DEFAULT_TAKE_SIZES};
pub use types::{Plan, PlanContext, UnitSize, WorkUnit};
