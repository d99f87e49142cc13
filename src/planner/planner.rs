//! Batch planner implementation

use super::sizing::SizingPolicy;
use super::types::{Plan, PlanContext, UnitSize, WorkUnit};
use crate::state::{IdCursor, SyncState, TimeCursor};

/// Plans the next batch of work units from a stream's committed state.
///
/// Planning is pure: it only reads the state it is handed.
#[derive(Debug, Clone)]
pub struct BatchPlanner {
    policy: SizingPolicy,
    /// Units planned per batch (one per fetch worker)
    batch_width: usize,
}

impl BatchPlanner {
    /// Create a planner producing up to `batch_width` units per batch
    pub fn new(policy: SizingPolicy, batch_width: usize) -> Self {
        Self {
            policy,
            batch_width: batch_width.max(1),
        }
    }

    /// Sizing policy in use
    pub fn policy(&self) -> &SizingPolicy {
        &self.policy
    }

    /// Plan the next batch for `state`
    pub fn plan(&self, state: &SyncState, ctx: &PlanContext) -> Plan {
        if ctx.exhausted || ctx.units_remaining == Some(0) {
            return Plan::Complete;
        }

        let width = ctx
            .units_remaining
            .map_or(self.batch_width, |remaining| remaining.min(self.batch_width));

        let units = match state {
            SyncState::IdCursor(cursor) => self.plan_id_pages(cursor, ctx, width),
            SyncState::TimeCursor(cursor) => self.plan_windows(cursor, ctx, width),
        };

        if units.is_empty() {
            Plan::Complete
        } else {
            Plan::Units(units)
        }
    }

    fn plan_id_pages(&self, cursor: &IdCursor, ctx: &PlanContext, width: usize) -> Vec<WorkUnit> {
        let take = match ctx.size_hint {
            Some(UnitSize::Records(take)) if take > 0 => take,
            _ => self.policy.ladder.largest(),
        };

        (0..width as u64)
            .map(|i| {
                WorkUnit::id_page(cursor.last_id, cursor.skip + i * take, take)
                    .modified_since(cursor.modified_since)
            })
            .collect()
    }

    fn plan_windows(&self, cursor: &TimeCursor, ctx: &PlanContext, width: usize) -> Vec<WorkUnit> {
        let window = match ctx.size_hint {
            Some(UnitSize::Window(window)) if window > chrono::Duration::zero() => window,
            _ if cursor.window_size > chrono::Duration::zero() => cursor.window_size,
            _ => self.policy.windows.initial,
        };

        let mut units = Vec::with_capacity(width);
        let mut start = cursor.window_start;
        while start < ctx.end && units.len() < width {
            let end = start
                .checked_add_signed(window)
                .map_or(ctx.end, |end| end.min(ctx.end));
            units.push(WorkUnit::time_window(start, end));
            start = end;
        }
        units
    }
}
