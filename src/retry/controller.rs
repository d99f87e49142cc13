//! Adaptive retry controller
//!
//! Decides what happens to a work unit after a failed attempt: shrink and
//! retry, give up and record it, or abort the run.

use crate::error::{Error, ErrorClass};
use crate::planner::{SizingPolicy, WorkUnit};
use crate::types::BackoffType;
use std::time::Duration;

/// Lifecycle of one planned unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Planned, not yet fetched
    Pending,
    /// Fetch in progress
    InFlight,
    /// Waiting to re-enter `Pending` with a smaller unit
    Retrying,
    /// Records fetched (terminal)
    Success,
    /// Given up (terminal)
    Fatal,
}

impl AttemptState {
    /// Check if the state is terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Fatal)
    }
}

/// Tracks a planned unit through its retries
#[derive(Debug, Clone)]
pub struct UnitAttempt {
    /// Unit as originally planned
    pub planned: WorkUnit,
    /// Unit of the latest attempt
    pub current: WorkUnit,
    /// Number of fetches made so far
    pub attempts: u32,
    /// Current state
    pub state: AttemptState,
}

impl UnitAttempt {
    /// Start tracking a freshly planned unit
    pub fn new(unit: WorkUnit) -> Self {
        Self {
            planned: unit.clone(),
            current: unit,
            attempts: 0,
            state: AttemptState::Pending,
        }
    }

    /// Mark the current unit as being fetched
    pub fn start(&mut self) {
        debug_assert_eq!(self.state, AttemptState::Pending);
        self.attempts += 1;
        self.state = AttemptState::InFlight;
    }

    /// Mark the current fetch as successful
    pub fn succeed(&mut self) {
        self.state = AttemptState::Success;
    }

    /// Retries performed so far
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Whether the unit that finally resolved is smaller than planned
    pub fn was_shrunk(&self) -> bool {
        self.current != self.planned
    }
}

/// Retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries per planned unit
    pub max_retries: u32,
    /// Backoff strategy between retries
    pub backoff: BackoffType,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on any delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffType::Exponential,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without waiting
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: BackoffType::Constant,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Fetch `unit` after waiting `delay`
    Retry { unit: WorkUnit, delay: Duration },
    /// Record the failure and move on
    Fatal,
    /// Stop the whole run
    Abort,
}

/// Adaptive retry controller
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
    sizing: SizingPolicy,
}

impl RetryController {
    /// Create a controller
    pub fn new(policy: RetryPolicy, sizing: SizingPolicy) -> Self {
        Self { policy, sizing }
    }

    /// Retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Transition `attempt` after `error` and decide the next step
    pub fn on_failure(&self, attempt: &mut UnitAttempt, error: &Error) -> Decision {
        let class = error.class();
        if class != ErrorClass::RetryableFetch {
            attempt.state = AttemptState::Fatal;
            return if class.aborts() {
                Decision::Abort
            } else {
                Decision::Fatal
            };
        }

        let retries = attempt.retries();
        if retries >= self.policy.max_retries {
            attempt.state = AttemptState::Fatal;
            return Decision::Fatal;
        }

        let Some(smaller) = self.sizing.shrink(attempt.current.size()) else {
            attempt.state = AttemptState::Fatal;
            return Decision::Fatal;
        };

        let delay = self.policy.backoff.delay(
            retries,
            self.policy.initial_backoff,
            self.policy.max_backoff,
        );

        attempt.current = attempt.current.resized(smaller);
        attempt.state = AttemptState::Retrying;
        Decision::Retry {
            unit: attempt.current.clone(),
            delay,
        }
    }

    /// Move a retrying attempt back to `Pending`
    pub fn requeue(&self, attempt: &mut UnitAttempt) {
        if attempt.state == AttemptState::Retrying {
            attempt.state = AttemptState::Pending;
        }
    }
}
