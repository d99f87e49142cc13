//! Adaptive retry module
//!
//! Per-unit state machine `Pending → InFlight → {Success, Retrying, Fatal}`.
//! Retryable failures shrink the unit (next size on the page ladder, or half
//! the time window) and back off; everything else is either recorded as a
//! fatal unit or aborts the run.

mod controller;

pub use controller::{AttemptState, Decision, RetryController, RetryPolicy, UnitAttempt};
