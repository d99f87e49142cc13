//! Error sink module
//!
//! Append-only record of work units that failed beyond recovery. Writing
//! here never blocks progress: failures to record are logged and ignored.

mod sinks;
mod types;

pub use sinks::{
    record_best_effort, ErrorSink, JsonlErrorSink, MemoryErrorSink, TableErrorSink,
    DEFAULT_ERROR_TABLE,
};
pub use types::ErrorRecord;
