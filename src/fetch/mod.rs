//! Fetch module
//!
//! The `Source` contract for remote APIs and the bounded worker pool that
//! executes planned units against it.
//!
//! # Ordering
//!
//! Fetches run concurrently, but `OrderedResults` hands results back strictly
//! in unit order, so checkpoint advancement never skips an earlier unit that
//! is still in flight.

mod pool;
mod types;

pub use pool::{OrderedResults, WorkerPool, DEFAULT_WORKERS};
pub use types::{record_id_field, FetchOutcome, FetchResult, Source};

#[cfg(test)]
mod tests;
