// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # Solidafy Sync
//!
//! Adaptive cursor/batch extraction from paginated REST APIs.
//!
//! A stream is split into bounded work units: id pages (`id > cursor`,
//! offset, take) or time windows. Units are fetched concurrently, shrunk and
//! retried when the API times out, and committed strictly in order, so the
//! checkpointed cursor never skips data it has not written.
//!
//! ## Features
//!
//! - **Adaptive sizing**: Pages walk down a size ladder (`1000 → 500 → 250 → 50 → 10 → 1`),
//!   windows halve down to a floor
//! - **Ordered commits**: Bounded worker pool, results released in unit order
//! - **Resumable**: Memory, file and host-callback checkpoint stores
//! - **Error capture**: Units that cannot be fetched are recorded, not lost
//! - **Idempotent output**: Keyed upserts with typed column mapping
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use solidafy_sync::config::EngineConfig;
//! use solidafy_sync::emit::MemorySink;
//! use solidafy_sync::engine::SyncEngine;
//! use solidafy_sync::error_sink::JsonlErrorSink;
//! use solidafy_sync::state::FileCheckpointStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> solidafy_sync::Result<()> {
//!     let config = EngineConfig::from_file("sync.yaml")?;
//!     let specs = config.stream_specs()?;
//!
//!     let engine = SyncEngine::new(
//!         Arc::new(MemorySink::new()),
//!         Arc::new(FileCheckpointStore::open("state.json")?),
//!         Arc::new(JsonlErrorSink::new("errors.jsonl")),
//!         config,
//!     )?;
//!
//!     for summary in engine.run_streams(&specs).await? {
//!         println!("{}: {} records", summary.stream, summary.records_fetched);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          SyncEngine                             │
//! │   plan → fetch batch → resolve in order → emit → checkpoint     │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌───────────┬───────────┬──────┴──────┬───────────┬──────────────┐
//! │  Planner  │   Fetch   │    Retry    │   Emit    │  State       │
//! ├───────────┼───────────┼─────────────┼───────────┼──────────────┤
//! │ Id pages  │ Workers   │ Shrink      │ Mapping   │ Memory       │
//! │ Windows   │ Reorder   │ Backoff     │ Upsert    │ File         │
//! │ Ladder    │ Timeout   │ Classify    │ Delete    │ Callback     │
//! └───────────┴─────┬─────┴─────────────┴───────────┴──────────────┘
//!                   │
//!             ┌─────┴─────┐     ┌─────────────┐
//!             │ HttpSource│     │ Error sink  │
//!             │ Retry/RL  │     │ Jsonl/Table │
//!             └───────────┘     └─────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types and classification
pub mod error;

/// Common types and type aliases
pub mod types;

/// Checkpointed stream state
pub mod state;

/// Work unit planning and sizing
pub mod planner;

/// Concurrent fetching with ordered results
pub mod fetch;

/// Shrink-and-retry decisions
pub mod retry;

/// Record of units that could not be fetched
pub mod error_sink;

/// Row transformation and keyed output
pub mod emit;

/// HTTP client and REST source
pub mod http;

/// Engine and stream configuration
pub mod config;

/// Main execution engine
pub mod engine;

#[cfg(test)]
pub(crate) mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, ErrorClass, Result};
pub use types::*;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{StopHandle, StreamSpec, SyncEngine, SyncSummary};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
