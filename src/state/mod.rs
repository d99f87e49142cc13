//! State management module
//!
//! Handles cursor tracking, checkpointing, and resumability.
//! State is persisted between sync runs to enable incremental syncs.
//!
//! # Overview
//!
//! The state module provides:
//! - `SyncState` - Per-stream cursor, either ID-based or time-window based
//! - `State` - Map of independent stream states
//! - `CheckpointStore` - Durable commit/load contract with memory, file and
//!   host-callback implementations

mod store;
mod types;

pub use store::{
    CallbackCheckpointStore, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
};
pub use types::{IdCursor, State, SyncState, TimeCursor};

#[cfg(test)]
mod store_tests;
