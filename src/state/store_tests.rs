//! Tests for checkpoint stores

use super::*;
use crate::types::CursorMode;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

// ============================================================================
// Memory Store Tests
// ============================================================================

#[tokio::test]
async fn test_memory_store_load_missing() {
    let store = MemoryCheckpointStore::new();
    assert!(store.load("gifts").await.unwrap().is_none());

    let state = store.load_or("gifts", SyncState::id_cursor()).await.unwrap();
    assert_eq!(state, SyncState::id_cursor());
}

#[tokio::test]
async fn test_memory_store_commit_and_load() {
    let store = MemoryCheckpointStore::new();

    store
        .commit("gifts", &SyncState::IdCursor(IdCursor::at(1000, 1000)))
        .await
        .unwrap();
    store
        .commit("gifts", &SyncState::IdCursor(IdCursor::at(2000, 2000)))
        .await
        .unwrap();

    let loaded = store.load("gifts").await.unwrap().unwrap();
    assert_eq!(loaded, SyncState::IdCursor(IdCursor::at(2000, 2000)));
}

#[tokio::test]
async fn test_memory_store_rejects_regression() {
    let store = MemoryCheckpointStore::new();
    store
        .commit("gifts", &SyncState::IdCursor(IdCursor::at(2000, 2000)))
        .await
        .unwrap();

    let result = store
        .commit("gifts", &SyncState::IdCursor(IdCursor::at(1000, 2000)))
        .await;
    assert!(result.is_err());

    // Previous state untouched
    let loaded = store.load("gifts").await.unwrap().unwrap();
    assert_eq!(loaded, SyncState::IdCursor(IdCursor::at(2000, 2000)));
}

#[tokio::test]
async fn test_memory_store_independent_streams() {
    let store = MemoryCheckpointStore::new();
    store
        .commit("list_1", &SyncState::IdCursor(IdCursor::at(10, 10)))
        .await
        .unwrap();
    store
        .commit(
            "list_2",
            &SyncState::time_cursor(chrono::Utc::now(), chrono::Duration::days(90)),
        )
        .await
        .unwrap();

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.streams.len(), 2);
    assert_eq!(
        snapshot.get_stream("list_2").unwrap().mode(),
        CursorMode::TimeCursor
    );
}

#[test]
fn test_memory_store_from_json() {
    let json = r#"{"streams": {"gifts": {"mode": "id_cursor", "last_id": 42, "total_synced": 42}}}"#;
    let store = MemoryCheckpointStore::from_json(json).unwrap();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let loaded = rt.block_on(store.load("gifts")).unwrap().unwrap();
    assert_eq!(loaded, SyncState::IdCursor(IdCursor::at(42, 42)));

    assert!(MemoryCheckpointStore::from_json("not json").is_err());
}

// ============================================================================
// File Store Tests
// ============================================================================

#[tokio::test]
async fn test_file_store_persists_across_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    let store = FileCheckpointStore::open(&path).unwrap();
    assert!(store.load("gifts").await.unwrap().is_none());
    store
        .commit("gifts", &SyncState::IdCursor(IdCursor::at(2500, 2500)))
        .await
        .unwrap();

    assert!(path.exists());
    assert!(!path.with_extension("tmp").exists());

    let reopened = FileCheckpointStore::open(&path).unwrap();
    let loaded = reopened.load("gifts").await.unwrap().unwrap();
    assert_eq!(loaded, SyncState::IdCursor(IdCursor::at(2500, 2500)));
}

#[tokio::test]
async fn test_file_store_failed_commit_keeps_previous_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    let store = FileCheckpointStore::open(&path).unwrap();
    store
        .commit("gifts", &SyncState::IdCursor(IdCursor::at(100, 100)))
        .await
        .unwrap();
    assert!(store
        .commit("gifts", &SyncState::IdCursor(IdCursor::at(50, 100)))
        .await
        .is_err());

    let reopened = FileCheckpointStore::open(&path).unwrap();
    assert_eq!(
        reopened.load("gifts").await.unwrap().unwrap(),
        SyncState::IdCursor(IdCursor::at(100, 100))
    );
}

#[test]
fn test_file_store_invalid_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = FileCheckpointStore::open(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse state file"));
}

// ============================================================================
// Callback Store Tests
// ============================================================================

#[tokio::test]
async fn test_callback_store_notifies_host() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut prior = State::new();
    prior.set_stream("gifts", SyncState::IdCursor(IdCursor::at(10, 10)));

    let store = CallbackCheckpointStore::new(prior, move |stream, state| {
        sink.lock().unwrap().push((stream.to_string(), state.clone()));
        Ok(())
    });

    assert_eq!(
        store.load("gifts").await.unwrap(),
        Some(SyncState::IdCursor(IdCursor::at(10, 10)))
    );

    store
        .commit("gifts", &SyncState::IdCursor(IdCursor::at(20, 20)))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "gifts");
    assert_eq!(seen[0].1, SyncState::IdCursor(IdCursor::at(20, 20)));
}

#[tokio::test]
async fn test_callback_store_refusal_is_not_committed() {
    let store = CallbackCheckpointStore::new(State::new(), |_, _| {
        Err(crate::error::Error::checkpoint("host unavailable"))
    });

    assert!(store
        .commit("gifts", &SyncState::IdCursor(IdCursor::at(20, 20)))
        .await
        .is_err());
    assert!(store.load("gifts").await.unwrap().is_none());
}
