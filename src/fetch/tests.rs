//! Tests for the fetch worker pool

use super::*;
use crate::error::Error;
use crate::planner::WorkUnit;
use crate::test_support::MockSource;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Record Id Tests
// ============================================================================

#[test]
fn test_record_id_field() {
    assert_eq!(record_id_field(&json!({"id": 42}), "id"), Some(42));
    assert_eq!(record_id_field(&json!({"id": "17"}), "id"), Some(17));
    assert_eq!(record_id_field(&json!({"data": {"id": 5}}), "data.id"), Some(5));
    assert_eq!(record_id_field(&json!({"id": "abc"}), "id"), None);
    assert_eq!(record_id_field(&json!({"name": "x"}), "id"), None);
}

#[test]
fn test_fetch_outcome() {
    let unit = WorkUnit::id_page(None, 0, 10);

    let ok = FetchResult::new(0, unit.clone(), Ok(vec![json!({"id": 1})]));
    assert_eq!(ok.outcome(), FetchOutcome::Success);
    assert_eq!(ok.record_count(), 1);

    let retry = FetchResult::new(0, unit.clone(), Err(Error::http_status(503, "")));
    assert!(matches!(retry.outcome(), FetchOutcome::RetryableFailure(_)));

    let fatal = FetchResult::new(0, unit, Err(Error::http_status(400, "bad")));
    assert!(matches!(fatal.outcome(), FetchOutcome::FatalFailure(_)));
    assert_eq!(fatal.record_count(), 0);
}

// ============================================================================
// Pool Tests
// ============================================================================

#[tokio::test]
async fn test_results_arrive_in_unit_order() {
    // Later units finish first
    let source = MockSource::dense(40).delayed(|unit| match unit {
        WorkUnit::IdPage { offset, .. } => Duration::from_millis(40 - offset),
        WorkUnit::TimeWindow { .. } => Duration::ZERO,
    });
    let units: Vec<_> = (0..4).map(|i| WorkUnit::id_page(None, i * 10, 10)).collect();

    let pool = WorkerPool::new(4);
    let mut results = pool.fetch_batch(Arc::new(source), units.clone());
    assert_eq!(results.len(), 4);

    let mut seen = Vec::new();
    while let Some(result) = results.next().await {
        seen.push(result.unit.clone());
        let first_id = result.result.unwrap()[0]["id"].as_i64().unwrap();
        assert_eq!(first_id, (seen.len() as i64 - 1) * 10 + 1);
    }

    assert_eq!(seen, units);
    assert_eq!(results.remaining(), 0);
}

struct CountingSource {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Source for CountingSource {
    async fn fetch(&self, _unit: &WorkUnit) -> crate::error::Result<Vec<serde_json::Value>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
    let source = Arc::new(CountingSource {
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let units: Vec<_> = (0..12).map(|i| WorkUnit::id_page(None, i, 1)).collect();

    let pool = WorkerPool::new(3);
    let mut results = pool.fetch_batch(source.clone(), units);
    let mut count = 0;
    while results.next().await.is_some() {
        count += 1;
    }

    assert_eq!(count, 12);
    assert!(source.peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_failures_are_returned_not_swallowed() {
    let source = MockSource::dense(30).failing(|unit, _| match unit {
        WorkUnit::IdPage { offset: 10, .. } => Some(Error::Timeout { timeout_ms: 1 }),
        _ => None,
    });
    let units: Vec<_> = (0..3).map(|i| WorkUnit::id_page(None, i * 10, 10)).collect();

    let mut results = WorkerPool::new(8).fetch_batch(Arc::new(source), units);

    assert!(results.next().await.unwrap().result.is_ok());
    let failed = results.next().await.unwrap();
    assert_eq!(failed.seq, 1);
    assert!(matches!(failed.outcome(), FetchOutcome::RetryableFailure(_)));
    assert!(results.next().await.unwrap().result.is_ok());
    assert!(results.next().await.is_none());
}

#[tokio::test]
async fn test_fetch_timeout() {
    let source = MockSource::dense(10).delayed(|_| Duration::from_millis(200));
    let pool = WorkerPool::new(1).with_fetch_timeout(Some(Duration::from_millis(10)));

    let result = pool
        .fetch_one(&source, WorkUnit::id_page(None, 0, 10))
        .await;
    assert!(matches!(result.result, Err(Error::Timeout { timeout_ms: 10 })));
}

#[tokio::test]
async fn test_empty_batch() {
    let mut results = WorkerPool::default().fetch_batch(Arc::new(MockSource::dense(0)), vec![]);
    assert!(results.is_empty());
    assert!(results.next().await.is_none());
}
