//! Integration tests using mock HTTP server
//!
//! Tests the full end-to-end flow: YAML config → HTTP source → engine → sink and checkpoints

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use solidafy_sync::emit::MemorySink;
use solidafy_sync::engine::SyncEngine;
use solidafy_sync::error_sink::{JsonlErrorSink, MemoryErrorSink};
use solidafy_sync::planner::WorkUnit;
use solidafy_sync::state::{
    CheckpointStore, FileCheckpointStore, IdCursor, MemoryCheckpointStore, SyncState,
};
use solidafy_sync::EngineConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn query(request: &Request, name: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Keyset-paginated API over ids `1..=total`
struct PagedApi {
    total: i64,
    /// Pages larger than this time out at the gateway
    max_take: u64,
    /// Id that makes any page containing it fail with 500
    poison: Option<i64>,
    requests: Arc<AtomicUsize>,
}

impl Respond for PagedApi {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let after: i64 = query(request, "after").map_or(0, |v| v.parse().unwrap());
        let skip: i64 = query(request, "skip").map_or(0, |v| v.parse().unwrap());
        let take: u64 = query(request, "take").map_or(1000, |v| v.parse().unwrap());

        if take > self.max_take {
            return ResponseTemplate::new(504).set_body_string("gateway timeout");
        }

        let first = after + skip + 1;
        let last = std::cmp::min(first + take as i64 - 1, self.total);
        if let Some(poison) = self.poison {
            if first <= poison && poison <= last {
                return ResponseTemplate::new(500).set_body_string("internal error");
            }
        }

        let data: Vec<_> = (first..=last)
            .map(|id| {
                json!({
                    "GiftId": id,
                    "Amount": format!("${id},000.50"),
                    "GiftDate": "03/15/2024 10:30:00",
                })
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "data": data, "count": data.len() }))
    }
}

fn gifts_config(uri: &str) -> String {
    format!(
        r#"
workers: 3
retry:
  max_retries: 5
  initial_backoff_ms: 0
  max_backoff_ms: 0
streams:
  - name: gifts
    mode: id_cursor
    http:
      base_url: "{uri}"
      path: /gifts
      records_path: data
      id_field: GiftId
      max_retries: 0
      headers:
        Authorization: Bearer test-token
    mapping:
      table: gifts
      primary_key: [gift_id]
      columns:
        - column: gift_id
          source: GiftId
          type: integer
          required: true
        - column: amount
          source: Amount
          type: float
        - column: gift_date
          source: GiftDate
          type: datetime
"#
    )
}

#[tokio::test]
async fn test_id_stream_end_to_end() {
    init_tracing();
    let server = MockServer::start().await;
    let requests = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/gifts"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(PagedApi {
            total: 1234,
            max_take: 250,
            poison: None,
            requests: requests.clone(),
        })
        .mount(&server)
        .await;

    let config = EngineConfig::from_yaml_str(&gifts_config(&server.uri())).unwrap();
    let specs = config.stream_specs().unwrap();
    let sink = Arc::new(MemorySink::new());
    let store = Arc::new(MemoryCheckpointStore::new());
    let errors = Arc::new(MemoryErrorSink::new());
    let engine = SyncEngine::new(sink.clone(), store.clone(), errors.clone(), config).unwrap();

    let summaries = engine.run_streams(&specs).await.unwrap();

    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.records_fetched, 1234);
    assert_eq!(summary.units_failed, 0);
    assert!(summary.retries > 0);
    assert!(summary.exhausted);
    assert_eq!(
        summary.final_state,
        SyncState::IdCursor(IdCursor::at(1234, 1234))
    );
    assert!(errors.is_empty().await);

    assert_eq!(sink.count("gifts").await, 1234);
    let row = sink.row("gifts", "7").await.unwrap();
    assert_eq!(row["gift_id"], json!(7));
    assert_eq!(row["amount"], json!(7000.5));
    assert_eq!(row["gift_date"], json!("2024-03-15T10:30:00Z"));

    // Nothing new: one round of empty pages, no rows touched
    let before = requests.load(Ordering::SeqCst);
    let again = engine.run_streams(&specs).await.unwrap();
    assert_eq!(again[0].records_fetched, 0);
    assert!(requests.load(Ordering::SeqCst) - before <= 3 * 3);
    assert_eq!(sink.count("gifts").await, 1234);
}

#[tokio::test]
async fn test_poison_page_is_recorded_and_run_resumes() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gifts"))
        .respond_with(PagedApi {
            total: 600,
            max_take: 1000,
            poison: Some(300),
            requests: Arc::new(AtomicUsize::new(0)),
        })
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let errors_path = dir.path().join("errors.jsonl");

    let config = EngineConfig::from_yaml_str(&gifts_config(&server.uri())).unwrap();
    let specs = config.stream_specs().unwrap();
    let sink = Arc::new(MemorySink::new());
    let engine = SyncEngine::new(
        sink.clone(),
        Arc::new(FileCheckpointStore::open(&state_path).unwrap()),
        Arc::new(JsonlErrorSink::new(&errors_path)),
        config.clone(),
    )
    .unwrap();

    let summary = engine.run(&specs[0]).await.unwrap();

    assert_eq!(summary.units_failed, 1);
    assert_eq!(summary.records_fetched, 599);
    assert!(sink.row("gifts", "300").await.is_none());

    let recorded = JsonlErrorSink::read_all(&errors_path).await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].stream, "gifts");
    assert_eq!(recorded[0].error_kind, "retryable_fetch");
    assert_eq!(recorded[0].work_unit, WorkUnit::id_page(Some(299), 0, 1));
    assert_eq!(recorded[0].attempt_count, 6);

    // A fresh process picks up from the file and finds nothing left
    let engine = SyncEngine::new(
        Arc::new(MemorySink::new()),
        Arc::new(FileCheckpointStore::open(&state_path).unwrap()),
        Arc::new(MemoryErrorSink::new()),
        config,
    )
    .unwrap();
    let resumed = engine.run(&specs[0]).await.unwrap();
    assert_eq!(resumed.records_fetched, 0);
    assert_eq!(resumed.final_state, summary.final_state);
}

/// Time-filtered API with one event per day since 2024-01-01
struct EventsApi {
    until: DateTime<Utc>,
}

fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

impl Respond for EventsApi {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let parse = |name: &str| {
            query(request, name)
                .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };
        let (Some(start), Some(end)) = (parse("from"), parse("to")) else {
            return ResponseTemplate::new(400);
        };

        let mut events = Vec::new();
        let mut ts = day(2024, 1, 1);
        let mut id = 1;
        while ts < self.until {
            if ts >= start && ts < end {
                events.push(json!({"id": id, "updated_at": ts.to_rfc3339()}));
            }
            ts += Duration::days(1);
            id += 1;
        }
        ResponseTemplate::new(200).set_body_json(json!({ "results": { "items": events } }))
    }
}

#[tokio::test]
async fn test_time_stream_partitions() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(EventsApi {
            until: day(2024, 7, 1),
        })
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
workers: 2
streams:
  - name: events
    mode: time_cursor
    start_date: "2024-01-01T00:00:00Z"
    http:
      base_url: "{}"
      path: /events
      records_path: results.items
      params:
        start: from
        end: to
    partitions:
      - id: "1"
        query:
          list: "1"
      - id: "2"
        query:
          list: "2"
"#,
        server.uri()
    );
    let config = EngineConfig::from_yaml_str(&yaml).unwrap();
    let specs = config.stream_specs().unwrap();
    assert_eq!(specs.len(), 2);

    let sink = Arc::new(MemorySink::new());
    let store = Arc::new(MemoryCheckpointStore::new());
    let engine = SyncEngine::new(
        sink.clone(),
        store.clone(),
        Arc::new(MemoryErrorSink::new()),
        config,
    )
    .unwrap();

    let summaries = engine.run_streams(&specs).await.unwrap();

    // 2024 is a leap year: Jan 1 to Jul 1 is 182 days
    for summary in &summaries {
        assert_eq!(summary.records_fetched, 182);
        assert!(summary.exhausted);
        match &summary.final_state {
            SyncState::TimeCursor(cursor) => {
                assert_eq!(cursor.total_synced, 182);
                assert!(cursor.last_sync_time.is_some());
            }
            other => panic!("expected time cursor, got {other:?}"),
        }
    }
    assert_eq!(summaries[0].stream, "events:1");
    assert_eq!(summaries[1].stream, "events:2");
    assert_eq!(sink.count("events").await, 182);
    assert_eq!(store.snapshot().await.streams.len(), 2);
}
