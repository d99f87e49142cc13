//! Error sink implementations

use super::types::ErrorRecord;
use crate::emit::{Row, Sink};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error};

/// Default table used by [`TableErrorSink`]
pub const DEFAULT_ERROR_TABLE: &str = "sync_errors";

/// Append-only destination for irrecoverable unit failures
#[async_trait]
pub trait ErrorSink: Send + Sync {
    /// Persist one error record
    async fn record(&self, record: &ErrorRecord) -> Result<()>;
}

/// Record an error, logging and swallowing any failure to write it
pub async fn record_best_effort(sink: &dyn ErrorSink, record: &ErrorRecord) {
    if let Err(e) = sink.record(record).await {
        error!(
            stream = %record.stream,
            unit = %record.work_unit,
            error = %e,
            "Failed to write error record"
        );
    }
}

// ============================================================================
// Memory Sink
// ============================================================================

/// In-memory error sink
#[derive(Debug, Clone, Default)]
pub struct MemoryErrorSink {
    records: Arc<RwLock<Vec<ErrorRecord>>>,
}

impl MemoryErrorSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record written so far
    pub async fn records(&self) -> Vec<ErrorRecord> {
        self.records.read().await.clone()
    }

    /// Number of records written
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Check if nothing was written
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ErrorSink for MemoryErrorSink {
    async fn record(&self, record: &ErrorRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }
}

// ============================================================================
// JSON Lines Sink
// ============================================================================

/// Appends one JSON object per line to a file
#[derive(Debug)]
pub struct JsonlErrorSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlErrorSink {
    /// Create a sink appending to `path` (created on first write)
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back from a JSON Lines file
    pub async fn read_all(path: impl AsRef<Path>) -> Result<Vec<ErrorRecord>> {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect()
    }
}

#[async_trait]
impl ErrorSink for JsonlErrorSink {
    async fn record(&self, record: &ErrorRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(path = %self.path.display(), stream = %record.stream, "Appended error record");
        Ok(())
    }
}

// ============================================================================
// Table Sink
// ============================================================================

/// Writes error records as rows of an error table in the row sink
#[derive(Clone)]
pub struct TableErrorSink {
    sink: Arc<dyn Sink>,
    table: String,
}

impl std::fmt::Debug for TableErrorSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableErrorSink")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl TableErrorSink {
    /// Create a sink writing to [`DEFAULT_ERROR_TABLE`]
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self::with_table(sink, DEFAULT_ERROR_TABLE)
    }

    /// Create a sink writing to `table`
    pub fn with_table(sink: Arc<dyn Sink>, table: impl Into<String>) -> Self {
        Self {
            sink,
            table: table.into(),
        }
    }

    /// Get the table name
    pub fn table(&self) -> &str {
        &self.table
    }

    fn row(record: &ErrorRecord) -> Result<Row> {
        let row = json!({
            "stream": record.stream,
            "work_unit": record.work_unit.to_string(),
            "work_unit_json": serde_json::to_value(&record.work_unit)?,
            "attempt_count": record.attempt_count,
            "error_message": record.error_message,
            "error_kind": record.error_kind,
            "timestamp": record.timestamp.to_rfc3339(),
        });
        match row {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(Error::sink("error row is not an object")),
        }
    }
}

#[async_trait]
impl ErrorSink for TableErrorSink {
    async fn record(&self, record: &ErrorRecord) -> Result<()> {
        let key = format!(
            "{}|{}|{}",
            record.stream,
            record.work_unit,
            record.timestamp.timestamp_nanos_opt().unwrap_or_default()
        );
        self.sink.upsert(&self.table, &key, &Self::row(record)?).await
    }
}
