//! Row sinks
//!
//! The `Sink` trait is the warehouse boundary. Every write is keyed by
//! primary key, so replaying the same operations leaves the same state.

use super::types::{Row, RowOp};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Destination for normalized rows
#[async_trait]
pub trait Sink: Send + Sync {
    /// Insert or replace the row stored under `key`
    async fn upsert(&self, table: &str, key: &str, row: &Row) -> Result<()>;

    /// Remove the row stored under `key` (no-op if absent)
    async fn delete(&self, table: &str, key: &str) -> Result<()>;

    /// Apply a sequence of operations in order
    async fn apply(&self, ops: &[RowOp]) -> Result<()> {
        for op in ops {
            match op {
                RowOp::Upsert { table, key, row } => self.upsert(table, key, row).await?,
                RowOp::Delete { table, key } => self.delete(table, key).await?,
            }
        }
        Ok(())
    }
}

type Tables = HashMap<String, BTreeMap<String, Row>>;

/// In-memory sink keyed by table then primary key
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    tables: Arc<RwLock<Tables>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row of a table, ordered by key
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Row stored under `key`
    pub async fn row(&self, table: &str, key: &str) -> Option<Row> {
        self.tables.read().await.get(table)?.get(key).cloned()
    }

    /// Number of rows in a table
    pub async fn count(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map_or(0, BTreeMap::len)
    }

    /// Names of the tables written so far
    pub async fn tables(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Full copy of the sink contents
    pub async fn snapshot(&self) -> HashMap<String, BTreeMap<String, Row>> {
        self.tables.read().await.clone()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn upsert(&self, table: &str, key: &str, row: &Row) -> Result<()> {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), row.clone());
        Ok(())
    }

    async fn delete(&self, table: &str, key: &str) -> Result<()> {
        if let Some(rows) = self.tables.write().await.get_mut(table) {
            rows.remove(key);
        }
        Ok(())
    }
}
