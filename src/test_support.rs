//! In-memory sources used by unit tests

use crate::error::{Error, Result};
use crate::fetch::Source;
use crate::planner::WorkUnit;
use crate::types::JsonValue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

type FailureRule = dyn Fn(&WorkUnit, usize) -> Option<Error> + Send + Sync;

/// Source serving records from a fixed list, with optional scripted failures
pub struct MockSource {
    ids: Vec<i64>,
    timestamps: Vec<(i64, DateTime<Utc>)>,
    modified: HashMap<i64, DateTime<Utc>>,
    calls: Mutex<Vec<WorkUnit>>,
    failure: Option<Box<FailureRule>>,
    delay: Option<Box<dyn Fn(&WorkUnit) -> Duration + Send + Sync>>,
}

impl MockSource {
    /// ID source with ids `1..=count`
    pub fn dense(count: i64) -> Self {
        Self::with_ids((1..=count).collect())
    }

    /// ID source with the given ids (sorted ascending)
    pub fn with_ids(mut ids: Vec<i64>) -> Self {
        ids.sort_unstable();
        Self {
            ids,
            timestamps: Vec::new(),
            modified: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            failure: None,
            delay: None,
        }
    }

    /// Time source with `(id, updated_at)` records
    pub fn timed(records: Vec<(i64, DateTime<Utc>)>) -> Self {
        Self {
            ids: Vec::new(),
            timestamps: records,
            modified: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            failure: None,
            delay: None,
        }
    }

    /// Fail a call when `rule(unit, call_index)` returns an error
    #[must_use]
    pub fn failing<F>(mut self, rule: F) -> Self
    where
        F: Fn(&WorkUnit, usize) -> Option<Error> + Send + Sync + 'static,
    {
        self.failure = Some(Box::new(rule));
        self
    }

    /// Sleep before answering each call
    #[must_use]
    pub fn delayed<F>(mut self, delay: F) -> Self
    where
        F: Fn(&WorkUnit) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    /// Mark `ids` as modified at `at`; unmarked ids were never modified
    #[must_use]
    pub fn modified(mut self, ids: &[i64], at: DateTime<Utc>) -> Self {
        self.modified.extend(ids.iter().map(|&id| (id, at)));
        self
    }

    fn modified_at(&self, id: i64) -> DateTime<Utc> {
        self.modified
            .get(&id)
            .copied()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Every unit fetched so far, in call order
    pub fn calls(&self) -> Vec<WorkUnit> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Source for MockSource {
    async fn fetch(&self, unit: &WorkUnit) -> Result<Vec<JsonValue>> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(unit.clone());
            calls.len() - 1
        };

        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(unit)).await;
        }

        if let Some(rule) = &self.failure {
            if let Some(err) = rule(unit, call_index) {
                return Err(err);
            }
        }

        match unit {
            WorkUnit::IdPage {
                after,
                offset,
                take,
                modified_since,
            } => Ok(self
                .ids
                .iter()
                .filter(|&&id| after.map_or(true, |a| id > a))
                .filter(|&&id| modified_since.map_or(true, |since| self.modified_at(id) >= since))
                .skip(*offset as usize)
                .take(*take as usize)
                .map(|id| json!({"id": id, "name": format!("record {id}")}))
                .collect()),
            WorkUnit::TimeWindow { start, end } => Ok(self
                .timestamps
                .iter()
                .filter(|(_, ts)| ts >= start && ts < end)
                .map(|(id, ts)| json!({"id": id, "updated_at": ts.to_rfc3339()}))
                .collect()),
        }
    }
}
