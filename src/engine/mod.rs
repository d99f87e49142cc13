//! Execution engine module
//!
//! The plan/fetch/commit loop for one or more streams.
//!
//! # Overview
//!
//! The engine module provides:
//! - `SyncEngine` - Runs streams against a row sink, checkpoint store and error sink
//! - `StreamSpec` - Source, transformer and initial state for one stream
//! - `SyncSummary` - What one run did
//! - `StopHandle` - Cooperative stop between units
//!
//! Fetches run on the worker pool; planning, retry decisions, emission and
//! checkpoints all happen on the single loop in [`SyncEngine::run`], so the
//! committed state only ever moves forward in unit order.

mod types;

pub use types::{StopHandle, StreamSpec, SyncSummary};

use crate::config::EngineConfig;
use crate::emit::{Emitter, Sink};
use crate::error::{Error, ErrorClass, Result};
use crate::error_sink::{record_best_effort, ErrorRecord, ErrorSink};
use crate::fetch::WorkerPool;
use crate::planner::{BatchPlanner, Plan, PlanContext, WorkUnit};
use crate::retry::{Decision, RetryController, UnitAttempt};
use crate::state::{CheckpointStore, SyncState};
use crate::types::JsonValue;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Sync engine for adaptive cursor/batch extraction
pub struct SyncEngine {
    /// Destination of emitted rows
    sink: Arc<dyn Sink>,
    /// Committed cursor per stream
    store: Arc<dyn CheckpointStore>,
    /// Destination of fatal units
    error_sink: Arc<dyn ErrorSink>,
    /// Engine configuration
    config: EngineConfig,
    planner: BatchPlanner,
    controller: RetryController,
    pool: WorkerPool,
    stop: StopHandle,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("planner", &self.planner)
            .field("controller", &self.controller)
            .field("pool", &self.pool)
            .field("skip_on_fatal", &self.config.skip_on_fatal)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create a new sync engine, validating `config`
    pub fn new(
        sink: Arc<dyn Sink>,
        store: Arc<dyn CheckpointStore>,
        error_sink: Arc<dyn ErrorSink>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let sizing = config.sizing_policy()?;
        let planner = BatchPlanner::new(sizing.clone(), config.workers);
        let controller = RetryController::new(config.retry_policy(), sizing);
        let pool = WorkerPool::new(config.workers).with_fetch_timeout(config.fetch_timeout());

        Ok(Self {
            sink,
            store,
            error_sink,
            config,
            planner,
            controller,
            pool,
            stop: StopHandle::new(),
        })
    }

    /// Get the engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the checkpoint store
    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Handle that stops any run of this engine between units
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Sync one stream until it is caught up, stopped, halted or limited
    pub async fn run(&self, spec: &StreamSpec) -> Result<SyncSummary> {
        let started = std::time::Instant::now();
        let mut state = self
            .store
            .load_or(&spec.name, spec.initial.clone())
            .await?;
        if state.mode() != spec.initial.mode() {
            return Err(Error::config(format!(
                "stream '{}' has {:?} state but is configured as {:?}",
                spec.name,
                state.mode(),
                spec.initial.mode()
            )));
        }

        if let SyncState::IdCursor(cursor) = &mut state {
            if spec.rescan_modified && cursor.begin_pass() {
                info!(
                    stream = %spec.name,
                    modified_since = ?cursor.modified_since,
                    "Starting pass over modified records"
                );
            }
        }

        info!(
            stream = %spec.name,
            mode = ?state.mode(),
            total_synced = state.total_synced(),
            "Starting stream sync"
        );

        let mut run = StreamRun {
            engine: self,
            spec,
            emitter: Emitter::new(
                Arc::clone(&spec.transformer),
                Arc::clone(&self.sink),
                self.config.emit.row_error_policy,
            ),
            summary: SyncSummary::new(&spec.name, state.clone()),
            state,
            ctx: PlanContext::new(Utc::now()),
            stop: self.stop.subscribe(),
            deadline: self.config.run_timeout().map(|limit| Instant::now() + limit),
        };
        run.execute().await?;

        let mut summary = run.summary;
        summary.final_state = run.state;
        summary.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            stream = %summary.stream,
            records = summary.records_fetched,
            upserted = summary.rows_upserted,
            deleted = summary.rows_deleted,
            skipped = summary.rows_skipped,
            committed = summary.units_committed,
            failed = summary.units_failed,
            retries = summary.retries,
            exhausted = summary.exhausted,
            stopped = summary.stopped,
            duration_ms = summary.duration_ms,
            "Stream sync finished"
        );
        Ok(summary)
    }

    /// Sync several streams one after another, each with its own state.
    ///
    /// Stops early when the stop handle fires; an aborting error ends the call.
    pub async fn run_streams(&self, specs: &[StreamSpec]) -> Result<Vec<SyncSummary>> {
        let mut summaries = Vec::with_capacity(specs.len());
        for spec in specs {
            if self.stop.is_stopped() {
                info!(stream = %spec.name, "Stop requested, not starting stream");
                break;
            }
            summaries.push(self.run(spec).await?);
        }
        Ok(summaries)
    }
}

/// How a batch ended
enum Flow {
    /// Plan again from the committed state
    Replan,
    /// The run is over
    End,
}

/// How a resolved unit affects the rest of its batch
enum UnitFlow {
    /// Keep consuming the batch
    Next,
    /// Drop the rest of the batch and plan again
    Replan,
    /// Stop the stream at this unit
    Halt,
}

/// Final outcome of a unit after its retries
enum Resolution {
    Success(Vec<JsonValue>),
    Fatal(Error),
    Stopped,
}

/// Mutable state of one stream run
struct StreamRun<'a> {
    engine: &'a SyncEngine,
    spec: &'a StreamSpec,
    emitter: Emitter,
    state: SyncState,
    ctx: PlanContext,
    summary: SyncSummary,
    stop: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl StreamRun<'_> {
    async fn execute(&mut self) -> Result<()> {
        loop {
            if self.should_stop() {
                self.summary.stopped = true;
                return Ok(());
            }

            self.ctx.units_remaining = self.units_remaining();
            let units = match self.engine.planner.plan(&self.state, &self.ctx) {
                Plan::Units(units) => units,
                Plan::Complete => return self.finish().await,
            };

            debug!(
                stream = %self.spec.name,
                units = units.len(),
                first = %units[0],
                "Planned batch"
            );

            match self.run_batch(units).await? {
                Flow::Replan => {}
                Flow::End => return Ok(()),
            }
        }
    }

    /// Mark the stream caught up when the planner has nothing left
    async fn finish(&mut self) -> Result<()> {
        let end = self.ctx.end;
        let rescan = self.spec.rescan_modified;
        let (caught_up, changed) = match &mut self.state {
            SyncState::TimeCursor(cursor) if cursor.window_start >= end => {
                cursor.complete(end);
                (true, true)
            }
            SyncState::TimeCursor(_) => (false, false),
            SyncState::IdCursor(cursor) if self.ctx.exhausted && rescan => {
                cursor.complete_pass(end);
                (true, true)
            }
            SyncState::IdCursor(_) => (self.ctx.exhausted, false),
        };

        self.summary.exhausted = caught_up;
        if changed {
            self.commit().await?;
        }
        Ok(())
    }

    async fn run_batch(&mut self, units: Vec<WorkUnit>) -> Result<Flow> {
        let mut results = self
            .engine
            .pool
            .fetch_batch(Arc::clone(&self.spec.source), units);

        while results.remaining() > 0 {
            let next = tokio::select! {
                biased;
                () = self.stopped() => None,
                fetched = results.next() => Some(fetched),
            };
            let Some(fetched) = next else {
                results.abort();
                self.summary.stopped = true;
                return Ok(Flow::End);
            };
            let Some(fetched) = fetched else {
                return Err(Error::state(format!(
                    "fetch task for stream '{}' ended without a result",
                    self.spec.name
                )));
            };

            let mut attempt = UnitAttempt::new(fetched.unit);
            attempt.start();
            let flow = match self.resolve(&mut attempt, fetched.result).await? {
                Resolution::Success(records) => self.commit_success(&attempt, records).await?,
                Resolution::Fatal(error) => self.commit_fatal(&attempt, error, None).await?,
                Resolution::Stopped => {
                    results.abort();
                    self.summary.stopped = true;
                    return Ok(Flow::End);
                }
            };

            match flow {
                UnitFlow::Next => {}
                UnitFlow::Replan => return Ok(Flow::Replan),
                UnitFlow::Halt => return Ok(Flow::End),
            }
            if self.units_remaining() == Some(0) || self.should_stop() {
                return Ok(Flow::Replan);
            }
        }
        Ok(Flow::Replan)
    }

    /// Drive one unit through its retries until it succeeds or gives up
    async fn resolve(
        &mut self,
        attempt: &mut UnitAttempt,
        mut result: Result<Vec<JsonValue>>,
    ) -> Result<Resolution> {
        loop {
            let error = match result {
                Ok(records) => {
                    attempt.succeed();
                    return Ok(Resolution::Success(records));
                }
                Err(e) => e,
            };

            let (unit, delay) = match self.engine.controller.on_failure(attempt, &error) {
                Decision::Retry { unit, delay } => (unit, delay),
                Decision::Fatal => return Ok(Resolution::Fatal(error)),
                Decision::Abort => {
                    error!(
                        stream = %self.spec.name,
                        unit = %attempt.current,
                        error = %error,
                        "Aborting run"
                    );
                    return Err(error);
                }
            };

            self.summary.retries += 1;
            warn!(
                stream = %self.spec.name,
                unit = %attempt.planned,
                retry = %unit,
                attempt = attempt.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying with a smaller unit"
            );

            if !delay.is_zero() {
                let stopped = tokio::select! {
                    biased;
                    () = self.stopped() => true,
                    () = tokio::time::sleep(delay) => false,
                };
                if stopped {
                    return Ok(Resolution::Stopped);
                }
            }

            self.engine.controller.requeue(attempt);
            attempt.start();
            let fetched = tokio::select! {
                biased;
                () = self.stopped() => None,
                fetched = self.engine.pool.fetch_one(self.spec.source.as_ref(), unit) => Some(fetched),
            };
            match fetched {
                Some(fetched) => result = fetched.result,
                None => return Ok(Resolution::Stopped),
            }
        }
    }

    /// Emit a successful unit's rows, then checkpoint past it
    async fn commit_success(
        &mut self,
        attempt: &UnitAttempt,
        records: Vec<JsonValue>,
    ) -> Result<UnitFlow> {
        let mut max_id = None;
        if matches!(self.state, SyncState::IdCursor(_)) {
            match self.max_record_id(&records) {
                Ok(id) => max_id = id,
                Err(e) => return self.commit_fatal(attempt, e, Some(records.len())).await,
            }
        }

        let report = match self.emitter.emit(&self.spec.name, &records).await {
            Ok(report) => report,
            Err(e) if e.class() == ErrorClass::Transform => {
                return self.commit_fatal(attempt, e, Some(records.len())).await;
            }
            Err(e) => return Err(e),
        };

        let unit = &attempt.current;
        let count = records.len() as u64;
        let mut exhausted = false;
        match (&mut self.state, unit) {
            (SyncState::IdCursor(cursor), WorkUnit::IdPage { take, .. }) => {
                if let Some(max_id) = max_id {
                    cursor.advance(max_id, count);
                }
                exhausted = count < *take;
            }
            (SyncState::TimeCursor(cursor), WorkUnit::TimeWindow { end, .. }) => {
                cursor.advance(*end, count);
                cursor.window_size = self
                    .engine
                    .planner
                    .policy()
                    .windows
                    .after_volume(cursor.window_size, count);
            }
            _ => return Err(mode_mismatch(&self.spec.name, unit)),
        }
        self.commit().await?;

        self.summary.records_fetched += count;
        self.summary.rows_upserted += report.upserted as u64;
        self.summary.rows_deleted += report.deleted as u64;
        self.summary.rows_skipped += report.skipped as u64;
        self.summary.units_committed += 1;
        self.ctx.exhausted = exhausted;

        debug!(
            stream = %self.spec.name,
            unit = %unit,
            attempt = attempt.attempts,
            records = count,
            exhausted,
            "Committed unit"
        );

        if attempt.was_shrunk() {
            if self.engine.planner.policy().sticky_shrink {
                self.ctx.size_hint = Some(unit.size());
            }
            return Ok(UnitFlow::Replan);
        }
        if exhausted {
            return Ok(UnitFlow::Replan);
        }
        Ok(UnitFlow::Next)
    }

    /// Record a unit that gave up, then skip past it or halt the stream.
    ///
    /// `fetched` is the number of records the unit returned when the fetch
    /// itself succeeded; only those are skipped, so records the source adds
    /// later in a short page's range are still picked up.
    async fn commit_fatal(
        &mut self,
        attempt: &UnitAttempt,
        error: Error,
        fetched: Option<usize>,
    ) -> Result<UnitFlow> {
        let unit = &attempt.current;
        error!(
            stream = %self.spec.name,
            unit = %unit,
            attempt = attempt.attempts,
            error = %error,
            "Unit failed"
        );

        let record = ErrorRecord::new(
            self.spec.name.as_str(),
            unit.clone(),
            attempt.attempts,
            &error,
        );
        record_best_effort(self.engine.error_sink.as_ref(), &record).await;
        self.summary.units_failed += 1;

        if !self.engine.config.skip_on_fatal {
            warn!(stream = %self.spec.name, unit = %unit, "Halting stream at failed unit");
            self.summary.halted_at = Some(unit.clone());
            return Ok(UnitFlow::Halt);
        }

        let mut exhausted = false;
        match (&mut self.state, unit) {
            (SyncState::IdCursor(cursor), WorkUnit::IdPage { take, .. }) => {
                let count = fetched.map_or(*take, |n| (n as u64).min(*take));
                exhausted = count < *take;
                cursor.skip_past(count);
            }
            (SyncState::TimeCursor(cursor), WorkUnit::TimeWindow { end, .. }) => {
                cursor.advance(*end, 0);
            }
            _ => return Err(mode_mismatch(&self.spec.name, unit)),
        }
        self.commit().await?;
        self.ctx.exhausted = exhausted;

        if attempt.was_shrunk() || exhausted {
            return Ok(UnitFlow::Replan);
        }
        Ok(UnitFlow::Next)
    }

    async fn commit(&self) -> Result<()> {
        self.engine.store.commit(&self.spec.name, &self.state).await
    }

    /// Highest cursor id in `records`; every record must carry one
    fn max_record_id(&self, records: &[JsonValue]) -> Result<Option<i64>> {
        let mut max_id = None;
        for (index, record) in records.iter().enumerate() {
            let id = self
                .spec
                .source
                .record_id(record)
                .ok_or_else(|| Error::decode(format!("record {index} has no usable id")))?;
            max_id = Some(max_id.map_or(id, |max: i64| max.max(id)));
        }
        Ok(max_id)
    }

    fn units_remaining(&self) -> Option<usize> {
        match self.engine.config.max_units {
            0 => None,
            max => Some(max.saturating_sub(self.summary.units_resolved() as usize)),
        }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.map_or(false, |deadline| Instant::now() >= deadline)
    }

    fn should_stop(&self) -> bool {
        *self.stop.borrow() || self.deadline_passed()
    }

    /// Resolves once a stop is requested or the run deadline passes
    async fn stopped(&self) {
        let mut rx = self.stop.clone();
        let signal = async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    futures::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = signal => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => signal.await,
        }
    }
}

fn mode_mismatch(stream: &str, unit: &WorkUnit) -> Error {
    Error::state(format!(
        "unit {unit} does not match the cursor mode of stream '{stream}'"
    ))
}
