//! Emitter
//!
//! Runs every record of a unit through the transformer, then writes the
//! resulting operations to the sink in record order.

use super::sink::Sink;
use super::transform::Transformer;
use super::types::{EmitReport, RowOp};
use crate::error::{ErrorClass, Result};
use crate::types::{JsonValue, RowErrorPolicy};
use std::sync::Arc;
use tracing::{debug, warn};

/// Converts raw records into rows and upserts them into a sink
#[derive(Clone)]
pub struct Emitter {
    transformer: Arc<dyn Transformer>,
    sink: Arc<dyn Sink>,
    policy: RowErrorPolicy,
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Emitter {
    /// Create an emitter
    pub fn new(
        transformer: Arc<dyn Transformer>,
        sink: Arc<dyn Sink>,
        policy: RowErrorPolicy,
    ) -> Self {
        Self {
            transformer,
            sink,
            policy,
        }
    }

    /// Row error policy in use
    pub fn policy(&self) -> RowErrorPolicy {
        self.policy
    }

    /// Transform and write `records`.
    ///
    /// Nothing reaches the sink unless every record either transformed or
    /// was skipped by policy. Under `RowErrorPolicy::Fail` the first bad row
    /// is returned as an error.
    pub async fn emit(&self, stream: &str, records: &[JsonValue]) -> Result<EmitReport> {
        let mut report = EmitReport::new();
        let mut ops: Vec<RowOp> = Vec::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            match self.transformer.transform(record) {
                Ok(mut record_ops) => ops.append(&mut record_ops),
                Err(e) if e.class() == ErrorClass::Transform => match self.policy {
                    RowErrorPolicy::Skip => {
                        warn!(stream, index, error = %e, "Skipping record that failed to transform");
                        report.skipped += 1;
                        report.errors.push(e.to_string());
                    }
                    RowErrorPolicy::Fail => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }

        self.sink.apply(&ops).await?;

        for op in &ops {
            if op.is_upsert() {
                report.upserted += 1;
            } else {
                report.deleted += 1;
            }
        }

        debug!(
            stream,
            upserted = report.upserted,
            deleted = report.deleted,
            skipped = report.skipped,
            "Emitted records"
        );

        Ok(report)
    }
}
