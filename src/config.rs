//! Engine configuration
//!
//! Everything the engine needs to run, loadable from YAML or JSON. Values
//! are validated before a run starts; a bad value is a configuration error
//! and nothing is fetched.

use crate::emit::{MappingTransformer, PassthroughTransformer, TableMapping, Transformer};
use crate::engine::StreamSpec;
use crate::error::{Error, Result};
use crate::fetch::DEFAULT_WORKERS;
use crate::http::{HttpSource, HttpSourceConfig};
use crate::planner::{SizeLadder, SizingPolicy, WindowSizing, DEFAULT_TAKE_SIZES};
use crate::retry::RetryPolicy;
use crate::state::SyncState;
use crate::types::{BackoffType, CursorMode, RowErrorPolicy, StringMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Top-Level Engine Config
// ============================================================================

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Concurrent fetches (also the number of units planned per batch)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Advance past units that failed beyond recovery
    #[serde(default = "default_true")]
    pub skip_on_fatal: bool,

    /// Stop after this many units resolve, committed or failed, per stream
    /// and run (0 = unlimited)
    #[serde(default)]
    pub max_units: usize,

    /// Bound on a single fetch
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,

    /// Bound on a whole run; the run stops cleanly when it elapses
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,

    /// Unit sizing
    #[serde(default)]
    pub sizing: SizingConfig,

    /// Unit retries
    #[serde(default)]
    pub retry: RetryConfig,

    /// Row handling
    #[serde(default)]
    pub emit: EmitConfig,

    /// HTTP streams
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            skip_on_fatal: true,
            max_units: 0,
            fetch_timeout_secs: None,
            run_timeout_secs: None,
            sizing: SizingConfig::default(),
            retry: RetryConfig::default(),
            emit: EmitConfig::default(),
            streams: Vec::new(),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Sizing of ID pages and time windows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Page sizes, largest first
    #[serde(default = "default_take_sizes")]
    pub take_sizes: Vec<u64>,

    /// Window size for streams with no history
    #[serde(default = "default_initial_window_days")]
    pub initial_window_days: i64,

    /// Windows are never halved below this
    #[serde(default = "default_min_window_days")]
    pub min_window_days: i64,

    /// Windows returning more records than this halve the default window
    #[serde(default = "default_large_window_threshold")]
    pub large_window_threshold: u64,

    /// Keep the shrunk size for the following batches of the run
    #[serde(default)]
    pub sticky_shrink: bool,
}

fn default_take_sizes() -> Vec<u64> {
    DEFAULT_TAKE_SIZES.to_vec()
}

fn default_initial_window_days() -> i64 {
    90
}

fn default_min_window_days() -> i64 {
    14
}

/// Longest window a config may ask for (about a century)
pub const MAX_WINDOW_DAYS: i64 = 36_500;

fn default_large_window_threshold() -> u64 {
    200_000
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            take_sizes: default_take_sizes(),
            initial_window_days: default_initial_window_days(),
            min_window_days: default_min_window_days(),
            large_window_threshold: default_large_window_threshold(),
            sticky_shrink: false,
        }
    }
}

impl SizingConfig {
    /// Build the sizing policy
    pub fn policy(&self) -> Result<SizingPolicy> {
        if self.min_window_days <= 0 {
            return Err(Error::invalid_value(
                "sizing.min_window_days",
                "must be positive",
            ));
        }
        if self.initial_window_days > MAX_WINDOW_DAYS {
            return Err(Error::invalid_value(
                "sizing.initial_window_days",
                format!("must not exceed {MAX_WINDOW_DAYS}"),
            ));
        }
        if self.initial_window_days < self.min_window_days {
            return Err(Error::invalid_value(
                "sizing.initial_window_days",
                "must not be smaller than min_window_days",
            ));
        }

        Ok(SizingPolicy {
            ladder: SizeLadder::new(self.take_sizes.clone())?,
            windows: WindowSizing {
                initial: chrono::Duration::days(self.initial_window_days),
                floor: chrono::Duration::days(self.min_window_days),
                large_window_threshold: self.large_window_threshold,
            },
            sticky_shrink: self.sticky_shrink,
        })
    }
}

/// Unit retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries per planned unit
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff strategy
    #[serde(default)]
    pub backoff: BackoffType,

    /// First backoff delay
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on backoff
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    2000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: BackoffType::default(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Build the retry policy
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// Row handling settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitConfig {
    /// What to do with rows that fail to transform
    #[serde(default)]
    pub row_error_policy: RowErrorPolicy,
}

/// One HTTP stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream name (state key)
    pub name: String,

    /// Cursor family
    #[serde(default)]
    pub mode: CursorMode,

    /// First window start for time streams with no history
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,

    /// Endpoint
    pub http: HttpSourceConfig,

    /// Row mapping; records are stored as-is keyed by `http.id_field` without one
    #[serde(default)]
    pub mapping: Option<TableMapping>,

    /// Independent partitions, each synced as its own stream
    #[serde(default)]
    pub partitions: Vec<PartitionConfig>,
}

/// A partition of a stream (e.g. one mailing list)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Partition id, appended to the stream name
    pub id: String,
    /// Extra query parameters for this partition
    #[serde(default)]
    pub query: StringMap,
}

impl StreamConfig {
    /// Check the stream is usable
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::missing_field("streams[].name"));
        }
        if self.mode == CursorMode::TimeCursor && self.http.params.modified_since.is_some() {
            return Err(Error::invalid_value(
                format!("streams.{}.http.params.modified_since", self.name),
                "only id cursor streams page by modification time",
            ));
        }
        if self.mode == CursorMode::TimeCursor && self.start_date.is_none() {
            return Err(Error::invalid_value(
                format!("streams.{}.start_date", self.name),
                "time cursor streams need a start_date",
            ));
        }
        self.http.validate()?;
        if let Some(mapping) = &self.mapping {
            mapping.validate()?;
        }
        Ok(())
    }

    /// Build one spec per partition (or a single spec without partitions)
    pub fn specs(&self, sizing: &SizingPolicy) -> Result<Vec<StreamSpec>> {
        let transformer: Arc<dyn Transformer> = match &self.mapping {
            Some(mapping) => Arc::new(MappingTransformer::new(mapping.clone())?),
            None => Arc::new(PassthroughTransformer::new(
                self.name.clone(),
                self.http.id_field.clone(),
            )),
        };

        let initial = match self.mode {
            CursorMode::IdCursor => SyncState::id_cursor(),
            CursorMode::TimeCursor => {
                let start = self.start_date.ok_or_else(|| {
                    Error::missing_field(format!("streams.{}.start_date", self.name))
                })?;
                SyncState::time_cursor(start, sizing.windows.initial)
            }
        };

        let rescan = self.http.params.modified_since.is_some();
        let spec = |name: String, http: HttpSourceConfig| -> Result<StreamSpec> {
            let source = HttpSource::new(http)?;
            let spec = StreamSpec::new(
                name,
                Arc::new(source),
                Arc::clone(&transformer),
                initial.clone(),
            );
            Ok(if rescan { spec.rescan_modified() } else { spec })
        };

        if self.partitions.is_empty() {
            return Ok(vec![spec(self.name.clone(), self.http.clone())?]);
        }

        self.partitions
            .iter()
            .map(|partition| {
                let mut http = self.http.clone();
                http.query.extend(partition.query.clone());
                spec(format!("{}:{}", self.name, partition.id), http)
            })
            .collect()
    }
}

// ============================================================================
// Loading and Validation
// ============================================================================

impl EngineConfig {
    /// Parse and validate a YAML config
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("Failed to parse engine JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; `.json` files are parsed as JSON, anything else as YAML
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                Error::config(format!(
                    "Failed to read config file '{}': {e}",
                    path.display()
                ))
            }
        })?;

        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Check every value
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_value("workers", "must be at least 1"));
        }
        if self.fetch_timeout_secs == Some(0) {
            return Err(Error::invalid_value("fetch_timeout_secs", "must be positive"));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(Error::invalid_value("run_timeout_secs", "must be positive"));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(Error::invalid_value(
                "retry.initial_backoff_ms",
                "must not exceed max_backoff_ms",
            ));
        }
        self.sizing.policy()?;

        let mut names = std::collections::HashSet::new();
        for stream in &self.streams {
            stream.validate()?;
            if !names.insert(stream.name.as_str()) {
                return Err(Error::invalid_value(
                    "streams",
                    format!("duplicate stream name '{}'", stream.name),
                ));
            }
        }
        Ok(())
    }

    /// Sizing policy
    pub fn sizing_policy(&self) -> Result<SizingPolicy> {
        self.sizing.policy()
    }

    /// Retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    /// Per-fetch timeout
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }

    /// Whole-run timeout
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Stream specs for every configured HTTP stream and partition
    pub fn stream_specs(&self) -> Result<Vec<StreamSpec>> {
        let sizing = self.sizing_policy()?;
        let mut specs = Vec::new();
        for stream in &self.streams {
            specs.extend(stream.specs(&sizing)?);
        }
        Ok(specs)
    }
}
