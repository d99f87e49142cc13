//! REST source
//!
//! `HttpSource` answers work units by calling one REST endpoint, passing the
//! unit's cursor, offset, page size or window bounds as query parameters
//! and pulling the records out of the JSON response.

use super::client::{HttpClient, HttpClientConfig, RequestConfig};
use super::rate_limit::{HeaderThrottleConfig, RateLimiterConfig};
use crate::error::{Error, Result};
use crate::fetch::{record_id_field, Source};
use crate::planner::WorkUnit;
use crate::types::{lookup_path, BackoffType, JsonValue, StringMap};
use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// HTTP method used for fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET request
    #[default]
    Get,
    /// POST request with the static body
    Post,
}

/// Query parameter names for unit bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamNames {
    /// Id cursor (`id > after`); omitted on the first page
    pub after: String,
    /// Offset past the cursor
    pub skip: String,
    /// Page size
    pub take: String,
    /// Window start (inclusive)
    pub start: String,
    /// Window end (exclusive)
    pub end: String,
    /// Lower bound on modification time for id pages; unset means the API
    /// has no such filter
    pub modified_since: Option<String>,
}

impl Default for ParamNames {
    fn default() -> Self {
        Self {
            after: "after".to_string(),
            skip: "skip".to_string(),
            take: "take".to_string(),
            start: "start".to_string(),
            end: "end".to_string(),
            modified_since: None,
        }
    }
}

/// Configuration of a REST endpoint serving work units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    /// API base URL
    pub base_url: String,
    /// Endpoint path relative to the base URL
    pub path: String,
    /// Request method
    #[serde(default)]
    pub method: HttpMethod,
    /// Static headers (API keys, bearer tokens)
    #[serde(default)]
    pub headers: StringMap,
    /// Static query parameters
    #[serde(default)]
    pub query: StringMap,
    /// Static JSON body for POST query endpoints
    #[serde(default)]
    pub body: Option<JsonValue>,
    /// Where the records live in the response (dot path or JSONPath)
    #[serde(default)]
    pub records_path: Option<String>,
    /// Record field holding the cursor id
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Query parameter names
    #[serde(default)]
    pub params: ParamNames,
    /// `rfc3339`, `unix`, or a chrono format string for window bounds
    #[serde(default = "default_datetime_format")]
    pub datetime_format: String,
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// In-request retries before the failure reaches the engine
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Token bucket limit
    #[serde(default)]
    pub rate_limit: Option<RateLimiterConfig>,
    /// Header-driven pause
    #[serde(default)]
    pub header_throttle: Option<HeaderThrottleConfig>,
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_datetime_format() -> String {
    "rfc3339".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    1
}

impl HttpSourceConfig {
    /// Create a config for `base_url` + `path` with defaults elsewhere
    pub fn new(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: path.into(),
            method: HttpMethod::default(),
            headers: StringMap::new(),
            query: StringMap::new(),
            body: None,
            records_path: None,
            id_field: default_id_field(),
            params: ParamNames::default(),
            datetime_format: default_datetime_format(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            rate_limit: None,
            header_throttle: None,
        }
    }

    /// Check the config is usable
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.base_url)?;
        if self.timeout_secs == 0 {
            return Err(Error::invalid_value("http.timeout_secs", "must be positive"));
        }
        if self.id_field.is_empty() {
            return Err(Error::invalid_value("http.id_field", "must not be empty"));
        }
        if !matches!(self.datetime_format.as_str(), "rfc3339" | "unix")
            && StrftimeItems::new(&self.datetime_format).any(|item| matches!(item, Item::Error))
        {
            return Err(Error::invalid_value(
                "http.datetime_format",
                format!("'{}' is not a valid strftime format", self.datetime_format),
            ));
        }
        Ok(())
    }

    /// Format a window bound for the API
    pub fn format_datetime(&self, value: DateTime<Utc>) -> String {
        match self.datetime_format.as_str() {
            "rfc3339" => value.to_rfc3339_opts(SecondsFormat::Secs, true),
            "unix" => value.timestamp().to_string(),
            format => value.format(format).to_string(),
        }
    }
}

/// `Source` backed by a REST endpoint
#[derive(Debug)]
pub struct HttpSource {
    config: HttpSourceConfig,
    client: HttpClient,
}

impl HttpSource {
    /// Create a source, validating the config and building the client
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = HttpClientConfig::builder()
            .base_url(&config.base_url)
            .timeout(Duration::from_secs(config.timeout_secs))
            .max_retries(config.max_retries)
            .backoff(
                BackoffType::Exponential,
                Duration::from_millis(500),
                Duration::from_secs(30),
            )
            .no_rate_limit();
        if let Some(rate_limit) = &config.rate_limit {
            builder = builder.rate_limit(rate_limit.clone());
        }
        if let Some(throttle) = &config.header_throttle {
            builder = builder.header_throttle(throttle.clone());
        }
        for (key, value) in &config.headers {
            builder = builder.header(key, value);
        }

        let client = HttpClient::with_config(builder.build())?;
        Ok(Self { config, client })
    }

    /// Get the source configuration
    pub fn config(&self) -> &HttpSourceConfig {
        &self.config
    }

    /// Request parameters for a unit
    pub fn request_for(&self, unit: &WorkUnit) -> RequestConfig {
        let mut request = RequestConfig::new();

        let mut statics: Vec<_> = self.config.query.iter().collect();
        statics.sort();
        for (key, value) in statics {
            request = request.query(key, value);
        }

        let params = &self.config.params;
        match unit {
            WorkUnit::IdPage {
                after,
                offset,
                take,
                modified_since,
            } => {
                if let Some(after) = after {
                    request = request.query(&params.after, after.to_string());
                }
                request = request
                    .query(&params.skip, offset.to_string())
                    .query(&params.take, take.to_string());
                if let (Some(name), Some(since)) = (&params.modified_since, modified_since) {
                    request = request.query(name, self.config.format_datetime(*since));
                }
            }
            WorkUnit::TimeWindow { start, end } => {
                request = request
                    .query(&params.start, self.config.format_datetime(*start))
                    .query(&params.end, self.config.format_datetime(*end));
            }
        }

        if let Some(body) = &self.config.body {
            request = request.json(body.clone());
        }
        request
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn fetch(&self, unit: &WorkUnit) -> Result<Vec<JsonValue>> {
        let method = match self.config.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let response: JsonValue = self
            .client
            .request_json(method, &self.config.path, self.request_for(unit))
            .await?;

        extract_records(&response, self.config.records_path.as_deref())
    }

    fn record_id(&self, record: &JsonValue) -> Option<i64> {
        record_id_field(record, &self.config.id_field)
    }
}

/// Pull the record list out of a response body
pub fn extract_records(value: &JsonValue, path: Option<&str>) -> Result<Vec<JsonValue>> {
    let Some(path) = path else {
        return Ok(match value {
            JsonValue::Array(items) => items.clone(),
            other => vec![other.clone()],
        });
    };

    if path.contains('*') {
        return extract_with_jsonpath(value, path);
    }

    match lookup_path(value, path) {
        Some(JsonValue::Array(items)) => Ok(items.clone()),
        Some(JsonValue::Null) | None => Ok(Vec::new()),
        Some(other) => Ok(vec![other.clone()]),
    }
}

/// Extract records using jsonpath-rust
fn extract_with_jsonpath(value: &JsonValue, path: &str) -> Result<Vec<JsonValue>> {
    use jsonpath_rust::JsonPath;

    let jp = JsonPath::try_from(path).map_err(|e| Error::JsonPath {
        message: format!("Invalid JSONPath: {e}"),
    })?;

    match jp.find(value) {
        JsonValue::Array(items) => Ok(items),
        JsonValue::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}
