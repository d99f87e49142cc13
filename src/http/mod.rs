//! HTTP module
//!
//! Retrying, rate-limited HTTP client and the REST [`Source`](crate::fetch::Source)
//! built on it.
//!
//! # Features
//!
//! - **Automatic Retries**: Configurable retry logic with backoff
//! - **Rate Limiting**: Token bucket rate limiter using governor
//! - **Header Throttle**: Pauses when `X-RateLimit-Remaining` runs low
//! - **REST Source**: Maps work units onto query parameters

mod client;
mod rate_limit;
mod source;

pub use client::{HttpClient, HttpClientConfig, HttpClientConfigBuilder, RequestConfig};
pub use rate_limit::{HeaderThrottle, HeaderThrottleConfig, RateLimiter, RateLimiterConfig};
pub use source::{extract_records, HttpMethod, HttpSource, HttpSourceConfig, ParamNames};
