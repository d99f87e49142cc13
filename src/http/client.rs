//! Retrying reqwest wrapper used by [`HttpSource`](super::HttpSource)
//!
//! Every send is classified into a [`Verdict`]: hand the response back, wait
//! and resend, or give up with a typed [`Error`]. Errors keep the
//! [`ErrorClass`](crate::error::ErrorClass) the engine needs to decide between
//! shrinking a unit and abandoning it.

use super::rate_limit::{HeaderThrottle, HeaderThrottleConfig, RateLimiter, RateLimiterConfig};
use crate::error::{Error, Result};
use crate::types::{BackoffType, StringMap};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Settings shared by every request a client makes
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Prefix for relative paths
    pub base_url: Option<String>,
    /// Per-request deadline enforced by reqwest
    pub timeout: Duration,
    /// Resends after the first attempt
    pub max_retries: u32,
    /// First backoff step
    pub initial_backoff: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
    /// How the delay grows between resends
    pub backoff_type: BackoffType,
    /// Client-side token bucket
    pub rate_limit: Option<RateLimiterConfig>,
    /// Server-reported budget tracking
    pub header_throttle: Option<HeaderThrottleConfig>,
    /// Headers attached to every request
    pub default_headers: StringMap,
    /// `User-Agent` value
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(60),
            backoff_type: BackoffType::Exponential,
            rate_limit: Some(RateLimiterConfig::default()),
            header_throttle: None,
            default_headers: StringMap::new(),
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientConfig {
    /// Start from the defaults
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }
}

/// Chained setters over [`HttpClientConfig`]
#[derive(Default)]
pub struct HttpClientConfigBuilder {
    inner: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Prefix for relative request paths
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.inner.base_url = Some(url.into());
        self
    }

    /// Per-request deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.inner.timeout = timeout;
        self
    }

    /// Resends after the first attempt
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.inner.max_retries = retries;
        self
    }

    /// Delay curve between resends
    pub fn backoff(mut self, kind: BackoffType, initial: Duration, cap: Duration) -> Self {
        self.inner.backoff_type = kind;
        self.inner.initial_backoff = initial;
        self.inner.max_backoff = cap;
        self
    }

    /// Replace the token bucket settings
    pub fn rate_limit(mut self, limits: RateLimiterConfig) -> Self {
        self.inner.rate_limit = Some(limits);
        self
    }

    /// Send without a token bucket
    pub fn no_rate_limit(mut self) -> Self {
        self.inner.rate_limit = None;
        self
    }

    /// Track `X-RateLimit-*` response headers
    pub fn header_throttle(mut self, throttle: HeaderThrottleConfig) -> Self {
        self.inner.header_throttle = Some(throttle);
        self
    }

    /// Attach a header to every request
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.default_headers.insert(name.into(), value.into());
        self
    }

    /// Override the `User-Agent`
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.inner.user_agent = agent.into();
        self
    }

    /// Finish
    pub fn build(self) -> HttpClientConfig {
        self.inner
    }
}

/// Per-call additions on top of [`HttpClientConfig`]
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    /// Query pairs, kept in the order they were added
    pub query: Vec<(String, String)>,
    /// Extra headers, applied after the defaults
    pub headers: StringMap,
    /// JSON payload
    pub body: Option<Value>,
    /// Resend budget for this call only
    pub max_retries: Option<u32>,
}

impl RequestConfig {
    /// Empty request additions
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a query pair
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set a header
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Attach a JSON payload
    #[must_use]
    pub fn json(mut self, payload: Value) -> Self {
        self.body = Some(payload);
        self
    }

    /// Override the resend budget
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// What to do after one send
enum Verdict {
    Done(Response),
    Resend { after: Duration, cause: Error },
    GiveUp(Error),
}

/// reqwest client with pacing, resends and typed failures
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    limiter: Option<RateLimiter>,
    throttle: Option<HeaderThrottle>,
}

impl HttpClient {
    /// Build the underlying reqwest client and pacing state
    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| Error::config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            limiter: config.rate_limit.as_ref().map(RateLimiter::new),
            throttle: config.header_throttle.clone().map(HeaderThrottle::new),
            client,
            config,
        })
    }

    /// Settings this client was built with
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// `GET` with no per-call additions
    pub async fn get(&self, path: &str) -> Result<Response> {
        self.request(Method::GET, path, RequestConfig::new()).await
    }

    /// `GET` and decode the body as JSON
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request_json(Method::GET, path, RequestConfig::new())
            .await
    }

    /// Send until the response is usable or the resend budget runs out.
    ///
    /// Non-2xx statuses come back as errors: 401/403 as [`Error::Auth`],
    /// 429 as [`Error::RateLimited`] and everything else as
    /// [`Error::HttpStatus`]. Deadline misses become [`Error::Timeout`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        extra: RequestConfig,
    ) -> Result<Response> {
        let url = self.resolve(path);
        let budget = extra.max_retries.unwrap_or(self.config.max_retries);

        for attempt in 0..=budget {
            self.pace().await;

            let sent = self.prepare(method.clone(), &url, &extra).send().await;
            let verdict = match sent {
                Ok(response) => self.judge_response(response, attempt).await,
                Err(e) => self.judge_transport(e, attempt),
            };

            match verdict {
                Verdict::Done(response) => {
                    debug!(%method, %url, attempt, "response accepted");
                    return Ok(response);
                }
                Verdict::GiveUp(err) => return Err(err),
                Verdict::Resend { cause, .. } if attempt == budget => return Err(cause),
                Verdict::Resend { after, cause } => {
                    warn!(
                        %url,
                        attempt = attempt + 1,
                        budget,
                        delay_ms = after.as_millis() as u64,
                        error = %cause,
                        "resending request"
                    );
                    tokio::time::sleep(after).await;
                }
            }
        }

        Err(Error::MaxRetriesExceeded {
            max_retries: budget,
        })
    }

    /// Send and decode the body as JSON
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        extra: RequestConfig,
    ) -> Result<T> {
        let text = self.request(method, path, extra).await?.text().await?;
        serde_json::from_str(&text).map_err(|e| Error::decode(format!("response is not JSON: {e}")))
    }

    /// Delay before resend number `attempt + 1`
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        self.config
            .backoff_type
            .delay(attempt, self.config.initial_backoff, self.config.max_backoff)
    }

    async fn pace(&self) {
        if let Some(throttle) = &self.throttle {
            throttle.wait().await;
        }
        if let Some(limiter) = &self.limiter {
            limiter.wait().await;
        }
    }

    fn prepare(&self, method: Method, url: &str, extra: &RequestConfig) -> RequestBuilder {
        let headers = self.config.default_headers.iter().chain(&extra.headers);
        let mut req = headers.fold(self.client.request(method, url), |req, (k, v)| {
            req.header(k.as_str(), v.as_str())
        });
        if !extra.query.is_empty() {
            req = req.query(&extra.query);
        }
        if let Some(payload) = &extra.body {
            req = req.json(payload);
        }
        req
    }

    async fn judge_response(&self, response: Response, attempt: u32) -> Verdict {
        if let Some(throttle) = &self.throttle {
            throttle.observe(response.headers());
        }

        let status = response.status();
        if status.is_success() || status.is_redirection() || status.is_informational() {
            return Verdict::Done(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let after = retry_after(&response).unwrap_or_else(|| self.calculate_backoff(attempt));
            return Verdict::Resend {
                after,
                cause: Error::RateLimited {
                    retry_after_seconds: after.as_secs(),
                },
            };
        }

        let code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Verdict::GiveUp(Error::auth(format!("HTTP {code}: {body}")))
            }
            _ if resendable(status) => Verdict::Resend {
                after: self.calculate_backoff(attempt),
                cause: Error::http_status(code, body),
            },
            _ => Verdict::GiveUp(Error::http_status(code, body)),
        }
    }

    fn judge_transport(&self, err: reqwest::Error, attempt: u32) -> Verdict {
        let after = self.calculate_backoff(attempt);
        if err.is_timeout() {
            Verdict::Resend {
                after,
                cause: Error::Timeout {
                    timeout_ms: self.config.timeout.as_millis() as u64,
                },
            }
        } else if err.is_connect() {
            Verdict::Resend {
                after,
                cause: Error::Http(err),
            }
        } else {
            Verdict::GiveUp(Error::Http(err))
        }
    }

    fn resolve(&self, path: &str) -> String {
        let absolute = path.starts_with("http://") || path.starts_with("https://");
        match &self.config.base_url {
            Some(base) if !absolute => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            _ => path.to_string(),
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.config.base_url)
            .field("max_retries", &self.config.max_retries)
            .field("limited", &self.limiter.is_some())
            .field("throttled", &self.throttle.is_some())
            .finish_non_exhaustive()
    }
}

/// Gateway and origin failures worth sending again
fn resendable(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        500 | 502 | 503 | 504 | 520 | 521 | 522 | 523 | 524
    )
}

/// `Retry-After` in its delta-seconds form
fn retry_after(response: &Response) -> Option<Duration> {
    let raw = response.headers().get(reqwest::header::RETRY_AFTER)?;
    raw.to_str().ok()?.trim().parse().ok().map(Duration::from_secs)
}
