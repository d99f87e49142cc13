//! Request pacing: a client-side token bucket and a server-reported budget
//!
//! Uses the governor crate for token bucket rate limiting, plus a
//! header-driven throttle that pauses requests when the API reports its
//! remaining budget is nearly spent.

use chrono::Utc;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Reset values above this are unix timestamps rather than seconds-from-now
const EPOCH_RESET_THRESHOLD: u64 = 1_000_000_000;

/// Token bucket settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Steady-state refill rate
    pub requests_per_second: u32,
    /// Requests allowed back to back before pacing starts
    pub burst_size: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst_size: 10,
        }
    }
}

impl RateLimiterConfig {
    /// Bucket refilling at `requests_per_second`
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            burst_size,
        }
    }
}

/// governor-backed token bucket shared across workers
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<Governor<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>,
}

impl RateLimiter {
    /// Build the bucket, clamping zero values to one
    pub fn new(config: &RateLimiterConfig) -> Self {
        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rate).allow_burst(burst);

        Self {
            limiter: Arc::new(Governor::direct(quota)),
        }
    }

    /// Wait until a request can be made
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }

    /// Take a token if one is available, without waiting
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish()
    }
}

// ============================================================================
// Header Throttle
// ============================================================================

/// Which response headers report the remaining request budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderThrottleConfig {
    /// Header with the requests left in the current period
    #[serde(default = "default_remaining_header")]
    pub remaining_header: String,
    /// Header with the reset time (seconds from now, or a unix timestamp)
    #[serde(default = "default_reset_header")]
    pub reset_header: String,
    /// Pause once remaining drops to this value or below
    #[serde(default = "default_low_water")]
    pub low_water: u64,
    /// Longest pause taken on a single observation
    #[serde(default = "default_max_pause_secs")]
    pub max_pause_secs: u64,
}

fn default_remaining_header() -> String {
    "x-ratelimit-remaining".to_string()
}

fn default_reset_header() -> String {
    "x-ratelimit-reset".to_string()
}

fn default_low_water() -> u64 {
    1
}

fn default_max_pause_secs() -> u64 {
    300
}

impl Default for HeaderThrottleConfig {
    fn default() -> Self {
        Self {
            remaining_header: default_remaining_header(),
            reset_header: default_reset_header(),
            low_water: default_low_water(),
            max_pause_secs: default_max_pause_secs(),
        }
    }
}

/// Pauses requests until the API's rate limit window resets
#[derive(Debug, Clone)]
pub struct HeaderThrottle {
    config: HeaderThrottleConfig,
    paused_until: Arc<Mutex<Option<Instant>>>,
}

impl HeaderThrottle {
    /// Create a throttle
    pub fn new(config: HeaderThrottleConfig) -> Self {
        Self {
            config,
            paused_until: Arc::new(Mutex::new(None)),
        }
    }

    /// Pause implied by a response's headers, if any
    pub fn pause_for(&self, headers: &HeaderMap) -> Option<Duration> {
        let remaining: u64 = header_value(headers, &self.config.remaining_header)?;
        if remaining > self.config.low_water {
            return None;
        }

        let reset: u64 = header_value(headers, &self.config.reset_header)?;
        let secs = if reset > EPOCH_RESET_THRESHOLD {
            reset.saturating_sub(Utc::now().timestamp().max(0) as u64)
        } else {
            reset
        };

        Some(Duration::from_secs(secs.min(self.config.max_pause_secs)))
    }

    /// Record a response; schedules a pause when the budget is nearly spent
    pub fn observe(&self, headers: &HeaderMap) {
        let Some(pause) = self.pause_for(headers) else {
            return;
        };
        if pause.is_zero() {
            return;
        }

        info!(
            pause_secs = pause.as_secs(),
            "Rate limit nearly exhausted, pausing requests"
        );
        let until = Instant::now() + pause;
        if let Ok(mut paused_until) = self.paused_until.lock() {
            *paused_until = Some(paused_until.map_or(until, |current| current.max(until)));
        }
    }

    /// Wait out any scheduled pause
    pub async fn wait(&self) {
        let until = self.paused_until.lock().ok().and_then(|guard| *guard);
        if let Some(until) = until {
            tokio::time::sleep_until(until).await;
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .split('.')
        .next()?
        .parse()
        .ok()
}

#[cfg(test)]
mod rate_limit_tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(remaining: &str, reset: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-ratelimit-remaining",
            HeaderValue::from_str(remaining).unwrap(),
        );
        headers.insert("x-ratelimit-reset", HeaderValue::from_str(reset).unwrap());
        headers
    }

    #[test]
    fn test_rate_limiter_config_default() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.requests_per_second, 10);
        assert_eq!(config.burst_size, 10);
    }

    #[tokio::test]
    async fn test_rate_limiter_allows_burst() {
        let limiter = RateLimiter::new(&RateLimiterConfig::new(10, 5));

        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_rate_limiter_zero_config() {
        let limiter = RateLimiter::new(&RateLimiterConfig::new(0, 0));
        limiter.wait().await;
    }

    #[test]
    fn test_header_throttle_pause() {
        let throttle = HeaderThrottle::new(HeaderThrottleConfig::default());

        assert_eq!(throttle.pause_for(&headers("50", "30")), None);
        assert_eq!(
            throttle.pause_for(&headers("1", "30")),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            throttle.pause_for(&headers("0", "10000")),
            Some(Duration::from_secs(300))
        );
        assert_eq!(throttle.pause_for(&HeaderMap::new()), None);
    }

    #[test]
    fn test_header_throttle_epoch_reset() {
        let throttle = HeaderThrottle::new(HeaderThrottleConfig::default());
        let reset = (Utc::now().timestamp() + 20).to_string();

        let pause = throttle.pause_for(&headers("0", &reset)).unwrap();
        assert!(pause <= Duration::from_secs(20));
        assert!(pause >= Duration::from_secs(18));
    }

    #[tokio::test]
    async fn test_header_throttle_wait() {
        let throttle = HeaderThrottle::new(HeaderThrottleConfig::default());
        let start = Instant::now();

        throttle.wait().await;
        assert!(start.elapsed() < Duration::from_millis(100));

        throttle.observe(&headers("0", "1"));
        throttle.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
