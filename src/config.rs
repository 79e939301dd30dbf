use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

pub const BASE_URL_ENV: &str = "PORTAL_API_BASE_URL";
pub const TIMEOUT_ENV: &str = "PORTAL_HTTP_TIMEOUT_MS";
pub const MAX_RETRIES_ENV: &str = "PORTAL_HTTP_MAX_RETRIES";
pub const MAX_TIMEOUT_ENV: &str = "PORTAL_HTTP_MAX_TIMEOUT_MS";
pub const BACKOFF_MULTIPLIER_ENV: &str = "PORTAL_HTTP_BACKOFF_MULTIPLIER";
pub const RETRY_DELAY_ENV: &str = "PORTAL_HTTP_RETRY_DELAY_MS";

/// Configures timeout escalation and retry behavior.
///
/// Constructed once at startup and never mutated; every client clone shares it.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Timeout of the first attempt in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Ceiling for the escalated per-attempt timeout in milliseconds.
    pub max_timeout_ms: u64,
    /// Factor applied to the timeout after each timed-out attempt. Always `>= 1`.
    pub backoff_multiplier: f64,
    /// Fixed pause between a timed-out attempt and the next one, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            max_retries: 2,
            max_timeout_ms: 60_000,
            backoff_multiplier: 2.0,
            retry_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Reads the policy from `PORTAL_HTTP_*` environment variables.
    ///
    /// Missing or malformed values fall back to [`RetryPolicy::default`]
    /// field by field.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RetryPolicy::from_env`] but resolves keys through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let policy = Self {
            timeout_ms: read_setting(&lookup, TIMEOUT_ENV, parse_positive_u64)
                .unwrap_or(defaults.timeout_ms),
            max_retries: read_setting(&lookup, MAX_RETRIES_ENV, |raw| {
                raw.parse::<usize>().ok().filter(|value| *value > 0)
            })
            .unwrap_or(defaults.max_retries),
            max_timeout_ms: read_setting(&lookup, MAX_TIMEOUT_ENV, parse_positive_u64)
                .unwrap_or(defaults.max_timeout_ms),
            backoff_multiplier: read_setting(&lookup, BACKOFF_MULTIPLIER_ENV, |raw| {
                raw.parse::<f64>()
                    .ok()
                    .filter(|value| value.is_finite() && *value >= 1.0)
            })
            .unwrap_or(defaults.backoff_multiplier),
            retry_delay_ms: read_setting(&lookup, RETRY_DELAY_ENV, parse_positive_u64)
                .unwrap_or(defaults.retry_delay_ms),
        };
        policy.normalized()
    }

    /// Raises the ceiling to the starting timeout and repairs an invalid multiplier.
    pub fn normalized(mut self) -> Self {
        if self.timeout_ms == 0 {
            self.timeout_ms = Self::default().timeout_ms;
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            self.backoff_multiplier = Self::default().backoff_multiplier;
        }
        self.max_timeout_ms = self.max_timeout_ms.max(self.timeout_ms);
        self
    }

    /// Timeout of the first attempt, honoring a positive per-call override.
    ///
    /// An override of zero is ignored, so every attempt keeps a deadline.
    /// The result never exceeds the ceiling.
    pub fn initial_timeout(&self, override_ms: Option<u64>) -> u64 {
        override_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(self.timeout_ms)
            .min(self.max_timeout_ms)
    }

    /// Timeout for the attempt following a timed-out one.
    ///
    /// Monotonic: the result lies in `[current, max(current, ceiling)]`.
    pub fn next_timeout(&self, current_ms: u64) -> u64 {
        let ceiling = self.max_timeout_ms.max(current_ms);
        let scaled = (current_ms as f64 * self.backoff_multiplier).round();
        let next = if scaled.is_finite() && scaled < ceiling as f64 {
            scaled as u64
        } else {
            ceiling
        };
        next.clamp(current_ms, ceiling)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Total attempts allowed for one logical call.
    pub fn total_attempts(&self, retry_on_timeout: bool) -> usize {
        if retry_on_timeout {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }
}

/// Immutable client configuration: base address, retry policy and default headers.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    base_url: String,
    policy: RetryPolicy,
    default_headers: HeaderMap,
}

impl ClientConfig {
    pub fn new(base_url: impl AsRef<str>) -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            base_url: normalize_base_url(base_url.as_ref()),
            policy: RetryPolicy::default(),
            default_headers,
        }
    }

    /// Reads `PORTAL_API_BASE_URL` and the `PORTAL_HTTP_*` retry settings.
    ///
    /// An unset or blank base URL falls back to [`DEFAULT_BASE_URL`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(BASE_URL_ENV)
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        Self::new(base_url).with_policy(RetryPolicy::from_lookup(lookup))
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy.normalized();
        self
    }

    /// Adds or replaces a header sent with every request.
    pub fn with_default_header(
        mut self,
        name: header::HeaderName,
        value: HeaderValue,
    ) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    /// Joins `path` onto the base URL.
    ///
    /// Example: base `"https://portal.example/api/"` and path `"bookings"`
    /// give `"https://portal.example/api/bookings"`.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    /// Default headers overlaid with per-call `overrides`.
    pub(crate) fn merged_headers(&self, overrides: &HeaderMap) -> HeaderMap {
        let mut headers = self.default_headers.clone();
        for name in overrides.keys() {
            headers.remove(name);
            for value in overrides.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        headers
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_owned()
}

fn parse_positive_u64(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|value| *value > 0)
}

fn read_setting<F, T>(lookup: &F, key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        #[cfg(feature = "tracing")]
        tracing::warn!(key, value = %raw, "ignoring malformed setting, using default");
    }
    parsed
}
