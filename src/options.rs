use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;

/// Per-call options.
#[derive(Clone, Debug)]
pub struct RequestOptions {
    /// Timeout override for the first attempt in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Headers added to, or replacing, the client's default headers.
    pub headers: HeaderMap,
    /// Whether a timed-out attempt may be resent. Disable for non-idempotent calls.
    pub retry_on_timeout: bool,
    /// External cancellation handle.
    pub signal: Option<CancellationToken>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            headers: HeaderMap::new(),
            retry_on_timeout: true,
            signal: None,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the first attempt's timeout.
    ///
    /// Zero does not disable the deadline: the policy's `timeout_ms` is used
    /// instead. Values above `max_timeout_ms` are clamped to it.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn retry_on_timeout(mut self, retry: bool) -> Self {
        self.retry_on_timeout = retry;
        self
    }

    /// Shorthand for `retry_on_timeout(false)`.
    pub fn no_retry(self) -> Self {
        self.retry_on_timeout(false)
    }

    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}
