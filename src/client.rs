use std::{fmt, sync::Arc, time::Duration};

use reqwest::{
    header::{self, HeaderName, HeaderValue},
    Method,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    attempt::{AbortCause, AttemptFailure, AttemptScope},
    decode::decode_response,
    transport::{ReqwestTransport, Transport, TransportRequest},
    Body, ClientConfig, Payload, RequestError, RequestOptions, Result, RetryPolicy,
};

/// Request client for the portal REST API.
///
/// Every verb routes through [`PortalClient::request`], which enforces the
/// per-attempt timeout, honors the caller's cancellation signal and retries
/// timed-out attempts with an escalating timeout. Clones share configuration
/// and transport.
pub struct PortalClient<T = ReqwestTransport> {
    transport: Arc<T>,
    config: Arc<ClientConfig>,
}

impl<T> Clone for PortalClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: Arc::clone(&self.config),
        }
    }
}

impl<T> fmt::Debug for PortalClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .config
            .default_headers()
            .iter()
            .map(|(name, value)| {
                let shown = if *name == header::AUTHORIZATION || *name == header::COOKIE {
                    "<redacted>"
                } else {
                    value.to_str().unwrap_or("<binary>")
                };
                (name.as_str(), shown)
            })
            .collect();
        f.debug_struct("PortalClient")
            .field("base_url", &self.config.base_url())
            .field("policy", self.config.policy())
            .field("default_headers", &headers)
            .finish()
    }
}

impl PortalClient<ReqwestTransport> {
    /// Creates a client for `base_url` with the default [`RetryPolicy`].
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self::from_config(ClientConfig::new(base_url))
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self::with_transport(config, ReqwestTransport::new())
    }

    /// Creates a client from `PORTAL_API_BASE_URL` and `PORTAL_HTTP_*`.
    ///
    /// Never fails: unset or malformed values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_config(ClientConfig::from_env())
    }
}

impl<T: Transport> PortalClient<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            config: Arc::new(config),
        }
    }

    /// Replaces the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.config = Arc::new(self.config.as_ref().clone().with_policy(policy));
        self
    }

    /// Adds a header sent with every request, e.g. `Authorization`.
    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        let config = self.config.as_ref().clone();
        self.config = Arc::new(config.with_default_header(name, value));
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<Payload> {
        self.request(Method::GET, path, None, options).await
    }

    pub async fn post<B: Into<Body>>(
        &self,
        path: &str,
        body: B,
        options: RequestOptions,
    ) -> Result<Payload> {
        self.request(Method::POST, path, Some(body.into()), options)
            .await
    }

    pub async fn put<B: Into<Body>>(
        &self,
        path: &str,
        body: B,
        options: RequestOptions,
    ) -> Result<Payload> {
        self.request(Method::PUT, path, Some(body.into()), options)
            .await
    }

    pub async fn patch<B: Into<Body>>(
        &self,
        path: &str,
        body: B,
        options: RequestOptions,
    ) -> Result<Payload> {
        self.request(Method::PATCH, path, Some(body.into()), options)
            .await
    }

    pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<Payload> {
        self.request(Method::DELETE, path, None, options).await
    }

    /// Issues one logical call.
    ///
    /// Only timed-out attempts are retried, and only while
    /// `options.retry_on_timeout` is set. A failure status, an undecodable
    /// body, an unreachable server or a caller cancel ends the call at once.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Body>,
        options: RequestOptions,
    ) -> Result<Payload> {
        let policy = self.config.policy();
        let url = self.config.url_for(path);
        let headers = self.config.merged_headers(&options.headers);
        let body = body.map(Body::into_text);
        let signal = options.signal.as_ref();

        let total_attempts = policy.total_attempts(options.retry_on_timeout);
        let mut timeout_ms = policy.initial_timeout(options.timeout_ms);

        for attempt in 0..total_attempts {
            if signal.is_some_and(CancellationToken::is_cancelled) {
                #[cfg(feature = "tracing")]
                tracing::debug!(%method, %url, attempt, "request cancelled by caller");
                return Err(RequestError::Aborted);
            }

            let request = TransportRequest {
                method: method.clone(),
                url: url.clone(),
                headers: headers.clone(),
                body: body.clone(),
            };

            let scope = AttemptScope::arm(Duration::from_millis(timeout_ms), signal);
            let outcome = scope
                .run(send_and_decode(self.transport.as_ref(), request, scope.token()))
                .await;
            drop(scope);

            match outcome {
                Ok(payload) => return Ok(payload),
                Err(AttemptFailure::Classified(err)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%method, %url, kind = err.kind().as_label(), "request failed");
                    return Err(err);
                }
                Err(AttemptFailure::Network(detail)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%method, %url, %detail, "server unreachable");
                    return Err(RequestError::Network { detail });
                }
                Err(AttemptFailure::Aborted(AbortCause::Timeout)) => {
                    if attempt + 1 >= total_attempts {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            %method,
                            %url,
                            timeout_ms,
                            attempts = total_attempts,
                            "request timed out"
                        );
                        return Err(RequestError::Timeout {
                            timeout_ms,
                            attempts: total_attempts,
                        });
                    }

                    let next_timeout_ms = policy.next_timeout(timeout_ms);
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        %method,
                        %url,
                        attempt,
                        timeout_ms,
                        next_timeout_ms,
                        delay_ms = policy.retry_delay_ms,
                        "attempt timed out, retrying"
                    );
                    timeout_ms = next_timeout_ms;
                    self.wait_before_retry(signal).await?;
                }
                Err(AttemptFailure::Aborted(_cause)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%method, %url, attempt, cause = ?_cause, "request aborted");
                    return Err(RequestError::Aborted);
                }
            }
        }

        Err(RequestError::Unknown)
    }

    /// Waits the fixed inter-attempt delay.
    ///
    /// A caller cancel during the wait ends the call with `Aborted`.
    async fn wait_before_retry(&self, signal: Option<&CancellationToken>) -> Result<()> {
        let delay = self.config.policy().retry_delay();
        match signal {
            Some(signal) => tokio::select! {
                biased;
                _ = signal.cancelled() => Err(RequestError::Aborted),
                _ = sleep(delay) => Ok(()),
            },
            None => {
                sleep(delay).await;
                Ok(())
            }
        }
    }
}

async fn send_and_decode<T: Transport>(
    transport: &T,
    request: TransportRequest,
    cancel: CancellationToken,
) -> std::result::Result<Payload, AttemptFailure> {
    let response = transport.send(request, cancel).await?;
    decode_response(response).await
}

#[cfg(test)]
mod tests {
    use reqwest::header::{self, HeaderValue};

    use super::PortalClient;
    use crate::RetryPolicy;

    #[test]
    fn debug_redacts_authorization_value() {
        let client = PortalClient::new("https://portal.example/api").with_default_header(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer secret-token"),
        );
        let debug = format!("{client:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("application/json"));
    }

    #[test]
    fn with_policy_normalizes_and_keeps_base_url() {
        let client = PortalClient::new("https://portal.example/api/").with_policy(RetryPolicy {
            timeout_ms: 5_000,
            max_timeout_ms: 1_000,
            ..RetryPolicy::default()
        });
        assert_eq!(client.config().base_url(), "https://portal.example/api");
        assert_eq!(client.config().policy().max_timeout_ms, 5_000);
    }
}
