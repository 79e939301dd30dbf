//! Transport collaborator.
//!
//! The executor only needs "send a request, observe a cancellation handle,
//! hand back something with a status, headers and a text body". That seam is
//! [`Transport`]; [`ReqwestTransport`] is the production implementation.

use std::future::Future;

use reqwest::{header::HeaderMap, Method, StatusCode};
use tokio_util::sync::CancellationToken;

/// A fully resolved request for one attempt.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    /// Already-encoded body.
    pub body: Option<String>,
}

/// Transport-level failure.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport observed the attempt's cancellation handle.
    #[error("request cancelled")]
    Cancelled,
    /// No response could be obtained (DNS, connect, reset, body read).
    #[error("transport error: {0}")]
    Unreachable(String),
}

/// Response surface the decoder relies on.
pub trait TransportResponse: Send {
    fn status(&self) -> StatusCode;

    /// Header lookup by case-insensitive name. Non-UTF-8 values read as absent.
    fn header(&self, name: &str) -> Option<&str>;

    /// Consumes the response and reads the whole body as text.
    fn text(self) -> impl Future<Output = Result<String, TransportError>> + Send;
}

/// Sends one attempt.
///
/// Implementations should stop work promptly once `cancel` fires and may
/// report that with [`TransportError::Cancelled`]. The executor also drops
/// the returned future when the attempt is cancelled.
pub trait Transport: Send + Sync {
    type Response: TransportResponse;

    fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Self::Response, TransportError>> + Send;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client (proxies, TLS roots, user agent).
    ///
    /// Timeouts are enforced per attempt by the executor; a client-level
    /// timeout set here surfaces as a network failure instead.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Transport for ReqwestTransport {
    type Response = reqwest::Response;

    fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Self::Response, TransportError>> + Send {
        let mut builder = self
            .http
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                result = builder.send() => result.map_err(transport_error),
            }
        }
    }
}

impl TransportResponse for reqwest::Response {
    fn status(&self) -> StatusCode {
        reqwest::Response::status(self)
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    fn text(self) -> impl Future<Output = Result<String, TransportError>> + Send {
        async move { reqwest::Response::text(self).await.map_err(transport_error) }
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    TransportError::Unreachable(err.to_string())
}
