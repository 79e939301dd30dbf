//! `portal-http` is the resilient request core of the housing portal.
//!
//! Every call to the portal REST API goes through one entry point,
//! [`PortalClient::request`], reached through the verbs:
//! - [`PortalClient::get`]
//! - [`PortalClient::post`]
//! - [`PortalClient::put`]
//! - [`PortalClient::patch`]
//! - [`PortalClient::delete`]
//!
//! Each call enforces a per-attempt timeout and honors an optional caller
//! [`CancellationToken`](tokio_util::sync::CancellationToken). Timed-out
//! attempts are retried with an escalating timeout. Every failure surfaces as
//! exactly one [`RequestError`] variant.

mod attempt;
mod client;
mod config;
pub mod decode;
mod error;
mod options;
pub mod transport;
mod types;

pub use client::PortalClient;
pub use config::{ClientConfig, RetryPolicy, DEFAULT_BASE_URL};
pub use error::{ErrorKind, ErrorReport, RequestError};
pub use options::RequestOptions;
pub use types::{Body, Payload};

pub use reqwest::{header, Method, StatusCode};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, RequestError>;
