use serde::Serialize;

use crate::Payload;

/// Error type returned by this crate.
///
/// Every failed call ends in exactly one of these variants; see
/// [`RequestError::kind`] for the stable tag.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// Server responded with a non-success status.
    #[error("{message}")]
    Http {
        status: u16,
        /// Message extracted from the body, or a generated default.
        message: String,
        /// Decoded response body for callers that need machine detail.
        body: Payload,
    },
    /// No response within the escalating deadline across all permitted attempts.
    #[error("The request timed out. Please try again.")]
    Timeout {
        /// Timeout of the final attempt, in milliseconds.
        timeout_ms: u64,
        /// Number of attempts performed.
        attempts: usize,
    },
    /// The caller cancelled the request.
    #[error("The request was cancelled.")]
    Aborted,
    /// The transport could not reach the server.
    #[error("Unable to reach the server. Please check your connection and try again.")]
    Network {
        /// Transport diagnostic, kept out of the display message.
        detail: String,
    },
    /// A body was received but could not be interpreted.
    #[error("Received an unexpected response from the server.")]
    Decode,
    /// A failure that fits no other variant.
    #[error("The request failed for an unexpected reason.")]
    Unknown,
}

/// Stable tag of a [`RequestError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    HttpError,
    Timeout,
    Aborted,
    Network,
    Decode,
    Unknown,
}

impl ErrorKind {
    /// Returns the tag as used in reports and logs.
    pub fn as_label(self) -> &'static str {
        match self {
            ErrorKind::HttpError => "HTTP_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Aborted => "ABORTED",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Decode => "DECODE",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

/// Serializable `{kind, message, ...}` view of an error, for UI banners.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<usize>,
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RequestError::Http { .. } => ErrorKind::HttpError,
            RequestError::Timeout { .. } => ErrorKind::Timeout,
            RequestError::Aborted => ErrorKind::Aborted,
            RequestError::Network { .. } => ErrorKind::Network,
            RequestError::Decode => ErrorKind::Decode,
            RequestError::Unknown => ErrorKind::Unknown,
        }
    }

    /// HTTP status for [`RequestError::Http`].
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Only timeouts are evidence of a transient condition.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RequestError::Timeout { .. })
    }

    pub fn report(&self) -> ErrorReport {
        let mut report = ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            status: None,
            body: None,
            timeout_ms: None,
            attempts: None,
        };
        match self {
            RequestError::Http { status, body, .. } => {
                report.status = Some(*status);
                report.body = (!body.is_empty()).then(|| body.clone());
            }
            RequestError::Timeout {
                timeout_ms,
                attempts,
            } => {
                report.timeout_ms = Some(*timeout_ms);
                report.attempts = Some(*attempts);
            }
            _ => {}
        }
        report
    }
}
