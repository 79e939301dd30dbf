//! Attempt-scoped cancellation.
//!
//! Each attempt owns one [`AttemptScope`]:
//!
//! ```text
//!   caller signal ──child_token──►  attempt token ◄── deadline
//!                                        │
//!                                  transport.send()
//! ```
//!
//! The token is a child of the caller's signal (when there is one), so a
//! caller cancel propagates into the attempt. The deadline is a sleep raced
//! inside [`AttemptScope::run`]; when it wins, the token is cancelled. No
//! task outlives the attempt, and dropping the scope cancels the token, which
//! also removes the child from the caller's signal.

use std::{future::Future, time::Duration};

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::{transport::TransportError, Payload, RequestError};

/// Why an attempt's cancellation fired.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AbortCause {
    /// The caller's signal fired. Takes priority over a concurrent timeout.
    Caller,
    /// The attempt deadline elapsed.
    Timeout,
    /// The transport reported cancellation on its own.
    Transport,
}

/// Outcome of one attempt that did not produce a payload.
#[derive(Debug)]
pub(crate) enum AttemptFailure {
    /// Terminal: failure status or undecodable body.
    Classified(RequestError),
    Aborted(AbortCause),
    Network(String),
}

impl From<RequestError> for AttemptFailure {
    fn from(err: RequestError) -> Self {
        AttemptFailure::Classified(err)
    }
}

impl From<TransportError> for AttemptFailure {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => AttemptFailure::Aborted(AbortCause::Transport),
            TransportError::Unreachable(detail) => AttemptFailure::Network(detail),
        }
    }
}

pub(crate) struct AttemptScope {
    token: CancellationToken,
    caller: Option<CancellationToken>,
    deadline: Instant,
}

impl AttemptScope {
    /// Creates the attempt token; the deadline counts from now.
    pub(crate) fn arm(timeout: Duration, caller: Option<&CancellationToken>) -> Self {
        let token = caller
            .map(CancellationToken::child_token)
            .unwrap_or_else(CancellationToken::new);

        Self {
            token,
            caller: caller.cloned(),
            deadline: Instant::now() + timeout,
        }
    }

    /// Handle passed to the transport.
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn caller_cancelled(&self) -> bool {
        self.caller
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Cause of a cancellation observed before the deadline.
    pub(crate) fn cause(&self) -> AbortCause {
        if self.caller_cancelled() {
            AbortCause::Caller
        } else {
            AbortCause::Transport
        }
    }

    /// Drives `attempt` until it settles, the token fires or the deadline
    /// elapses.
    ///
    /// Cancellation wins a tie with the deadline or a completed attempt.
    pub(crate) async fn run<F>(&self, attempt: F) -> Result<Payload, AttemptFailure>
    where
        F: Future<Output = Result<Payload, AttemptFailure>>,
    {
        let outcome = tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(AttemptFailure::Aborted(self.cause())),
            _ = sleep_until(self.deadline) => {
                self.token.cancel();
                if self.caller_cancelled() {
                    Err(AttemptFailure::Aborted(AbortCause::Caller))
                } else {
                    Err(AttemptFailure::Aborted(AbortCause::Timeout))
                }
            }
            outcome = attempt => outcome,
        };

        match outcome {
            // The transport may notice cancellation before we do; re-derive the cause.
            Err(AttemptFailure::Aborted(AbortCause::Transport)) => {
                Err(AttemptFailure::Aborted(self.cause()))
            }
            other => other,
        }
    }
}

impl Drop for AttemptScope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
