use std::{
    collections::VecDeque,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use portal_http::{
    header::{self, HeaderValue},
    transport::{Transport, TransportError, TransportRequest, TransportResponse},
    CancellationToken, ClientConfig, ErrorKind, Method, Payload, PortalClient, RequestError,
    RequestOptions, RetryPolicy, StatusCode,
};
use serde_json::json;
use tokio::time::Instant;

#[derive(Clone, Debug)]
enum Step {
    /// Never responds; only cancellation ends it.
    Hang,
    Respond {
        status: u16,
        content_type: &'static str,
        body: &'static str,
    },
    /// Responds after `delay` unless cancelled first.
    RespondAfter {
        delay: Duration,
        body: &'static str,
    },
    Refuse,
    /// Transport gives up with a cancellation of its own.
    Cancelled,
}

#[derive(Debug)]
struct Call {
    request: TransportRequest,
    started: Instant,
}

#[derive(Default)]
struct Script {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Call>>,
    /// How long after its start each cancelled attempt observed its token fire.
    cancelled_after: Mutex<Vec<Duration>>,
}

impl Script {
    fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    fn cancelled_after(&self) -> Vec<Duration> {
        self.cancelled_after.lock().expect("cancel lock").clone()
    }
}

#[derive(Clone)]
struct ScriptedTransport {
    script: Arc<Script>,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>) -> (Self, Arc<Script>) {
        let script = Arc::new(Script {
            steps: Mutex::new(steps.into()),
            ..Script::default()
        });
        (
            Self {
                script: script.clone(),
            },
            script,
        )
    }
}

struct ScriptedResponse {
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
}

impl TransportResponse for ScriptedResponse {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn header(&self, name: &str) -> Option<&str> {
        name.eq_ignore_ascii_case("content-type")
            .then_some(self.content_type)
    }

    fn text(self) -> impl Future<Output = Result<String, TransportError>> + Send {
        let body = self.body.to_owned();
        async move { Ok(body) }
    }
}

impl Transport for ScriptedTransport {
    type Response = ScriptedResponse;

    fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Self::Response, TransportError>> + Send {
        let started = Instant::now();
        self.script
            .calls
            .lock()
            .expect("calls lock")
            .push(Call { request, started });
        let step = self
            .script
            .steps
            .lock()
            .expect("steps lock")
            .pop_front()
            .unwrap_or(Step::Hang);

        let script = self.script.clone();
        let watched = cancel.clone();
        tokio::spawn(async move {
            watched.cancelled().await;
            script
                .cancelled_after
                .lock()
                .expect("cancel lock")
                .push(started.elapsed());
        });

        async move {
            match step {
                Step::Hang => {
                    cancel.cancelled().await;
                    Err(TransportError::Cancelled)
                }
                Step::Respond {
                    status,
                    content_type,
                    body,
                } => Ok(ScriptedResponse {
                    status: StatusCode::from_u16(status).expect("valid status"),
                    content_type,
                    body,
                }),
                Step::RespondAfter { delay, body } => {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(TransportError::Cancelled),
                        _ = tokio::time::sleep(delay) => Ok(ScriptedResponse {
                            status: StatusCode::OK,
                            content_type: "application/json",
                            body,
                        }),
                    }
                }
                Step::Refuse => Err(TransportError::Unreachable(
                    "tcp connect error: Connection refused".to_owned(),
                )),
                Step::Cancelled => Err(TransportError::Cancelled),
            }
        }
    }
}

fn policy(timeout_ms: u64, max_retries: usize, max_timeout_ms: u64) -> RetryPolicy {
    RetryPolicy {
        timeout_ms,
        max_retries,
        max_timeout_ms,
        backoff_multiplier: 2.0,
        retry_delay_ms: 10,
    }
}

fn client(policy: RetryPolicy, steps: Vec<Step>) -> (PortalClient<ScriptedTransport>, Arc<Script>) {
    let (transport, script) = ScriptedTransport::new(steps);
    let config = ClientConfig::new("http://portal.test/api").with_policy(policy);
    (PortalClient::with_transport(config, transport), script)
}

/// Lets spawned watcher tasks record their observations.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn timeouts_escalate_then_surface_timeout_after_all_attempts() {
    let (client, script) = client(policy(100, 1, 500), vec![Step::Hang, Step::Hang]);
    let started = Instant::now();

    let err = client
        .get("/listings", RequestOptions::default())
        .await
        .expect_err("every attempt hangs");
    let elapsed = started.elapsed();
    settle().await;

    assert_eq!(
        err,
        RequestError::Timeout {
            timeout_ms: 200,
            attempts: 2
        }
    );
    assert_eq!(script.call_count(), 2);
    assert_eq!(
        script.cancelled_after(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
    // 100ms, 10ms delay, 200ms.
    assert!(elapsed >= Duration::from_millis(310));
    assert!(elapsed < Duration::from_millis(320));
}

#[tokio::test(start_paused = true)]
async fn escalation_is_capped_at_ceiling() {
    let (client, script) = client(policy(100, 4, 500), Vec::new());

    let err = client
        .get("/listings", RequestOptions::default())
        .await
        .expect_err("every attempt hangs");
    settle().await;

    assert_eq!(
        err,
        RequestError::Timeout {
            timeout_ms: 500,
            attempts: 5
        }
    );
    assert_eq!(script.call_count(), 5);
    let observed = script.cancelled_after();
    assert_eq!(
        observed,
        [100, 200, 400, 500, 500].map(Duration::from_millis).to_vec()
    );
    assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test(start_paused = true)]
async fn per_call_timeout_override_is_used_for_first_attempt() {
    let (client, script) = client(policy(100, 1, 1_000), Vec::new());

    let err = client
        .get("/listings", RequestOptions::new().timeout_ms(300))
        .await
        .expect_err("every attempt hangs");
    settle().await;

    assert_eq!(
        err,
        RequestError::Timeout {
            timeout_ms: 600,
            attempts: 2
        }
    );
    assert_eq!(
        script.cancelled_after(),
        vec![Duration::from_millis(300), Duration::from_millis(600)]
    );
}

#[tokio::test(start_paused = true)]
async fn retry_disabled_means_single_invocation() {
    let (client, script) = client(policy(100, 3, 500), vec![Step::Hang]);

    let err = client
        .post(
            "/admins/apply",
            json!({"name": "Lindiwe"}),
            RequestOptions::new().no_retry(),
        )
        .await
        .expect_err("attempt hangs");

    assert_eq!(
        err,
        RequestError::Timeout {
            timeout_ms: 100,
            attempts: 1
        }
    );
    assert_eq!(script.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_then_success_returns_payload() {
    let (client, script) = client(
        policy(100, 2, 500),
        vec![
            Step::Hang,
            Step::RespondAfter {
                delay: Duration::from_millis(150),
                body: r#"[{"id": 1}]"#,
            },
        ],
    );

    let payload = client
        .get("/bookings/student/9", RequestOptions::default())
        .await
        .expect("second attempt fits in the escalated timeout");

    assert_eq!(payload, Payload::Json(json!([{"id": 1}])));
    assert_eq!(script.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn caller_cancel_mid_attempt_is_aborted_without_retry() {
    let (client, script) = client(policy(100, 3, 500), Vec::new());
    let signal = CancellationToken::new();

    let canceller = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        canceller.cancel();
    });

    let err = client
        .get("/listings", RequestOptions::new().signal(signal))
        .await
        .expect_err("caller cancels");

    // Attempt 0 timed out at 100ms; attempt 1 started at 110ms and was cancelled.
    assert_eq!(err, RequestError::Aborted);
    assert_eq!(script.call_count(), 2);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(script.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn caller_cancel_during_retry_delay_is_aborted() {
    let (client, script) = client(
        RetryPolicy {
            retry_delay_ms: 100,
            ..policy(100, 3, 500)
        },
        Vec::new(),
    );
    let signal = CancellationToken::new();

    let canceller = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        canceller.cancel();
    });

    let err = client
        .get("/listings", RequestOptions::new().signal(signal))
        .await
        .expect_err("caller cancels during delay");

    assert_eq!(err, RequestError::Aborted);
    assert_eq!(script.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn already_cancelled_signal_never_reaches_transport() {
    let (client, script) = client(policy(100, 3, 500), Vec::new());
    let signal = CancellationToken::new();
    signal.cancel();

    let err = client
        .delete("/watchlist/4", RequestOptions::new().signal(signal))
        .await
        .expect_err("pre-cancelled");

    assert_eq!(err, RequestError::Aborted);
    assert_eq!(script.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_in_same_tick_as_timeout_is_aborted() {
    let (client, script) = client(policy(100, 3, 500), Vec::new());
    let signal = CancellationToken::new();

    let canceller = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let err = client
        .get("/listings", RequestOptions::new().signal(signal))
        .await
        .expect_err("caller cancels");

    assert_eq!(err, RequestError::Aborted);
    assert_eq!(script.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failure_status_is_http_error_without_retry() {
    let (client, script) = client(
        policy(100, 3, 500),
        vec![Step::Respond {
            status: 404,
            content_type: "application/json",
            body: r#"{"message":"not found"}"#,
        }],
    );

    let err = client
        .get("/reviews/77", RequestOptions::default())
        .await
        .expect_err("404");

    assert_eq!(err.kind(), ErrorKind::HttpError);
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "not found");
    assert_eq!(script.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn undecodable_body_is_decode_error_without_retry() {
    let (client, script) = client(
        policy(100, 3, 500),
        vec![Step::Respond {
            status: 200,
            content_type: "application/json",
            body: "<!doctype html>",
        }],
    );

    let err = client
        .get("/admin/dashboard/overview", RequestOptions::default())
        .await
        .expect_err("html is not json");

    assert_eq!(err, RequestError::Decode);
    assert_eq!(script.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn connectivity_failure_is_network_without_retry() {
    let (client, script) = client(policy(100, 3, 500), vec![Step::Refuse]);

    let err = client
        .get("/listings", RequestOptions::default())
        .await
        .expect_err("refused");

    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(matches!(err, RequestError::Network { ref detail } if detail.contains("refused")));
    assert_eq!(script.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn transport_side_cancellation_is_aborted() {
    let (client, script) = client(policy(100, 3, 500), vec![Step::Cancelled]);

    let err = client
        .get("/listings", RequestOptions::default())
        .await
        .expect_err("transport cancelled");

    assert_eq!(err, RequestError::Aborted);
    assert_eq!(script.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn no_content_and_text_responses_decode() {
    let (client, _script) = client(
        policy(100, 0, 500),
        vec![
            Step::Respond {
                status: 204,
                content_type: "application/json",
                body: "",
            },
            Step::Respond {
                status: 200,
                content_type: "text/plain",
                body: "approved",
            },
        ],
    );

    let removed = client
        .delete("/watchlist/4", RequestOptions::default())
        .await
        .expect("204 decodes");
    assert_eq!(removed, Payload::Empty);

    let approved = client
        .post("/admins/3/approve", json!({"superAdminId": 1}), RequestOptions::default())
        .await
        .expect("text decodes");
    assert_eq!(approved, Payload::Text("approved".to_owned()));
}

#[tokio::test(start_paused = true)]
async fn request_carries_method_url_headers_and_body() {
    let (client, script) = client(
        policy(100, 0, 500),
        vec![
            Step::Respond {
                status: 200,
                content_type: "application/json",
                body: r#"{"status":"ACCEPTED"}"#,
            },
            Step::Respond {
                status: 200,
                content_type: "application/json",
                body: "{}",
            },
        ],
    );

    client
        .patch(
            "bookings/applications/12/status",
            json!({"status": "ACCEPTED"}),
            RequestOptions::new().header(
                header::AUTHORIZATION,
                HeaderValue::from_static("Bearer t0ken"),
            ),
        )
        .await
        .expect("patch succeeds");
    client
        .put(
            "/reviews/5",
            "rating=4",
            RequestOptions::new().header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain")),
        )
        .await
        .expect("put succeeds");

    let calls = script.calls.lock().expect("calls lock");
    let patch = &calls[0].request;
    assert_eq!(patch.method, Method::PATCH);
    assert_eq!(patch.url, "http://portal.test/api/bookings/applications/12/status");
    assert_eq!(patch.headers[header::CONTENT_TYPE], "application/json");
    assert_eq!(patch.headers[header::AUTHORIZATION], "Bearer t0ken");
    assert_eq!(patch.body.as_deref(), Some(r#"{"status":"ACCEPTED"}"#));

    let put = &calls[1].request;
    assert_eq!(put.method, Method::PUT);
    assert_eq!(put.url, "http://portal.test/api/reviews/5");
    assert_eq!(put.headers.get_all(header::CONTENT_TYPE).iter().count(), 1);
    assert_eq!(put.headers[header::CONTENT_TYPE], "text/plain");
    assert_eq!(put.body.as_deref(), Some("rating=4"));
}

#[tokio::test(start_paused = true)]
async fn attempts_of_one_call_are_sequential() {
    let (client, script) = client(policy(100, 2, 500), Vec::new());

    let _ = client.get("/listings", RequestOptions::default()).await;
    settle().await;

    let calls = script.calls.lock().expect("calls lock");
    let observed = script.cancelled_after();
    assert_eq!(calls.len(), 3);
    for (index, pair) in calls.windows(2).enumerate() {
        let gap = pair[1].started - pair[0].started;
        // The next attempt starts only after the previous deadline plus the delay.
        assert!(gap >= observed[index] + Duration::from_millis(10));
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_calls_are_independent() {
    let (client, script) = client(
        policy(100, 0, 500),
        vec![
            Step::Hang,
            Step::Respond {
                status: 200,
                content_type: "application/json",
                body: "[]",
            },
        ],
    );

    let slow = client.clone();
    let slow = tokio::spawn(async move { slow.get("/slow", RequestOptions::default()).await });
    while script.call_count() == 0 {
        tokio::task::yield_now().await;
    }

    let fast = client.get("/fast", RequestOptions::default()).await;
    assert_eq!(fast.expect("responds"), Payload::Json(json!([])));

    let slow = slow.await.expect("slow call task must not panic");
    assert_eq!(slow.expect_err("hangs").kind(), ErrorKind::Timeout);
    assert_eq!(script.call_count(), 2);
}
