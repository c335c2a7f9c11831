// Dispatch executor: walks an attempt plan strictly sequentially, performing
// one HTTP call per pair and classifying the result as success, terminal, or
// retryable.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::directory::{RelayServer, ServiceKind};
use crate::error::DispatchError;
use crate::plan::AttemptPlan;
use crate::transport::{RawResponse, Transport};

/// Successful outcome: the payload plus the credential that produced it, so
/// the caller can persist it as the new preferred credential.
#[derive(Debug)]
pub struct Dispatched {
    pub payload: Value,
    pub credential: Credential,
    /// Ordinal of the attempt that succeeded (1-based).
    pub attempts: usize,
}

enum Verdict {
    Success(Value),
    /// Content-level rejection. No credential or server swap changes this,
    /// so remaining attempts would only waste quota and mask the cause.
    Terminal(String),
    Retry(String),
}

pub(crate) fn endpoint_url(server: &RelayServer, kind: ServiceKind, path: &str) -> String {
    format!("{}/api/{}{}", server.base_url.trim_end_matches('/'), kind, path)
}

/// Human-readable cause from a failure body: `error.message`, then
/// `message`, then the raw status.
fn error_message(payload: &Value, status: u16) -> String {
    payload
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("message").and_then(Value::as_str))
        .map(str::to_owned)
        .unwrap_or_else(|| format!("HTTP {status}"))
}

fn is_content_rejection(status: u16, message: &str) -> bool {
    if status == 400 {
        return true;
    }
    let lower = message.to_lowercase();
    lower.contains("safety") || lower.contains("blocked")
}

fn classify(response: &RawResponse, result_field: &str) -> Verdict {
    // An unparseable body must not crash the loop; synthesize a payload
    // carrying the raw status instead.
    let payload: Value = serde_json::from_slice(&response.body)
        .unwrap_or_else(|_| serde_json::json!({ "message": format!("HTTP {}", response.status) }));

    if (200..300).contains(&response.status) {
        if payload.get(result_field).is_some_and(|v| !v.is_null()) {
            return Verdict::Success(payload);
        }
        // 2xx without the expected field has been observed as a transient
        // upstream issue, unless the body itself names a content rejection.
        let message = error_message(&payload, response.status);
        if is_content_rejection(response.status, &message) {
            return Verdict::Terminal(message);
        }
        return Verdict::Retry("no result returned".to_owned());
    }

    let message = error_message(&payload, response.status);
    if is_content_rejection(response.status, &message) {
        return Verdict::Terminal(message);
    }
    Verdict::Retry(message)
}

/// Try each pair in order until one succeeds, a terminal rejection stops the
/// whole dispatch, or the plan is exhausted.
pub(crate) async fn run_plan(
    transport: &dyn Transport,
    plan: &AttemptPlan,
    kind: ServiceKind,
    path: &str,
    body: &Value,
    username: &str,
    result_field: &str,
) -> Result<Dispatched, DispatchError> {
    let total = plan.len();
    let mut last_error = String::from("no attempts executed");

    for (idx, pair) in plan.pairs().iter().enumerate() {
        let ordinal = idx + 1;
        let url = endpoint_url(&pair.server, kind, path);
        debug!(
            attempt = ordinal,
            total,
            server = %pair.server.id,
            provenance = %pair.credential.provenance,
            token = %pair.credential.suffix(),
            "dispatching generation attempt"
        );

        match transport
            .send(&url, pair.credential.token(), username, body)
            .await
        {
            Ok(response) => match classify(&response, result_field) {
                Verdict::Success(payload) => {
                    info!(
                        attempt = ordinal,
                        server = %pair.server.id,
                        provenance = %pair.credential.provenance,
                        "generation succeeded"
                    );
                    return Ok(Dispatched {
                        payload,
                        credential: pair.credential.clone(),
                        attempts: ordinal,
                    });
                }
                Verdict::Terminal(message) => {
                    warn!(
                        attempt = ordinal,
                        server = %pair.server.id,
                        error = %message,
                        "content rejected; abandoning remaining attempts"
                    );
                    return Err(DispatchError::rejected(message));
                }
                Verdict::Retry(message) => {
                    warn!(
                        attempt = ordinal,
                        total,
                        server = %pair.server.id,
                        error = %message,
                        "attempt failed, advancing to next candidate"
                    );
                    last_error = message;
                }
            },
            Err(e) => {
                warn!(
                    attempt = ordinal,
                    total,
                    server = %pair.server.id,
                    error = %e,
                    "transport failure, advancing to next candidate"
                );
                last_error = e.to_string();
            }
        }
    }

    Err(DispatchError::exhausted(total, last_error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Provenance;
    use crate::plan::AttemptPair;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Scripted {
        Response(u16, &'static str),
        NetworkError,
    }

    struct ScriptedTransport {
        script: Mutex<Vec<Scripted>>,
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            url: &str,
            _token: &str,
            _username: &str,
            _body: &Value,
        ) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.urls.lock().push(url.to_owned());
            match self.script.lock().remove(0) {
                Scripted::Response(status, body) => Ok(RawResponse {
                    status,
                    body: Bytes::from_static(body.as_bytes()),
                }),
                Scripted::NetworkError => {
                    // A real connect error is awkward to fabricate from
                    // reqwest, so tests reuse an invalid-URL builder error.
                    let source = reqwest::Client::new().post("not a url").build().unwrap_err();
                    Err(TransportError::Network { source })
                }
            }
        }
    }

    fn plan_of(n: usize) -> AttemptPlan {
        let pairs = (0..n)
            .map(|i| AttemptPair {
                credential: Credential::new(format!("token-{i}"), Provenance::Pool),
                server: RelayServer::new(
                    format!("relay-{:02}", i + 1),
                    format!("https://relay-{:02}.genio.app", i + 1),
                ),
            })
            .collect();
        AttemptPlan::from_pairs(pairs)
    }

    fn body() -> Value {
        serde_json::json!({ "prompt": "a lighthouse at dusk" })
    }

    async fn run(transport: &ScriptedTransport, plan: &AttemptPlan) -> Result<Dispatched, DispatchError> {
        run_plan(
            transport,
            plan,
            ServiceKind::Image,
            "/generate",
            &body(),
            "tester",
            "images",
        )
        .await
    }

    #[test]
    fn endpoint_joins_base_kind_and_path() {
        let server = RelayServer::new("relay-01", "https://relay-01.genio.app/");
        assert_eq!(
            endpoint_url(&server, ServiceKind::Image, "/generate"),
            "https://relay-01.genio.app/api/image/generate"
        );
        assert_eq!(
            endpoint_url(&server, ServiceKind::Video, "/jobs"),
            "https://relay-01.genio.app/api/video/jobs"
        );
    }

    #[tokio::test]
    async fn http_400_stops_after_one_call() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Response(400, r#"{"error":{"message":"bad request"}}"#),
            Scripted::Response(200, r#"{"images":["u"]}"#),
            Scripted::Response(200, r#"{"images":["u"]}"#),
        ]);
        let plan = plan_of(3);

        let err = run(&transport, &plan).await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn safety_marker_is_terminal_regardless_of_status() {
        let transport = ScriptedTransport::new(vec![Scripted::Response(
            422,
            r#"{"message":"prompt Blocked by Safety system"}"#,
        )]);
        let plan = plan_of(3);

        let err = run(&transport, &plan).await.unwrap_err();
        match err {
            DispatchError::Rejected { message } => {
                assert!(message.to_lowercase().contains("safety"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn recovers_on_third_attempt_after_server_errors() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Response(500, r#"{"message":"internal"}"#),
            Scripted::Response(503, "not json at all"),
            Scripted::Response(200, r#"{"images":["https://cdn/x.png"]}"#),
        ]);
        let plan = plan_of(3);

        let dispatched = run(&transport, &plan).await.unwrap();
        assert_eq!(transport.calls(), 3);
        assert_eq!(dispatched.attempts, 3);
        // The credential of the pair that worked, for last-known-good
        // persistence by the caller.
        assert_eq!(dispatched.credential.token(), "token-2");
        assert_eq!(dispatched.payload["images"][0], "https://cdn/x.png");
    }

    #[tokio::test]
    async fn rate_limits_exhaust_the_whole_plan() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Response(429, r#"{"message":"rate limited"}"#),
            Scripted::Response(429, r#"{"message":"rate limited"}"#),
            Scripted::Response(429, r#"{"message":"rate limited"}"#),
            Scripted::Response(429, r#"{"message":"rate limited"}"#),
        ]);
        let plan = plan_of(4);

        let err = run(&transport, &plan).await.unwrap_err();
        assert_eq!(transport.calls(), 4);
        match err {
            DispatchError::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error, "rate limited");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failures_are_retryable() {
        let transport = ScriptedTransport::new(vec![
            Scripted::NetworkError,
            Scripted::Response(200, r#"{"images":["u"]}"#),
        ]);
        let plan = plan_of(2);

        let dispatched = run(&transport, &plan).await.unwrap();
        assert_eq!(dispatched.attempts, 2);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn success_without_result_field_is_retryable() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Response(200, r#"{"status":"ok"}"#),
            Scripted::Response(200, r#"{"images":[]}"#),
        ]);
        let plan = plan_of(2);

        // Second response carries the field (even empty), so it wins.
        let dispatched = run(&transport, &plan).await.unwrap();
        assert_eq!(dispatched.attempts, 2);
    }

    #[tokio::test]
    async fn unparseable_error_body_synthesizes_status_message() {
        let transport = ScriptedTransport::new(vec![Scripted::Response(502, "<html>bad gateway</html>")]);
        let plan = plan_of(1);

        let err = run(&transport, &plan).await.unwrap_err();
        match err {
            DispatchError::Exhausted { last_error, .. } => {
                assert_eq!(last_error, "HTTP 502");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn attempts_hit_each_planned_server_in_order() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Response(500, "{}"),
            Scripted::Response(500, "{}"),
            Scripted::Response(200, r#"{"images":["u"]}"#),
        ]);
        let plan = plan_of(3);

        run(&transport, &plan).await.unwrap();
        let urls = transport.urls.lock().clone();
        assert_eq!(
            urls,
            vec![
                "https://relay-01.genio.app/api/image/generate",
                "https://relay-02.genio.app/api/image/generate",
                "https://relay-03.genio.app/api/image/generate",
            ]
        );
    }
}
