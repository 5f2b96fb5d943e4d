//! HTTP router construction.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::AppState;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the application router: `POST /mcp` and `GET /healthz`.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/mcp", post(api::mcp))
        .route("/healthz", get(api::healthz))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, HeaderValue, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tokio::sync::Notify;
    use tower::ServiceExt;

    use sluice_warehouse::{ExecutionBackend, ExecutionContext, ExecutionError, Interrupt, QueryResult};

    use crate::audit_log::{AuditEntry, AuditOutcome};
    use crate::gateway::tests::{gateway, AuditTrail, FakeBackend, TEST_KEY};

    fn router_for(backend: Arc<dyn ExecutionBackend>) -> (Router, AuditTrail) {
        let (gateway, audit) = gateway(backend);
        let state = Arc::new(AppState {
            gateway: Arc::new(gateway),
        });
        (build_router(state), audit)
    }

    fn app() -> (Router, Arc<FakeBackend>, AuditTrail) {
        let backend = FakeBackend::new();
        let (router, audit) = router_for(backend.clone());
        (router, backend, audit)
    }

    fn query_body(sql: &str, id: Value) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": "run_redshift_query",
            "params": {"query": sql},
            "id": id
        })
        .to_string()
    }

    fn post_mcp(key: Option<&str>, body: impl Into<Body>) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = key {
            req = req.header("X-API-Key", key);
        }
        req.body(body.into()).unwrap()
    }

    /// Collect the SSE body and return the JSON payload of each `data:` frame.
    async fn frames(resp: axum::response::Response) -> Vec<Value> {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        text.split("\n\n")
            .filter(|frame| !frame.trim().is_empty())
            .map(|frame| {
                let data = frame.strip_prefix("data: ").expect("data frame");
                serde_json::from_str(data).unwrap()
            })
            .collect()
    }

    /// Wait for the gateway task to write its audit entry.
    async fn last_entry(audit: &AuditTrail) -> AuditEntry {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(entry) = audit.entries().pop() {
                    return entry;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("audit entry written")
    }

    #[tokio::test]
    async fn select_is_streamed_as_single_frame() {
        let (app, backend, _audit) = app();
        let body = query_body("SELECT id, region FROM sales", json!("req-1"));

        let resp = app.oneshot(post_mcp(Some(TEST_KEY), body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let frames = frames(resp).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["id"], "req-1");
        assert_eq!(frames[0]["result"]["row_count"], 2);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn unauthorized_still_gets_one_frame() {
        let (app, backend, _audit) = app();

        let resp = app
            .oneshot(post_mcp(Some("nope"), query_body("SELECT 1", json!(5))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let frames = frames(resp).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["error"]["code"], -32001);
        assert_eq!(frames[0]["id"], Value::Null);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn non_ascii_key_header_counts_as_presented() {
        let (app, backend, audit) = app();
        let mut req = post_mcp(None, query_body("SELECT 1", json!(6)));
        req.headers_mut()
            .insert("x-api-key", HeaderValue::from_bytes(b"caf\xe9-key").unwrap());

        let resp = app.oneshot(req).await.unwrap();
        let frames = frames(resp).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["error"]["code"], -32001);
        assert_eq!(backend.calls(), 0);

        let entry = last_entry(&audit).await;
        assert_eq!(entry.outcome, AuditOutcome::Unauthorized);
        assert!(entry.key_presented);
        assert!(entry.key_fingerprint.is_some());
    }

    #[tokio::test]
    async fn empty_body_gets_invalid_request_frame() {
        let (app, _, _audit) = app();

        let resp = app.oneshot(post_mcp(Some(TEST_KEY), Body::empty())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let frames = frames(resp).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["error"]["code"], -32600);
        assert_eq!(frames[0]["id"], Value::Null);
    }

    #[tokio::test]
    async fn oversized_body_gets_invalid_request_frame() {
        let padding = "x".repeat(2 * MAX_BODY_BYTES);
        let body = query_body(&format!("SELECT '{padding}'"), json!(9));

        let (app, backend, audit) = app();
        let resp = app.oneshot(post_mcp(Some(TEST_KEY), body.clone())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let answered = frames(resp).await;
        assert_eq!(answered.len(), 1);
        assert_eq!(answered[0]["error"]["code"], -32600);
        assert_eq!(answered[0]["id"], Value::Null);
        assert_eq!(backend.calls(), 0);
        assert_eq!(last_entry(&audit).await.outcome, AuditOutcome::InvalidRequest);

        // Authentication still comes first.
        let (app, _, _audit) = self::app();
        let resp = app.oneshot(post_mcp(Some("nope"), body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let rejected = frames(resp).await;
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0]["error"]["code"], -32001);
    }

    /// Never finishes on its own; reports when it sees the call cancelled.
    struct StallingBackend {
        started: Notify,
        cancelled: Notify,
    }

    #[async_trait]
    impl ExecutionBackend for StallingBackend {
        fn name(&self) -> &'static str {
            "stalling"
        }

        async fn execute(&self, _sql: &str, ctx: &ExecutionContext) -> Result<QueryResult, ExecutionError> {
            self.started.notify_one();
            let Err(interrupt) = ctx.race(std::future::pending::<()>()).await else {
                unreachable!("pending future completed");
            };
            if interrupt == Interrupt::Cancelled {
                self.cancelled.notify_one();
            }
            Err(ctx.interrupted(interrupt))
        }
    }

    #[tokio::test]
    async fn client_disconnect_cancels_running_query() {
        let backend = Arc::new(StallingBackend {
            started: Notify::new(),
            cancelled: Notify::new(),
        });
        let (app, audit) = router_for(backend.clone());

        let resp = app
            .oneshot(post_mcp(Some(TEST_KEY), query_body("SELECT * FROM big_table", json!("slow"))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        tokio::time::timeout(Duration::from_secs(5), backend.started.notified())
            .await
            .expect("backend started");
        drop(resp);

        tokio::time::timeout(Duration::from_secs(5), backend.cancelled.notified())
            .await
            .expect("backend saw the cancellation");

        let entry = last_entry(&audit).await;
        assert_eq!(entry.outcome, AuditOutcome::Cancelled);
        assert_eq!(entry.error_kind.as_deref(), Some("cancelled"));
        assert_eq!(entry.request_id, json!("slow"));
    }

    #[tokio::test]
    async fn healthz_needs_no_key() {
        let (app, backend, _audit) = app();
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"status": "healthy"}));
        assert_eq!(backend.calls(), 0);
    }
}
