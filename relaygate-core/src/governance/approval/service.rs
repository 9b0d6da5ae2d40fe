//! HTTP surface for approvers.
//!
//! - `GET /` - HTML list of pending calls with approve/reject links
//! - `GET /approve?id=N`, `GET /reject?id=N` - decide, then redirect to `/`
//! - `GET /api/pending` - pending calls as JSON
//! - `POST /api/pending/{id}/approve`, `POST /api/pending/{id}/reject` - decide, JSON outcome
//! - `GET /healthz` - liveness
//!
//! Ids that do not parse get 400; unknown ids get 404.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

use super::error::ApprovalError;
use super::queue::{ApprovalQueue, PendingId, PendingView};

// ─────────────────────────────────────────────────────────────────────────────
// Router & Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the approval router over a shared queue.
pub fn approval_router(queue: Arc<ApprovalQueue>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/approve", get(approve_link_handler))
        .route("/reject", get(reject_link_handler))
        .route("/api/pending", get(list_handler))
        .route("/api/pending/{id}/approve", post(approve_api_handler))
        .route("/api/pending/{id}/reject", post(reject_api_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(queue)
}

#[derive(Debug, Deserialize)]
struct DecisionQuery {
    id: Option<String>,
}

async fn index_handler(State(queue): State<Arc<ApprovalQueue>>) -> Html<String> {
    Html(render_index(&queue.list_pending()))
}

async fn approve_link_handler(
    State(queue): State<Arc<ApprovalQueue>>,
    Query(query): Query<DecisionQuery>,
) -> Response {
    decide_and_redirect(&queue, query.id.as_deref(), true).await
}

async fn reject_link_handler(
    State(queue): State<Arc<ApprovalQueue>>,
    Query(query): Query<DecisionQuery>,
) -> Response {
    decide_and_redirect(&queue, query.id.as_deref(), false).await
}

async fn decide_and_redirect(queue: &ApprovalQueue, id: Option<&str>, approve: bool) -> Response {
    let Some(pending_id) = id.and_then(|s| s.parse::<PendingId>().ok()) else {
        return (StatusCode::BAD_REQUEST, "invalid id").into_response();
    };
    match queue.decide(pending_id, approve).await {
        Ok(_) => Redirect::to("/").into_response(),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

async fn list_handler(State(queue): State<Arc<ApprovalQueue>>) -> Json<Vec<PendingView>> {
    Json(queue.list_pending())
}

async fn approve_api_handler(
    State(queue): State<Arc<ApprovalQueue>>,
    Path(id): Path<String>,
) -> Response {
    decide_json(&queue, &id, true).await
}

async fn reject_api_handler(
    State(queue): State<Arc<ApprovalQueue>>,
    Path(id): Path<String>,
) -> Response {
    decide_json(&queue, &id, false).await
}

async fn decide_json(queue: &ApprovalQueue, id: &str, approve: bool) -> Response {
    let Ok(pending_id) = id.parse::<PendingId>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("invalid id '{id}'")})),
        )
            .into_response();
    };
    match queue.decide(pending_id, approve).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e @ ApprovalError::NotFound { .. }) => {
            (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()}))).into_response()
        }
        Err(e) => (StatusCode::CONFLICT, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────────────────

fn render_index(pending: &[PendingView]) -> String {
    let now = Utc::now();
    let mut page = String::from(
        "<!DOCTYPE html>\n<html><head><title>Pending approvals</title>\n\
         <meta http-equiv=\"refresh\" content=\"5\"></head><body>\n\
         <h1>Pending approvals</h1>\n",
    );
    if pending.is_empty() {
        page.push_str("<p>No pending calls.</p>\n");
    } else {
        page.push_str(
            "<table>\n<tr><th>ID</th><th>Tool</th><th>Arguments</th><th>Age</th><th></th></tr>\n",
        );
        for view in pending {
            let args = serde_json::to_string(&view.arguments).unwrap_or_default();
            let age = (now - view.created_at).num_seconds().max(0);
            let waiter = if view.waiter_present {
                ""
            } else {
                " <em>(caller gone)</em>"
            };
            let _ = writeln!(
                page,
                "<tr><td>{id}</td><td>{tool}</td><td><code>{args}</code></td><td>{age}s</td>\
                 <td><a href=\"/approve?id={id}\">approve</a> \
                 <a href=\"/reject?id={id}\">reject</a>{waiter}</td></tr>",
                id = view.id,
                tool = escape_html(&view.tool),
                args = escape_html(&args),
            );
        }
        page.push_str("</table>\n");
    }
    page.push_str("</body></html>\n");
    page
}

/// Escapes `s` for HTML text content and quoted attribute values.
///
/// Not safe for `<script>` or `<style>` bodies, unquoted attributes, or URLs;
/// the page only interpolates user data into table cells.
fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Service Startup
// ─────────────────────────────────────────────────────────────────────────────

/// Starts the approval service on `host:port`, returning the bound port.
///
/// Use port 0 for an OS-assigned port.
///
/// # Errors
///
/// Returns `std::io::Error` if binding fails.
pub async fn start_approval_service(
    host: &str,
    port: u16,
    queue: Arc<ApprovalQueue>,
) -> Result<(u16, tokio::task::JoinHandle<Result<(), std::io::Error>>), std::io::Error> {
    let listener = TcpListener::bind((host, port)).await?;
    let actual_port = listener.local_addr()?.port();
    tracing::info!(port = actual_port, "approval service listening");

    let router = approval_router(queue);
    let handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .map_err(std::io::Error::other)
    });

    Ok((actual_port, handle))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::constraint::NoConstraints;
    use crate::governance::approval::{ApprovalQueueConfig, Intercepted, REJECTED_MESSAGE};
    use crate::governance::task::{PollOutcome, TaskEngine, TaskId};
    use crate::protocol::{ToolCall, ToolResult};
    use crate::transport::mock::MockUpstream;
    use tokio_util::sync::CancellationToken;

    struct TestService {
        port: u16,
        queue: Arc<ApprovalQueue>,
        tasks: TaskEngine<ToolResult>,
        client: reqwest::Client,
    }

    impl TestService {
        fn url(&self, path: &str) -> String {
            format!("http://127.0.0.1:{}{path}", self.port)
        }

        async fn hold(&self, tool: &str) -> (TaskId, PendingId) {
            let call = ToolCall::new(tool, json!({"text": format!("<{tool}>")}));
            match self
                .queue
                .intercept(call, CancellationToken::new())
                .await
                .unwrap()
            {
                Intercepted::Queued {
                    task_id,
                    pending_id,
                } => (task_id, pending_id),
                other => panic!("expected queued call, got {other:?}"),
            }
        }
    }

    async fn start_test_service() -> TestService {
        let policies: Config = serde_yaml::from_str("defaults:\n  requires_approval: true\n").unwrap();
        let tasks = TaskEngine::default();
        let queue = Arc::new(ApprovalQueue::new(
            tasks.clone(),
            Arc::new(MockUpstream::echo()),
            Arc::new(NoConstraints),
            Arc::new(policies),
            ApprovalQueueConfig::default(),
        ));
        let (port, _handle) = start_approval_service("127.0.0.1", 0, queue.clone())
            .await
            .unwrap();
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        TestService {
            port,
            queue,
            tasks,
            client,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_healthz_returns_ok() {
        let svc = start_test_service().await;
        let resp = svc.client.get(svc.url("/healthz")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_index_lists_pending_escaped() {
        let svc = start_test_service().await;
        svc.hold("echo").await;

        let resp = svc.client.get(svc.url("/")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body = resp.text().await.unwrap();
        assert!(body.contains("/approve?id=1"));
        assert!(body.contains("/reject?id=1"));
        assert!(body.contains("&lt;echo&gt;"));
        assert!(!body.contains("<echo>"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_index_empty() {
        let svc = start_test_service().await;
        let body = svc
            .client
            .get(svc.url("/"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("No pending calls."));
    }

    /// Tests that the reject link delivers a rejection and redirects home.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_reject_link_redirects_and_delivers() {
        let svc = start_test_service().await;
        let (task_id, _) = svc.hold("echo").await;

        let resp = svc.client.get(svc.url("/reject?id=1")).send().await.unwrap();
        assert!(resp.status().is_redirection());
        assert_eq!(resp.headers()["location"], "/");

        assert_eq!(
            svc.tasks.check_status(&task_id).await.unwrap(),
            PollOutcome::Done(Ok(ToolResult::error(REJECTED_MESSAGE)))
        );

        let again = svc.client.get(svc.url("/reject?id=1")).send().await.unwrap();
        assert_eq!(again.status(), 404);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_and_unknown_ids() {
        let svc = start_test_service().await;

        let resp = svc.client.get(svc.url("/approve?id=abc")).send().await.unwrap();
        assert_eq!(resp.status(), 400);
        let resp = svc.client.get(svc.url("/approve")).send().await.unwrap();
        assert_eq!(resp.status(), 400);
        let resp = svc.client.get(svc.url("/approve?id=99")).send().await.unwrap();
        assert_eq!(resp.status(), 404);

        let resp = svc
            .client
            .post(svc.url("/api/pending/x/approve"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let resp = svc
            .client
            .post(svc.url("/api/pending/7/reject"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_json_api_approve() {
        let svc = start_test_service().await;
        let (task_id, _) = svc.hold("echo").await;

        let pending: Vec<PendingView> = svc
            .client
            .get(svc.url("/api/pending"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tool, "echo");

        let resp = svc
            .client
            .post(svc.url("/api/pending/1/approve"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["approved"], true);
        assert_eq!(body["delivered"], true);

        assert_eq!(
            svc.tasks.check_status(&task_id).await.unwrap(),
            PollOutcome::Done(Ok(ToolResult::text("<echo>")))
        );
        assert_eq!(svc.queue.pending_len(), 0);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
        // Neither quote style can close a quoted attribute.
        let attr = escape_html(r#"x" onclick='y'"#);
        assert!(!attr.contains('"') && !attr.contains('\''));
    }
}
