//! HTTP surface of the reconciler.
//!
//! # Endpoints
//!
//! - `POST /webhook` - verifies and parses a GitHub delivery, hands it to the
//!   [`EventSink`] and answers 202 Accepted without waiting for it
//! - `GET /health` - liveness, plus background task counters

use std::sync::Arc;

use crate::lifecycle::TaskStats;
use crate::webhooks::GitHubEvent;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::{WebhookError, webhook_handler};

/// Receives parsed events. Implementations must not block: the work is
/// expected to run in the background.
pub trait EventSink: Send + Sync + 'static {
    fn submit(&self, event: GitHubEvent);

    /// Counters for the background work started by submitted events.
    fn task_stats(&self) -> TaskStats {
        TaskStats::default()
    }
}

/// Shared application state, passed to handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    sink: Arc<dyn EventSink>,

    /// Webhook secret for HMAC-SHA256 signature verification.
    webhook_secret: Vec<u8>,
}

impl AppState {
    pub fn new(sink: Arc<dyn EventSink>, webhook_secret: impl Into<Vec<u8>>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                sink,
                webhook_secret: webhook_secret.into(),
            }),
        }
    }

    pub fn sink(&self) -> &dyn EventSink {
        self.inner.sink.as_ref()
    }

    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;

    use crate::types::RepoId;
    use crate::webhooks::{PrAction, PullRequestEvent, signature_header};

    const SECRET: &[u8] = b"test-secret";

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<GitHubEvent>>,
    }

    impl EventSink for RecordingSink {
        fn submit(&self, event: GitHubEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn task_stats(&self) -> TaskStats {
            TaskStats {
                in_flight: self.events.lock().unwrap().len(),
                ..TaskStats::default()
            }
        }
    }

    fn app() -> (axum::Router, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let state = AppState::new(Arc::clone(&sink) as Arc<dyn EventSink>, SECRET.to_vec());
        (build_router(state), sink)
    }

    fn webhook_request(event_type: &str, body: &serde_json::Value, secret: &[u8]) -> Request<Body> {
        let bytes = serde_json::to_vec(body).unwrap();
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("x-github-event", event_type)
            .header("x-github-delivery", "72d3162e-cc78-11e3-81ab-4c9367dc0958")
            .header("x-hub-signature-256", signature_header(&bytes, secret))
            .body(Body::from(bytes))
            .unwrap()
    }

    fn closed_pr_payload() -> serde_json::Value {
        serde_json::json!({
            "action": "closed",
            "number": 42,
            "pull_request": { "number": 42 },
            "repository": { "name": "webapp", "owner": { "login": "octo-org" } }
        })
    }

    #[tokio::test]
    async fn valid_delivery_is_submitted() {
        let (app, sink) = app();

        let response = app
            .oneshot(webhook_request("pull_request", &closed_pr_payload(), SECRET))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            *sink.events.lock().unwrap(),
            vec![GitHubEvent::PullRequest(PullRequestEvent {
                repo: RepoId::new("octo-org", "webapp"),
                action: PrAction::Closed,
                number: 42,
            })]
        );
    }

    #[tokio::test]
    async fn wrong_secret_is_unauthorized() {
        let (app, sink) = app();

        let response = app
            .oneshot(webhook_request("pull_request", &closed_pr_payload(), b"other"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_signature_is_bad_request() {
        let (app, _sink) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("x-github-event", "issues")
            .header("x-github-delivery", "d-1")
            .body(Body::from("{}"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unhandled_event_type_is_accepted_and_dropped() {
        let (app, sink) = app();

        let response = app
            .oneshot(webhook_request("ping", &serde_json::json!({ "zen": "Keep it simple." }), SECRET))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_bad_request() {
        let (app, sink) = app();

        let response = app
            .oneshot(webhook_request("issues", &serde_json::json!({ "action": "opened" }), SECRET))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_reports_task_counters() {
        let (app, sink) = app();
        sink.submit(GitHubEvent::PullRequest(PullRequestEvent {
            repo: RepoId::new("o", "r"),
            action: PrAction::Opened,
            number: 1,
        }));

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "ok",
                "tasks": { "in_flight": 1, "failed": 0, "last_failure": null }
            })
        );
    }
}
