//! Integration tests for the gateway routes.
//!
//! Drives the full webhook path through the router: caller
//! authentication, reference registration, notification ingestion,
//! edit-vs-append delivery, and lifecycle teardown.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use courier_common::config::Config;
use courier_common::Result;
use courier_gateway::auth::AuthState;
use courier_gateway::deliver::ChannelAdapter;
use courier_gateway::{build_state, routes};
use courier_session::{CallerValidator, ConversationReference};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

// ─────────────────────────────────────────────────────────────────────────────
// Test setup helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Records every send/update it receives.
#[derive(Default)]
struct RecordingAdapter {
    counter: AtomicU32,
    sends: Mutex<Vec<HashMap<String, String>>>,
    updates: Mutex<Vec<(String, HashMap<String, String>)>>,
}

#[async_trait]
impl ChannelAdapter for RecordingAdapter {
    fn channel_id(&self) -> &'static str {
        "msteams"
    }

    async fn send(
        &self,
        _reference: &ConversationReference,
        fields: &HashMap<String, String>,
    ) -> Result<String> {
        self.sends.lock().unwrap().push(fields.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("msg-{n}"))
    }

    async fn update(
        &self,
        _reference: &ConversationReference,
        activity_id: &str,
        fields: &HashMap<String, String>,
    ) -> Result<()> {
        self.updates
            .lock()
            .unwrap()
            .push((activity_id.to_string(), fields.clone()));
        Ok(())
    }
}

const TOKEN_SECRET: &str = "integration-test-secret-32-bytes";

fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.token_secret = TOKEN_SECRET.to_string();
    config.auth.allowed_callers = vec!["skill-a".to_string()];
    config.delivery.max_retries = 0;
    config.delivery.retry_backoff_ms = 1;
    config
}

fn setup() -> (Router, AuthState, Arc<RecordingAdapter>) {
    let config = test_config();
    let adapter = Arc::new(RecordingAdapter::default());
    let state = build_state(&config, vec![adapter.clone()]).unwrap();
    let auth = AuthState::new(
        TOKEN_SECRET,
        CallerValidator::new(&config.auth.allowed_callers),
    );
    (routes::router(state, auth.clone()), auth, adapter)
}

fn request(token: Option<&str>, method: &str, uri: &str, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn reference_body() -> Value {
    json!({
        "channelId": "msteams",
        "serviceUrl": "https://smba.example.com/teams",
        "conversationId": "conv-1",
        "userId": "user-1",
        "botId": "bot-1"
    })
}

fn notification_body(status: &str, at: &str) -> Value {
    json!({
        "correlationId": "TICKET-1",
        "fields": { "status": status },
        "timestamp": at
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Authentication
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_unauthenticated() {
    let (app, _, _) = setup();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let (app, _, _) = setup();
    let response = app
        .oneshot(request(None, "POST", "/api/notifications", notification_body("open", "2026-08-29T12:00:00Z")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unlisted_skill_caller_is_forbidden() {
    let (app, auth, _) = setup();
    let token = auth.issue_token(Some("skill-unknown"), true).unwrap();
    let response = app
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/notifications",
            notification_body("open", "2026-08-29T12:00:00Z"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn channel_traffic_bypasses_allow_list() {
    let (app, auth, _) = setup();
    // No skill claim at all; allow-list does not apply
    let token = auth.issue_token(None, false).unwrap();
    let response = app
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/references/TICKET-1",
            reference_body(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

// ─────────────────────────────────────────────────────────────────────────────
// Notification flow
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn notification_for_unknown_session_is_dropped() {
    let (app, auth, _) = setup();
    let token = auth.issue_token(Some("skill-a"), true).unwrap();
    let response = app
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/notifications",
            notification_body("open", "2026-08-29T12:00:00Z"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn first_notification_sends_then_updates_in_place() {
    let (app, auth, adapter) = setup();
    let token = auth.issue_token(Some("skill-a"), true).unwrap();

    let response = app
        .clone()
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/references/TICKET-1",
            reference_body(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // First notification appends a new message
    let response = app
        .clone()
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/notifications",
            notification_body("open", "2026-08-29T12:00:00Z"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["accepted"], json!(true));
    assert_eq!(body["activityId"], json!("msg-1"));
    assert_eq!(body["updated"], json!(false));

    // Newer notification edits the recorded message
    let response = app
        .clone()
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/notifications",
            notification_body("resolved", "2026-08-29T12:05:00Z"),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["updated"], json!(true));
    assert_eq!(body["activityId"], json!("msg-1"));

    assert_eq!(adapter.sends.lock().unwrap().len(), 1);
    let updates = adapter.updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, "msg-1");
    assert_eq!(updates[0].1.get("status"), Some(&"resolved".to_string()));
}

#[tokio::test]
async fn stale_notification_is_discarded_without_delivery() {
    let (app, auth, adapter) = setup();
    let token = auth.issue_token(Some("skill-a"), true).unwrap();

    app.clone()
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/references/TICKET-1",
            reference_body(),
        ))
        .await
        .unwrap();
    app.clone()
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/notifications",
            notification_body("resolved", "2026-08-29T12:05:00Z"),
        ))
        .await
        .unwrap();

    // Out-of-order delivery with an older timestamp
    let response = app
        .clone()
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/notifications",
            notification_body("open", "2026-08-29T12:00:00Z"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["accepted"], json!(false));
    assert_eq!(body["dispatched"], json!(false));

    // Only the first notification reached the channel
    assert_eq!(adapter.sends.lock().unwrap().len(), 1);
    assert!(adapter.updates.lock().unwrap().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn closed_session_rejects_dispatch() {
    let (app, auth, _) = setup();
    let token = auth.issue_token(Some("skill-a"), true).unwrap();

    app.clone()
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/references/TICKET-1",
            reference_body(),
        ))
        .await
        .unwrap();
    app.clone()
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/notifications",
            notification_body("open", "2026-08-29T12:00:00Z"),
        ))
        .await
        .unwrap();

    // Skill signals completion; host acknowledges
    let response = app
        .clone()
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/conversations/TICKET-1/end",
            json!({ "code": "success", "result": { "ticketId": "TICKET-1" } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["code"], json!("success"));

    let response = app
        .clone()
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/conversations/TICKET-1/end/ack",
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Fresh notification for the closed session is rejected
    let response = app
        .clone()
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/notifications",
            notification_body("reopened", "2026-08-29T13:00:00Z"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn host_end_closes_immediately() {
    let (app, auth, _) = setup();
    let token = auth.issue_token(Some("skill-a"), true).unwrap();

    app.clone()
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/references/TICKET-1",
            reference_body(),
        ))
        .await
        .unwrap();
    app.clone()
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/notifications",
            notification_body("open", "2026-08-29T12:00:00Z"),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(request(
            Some(&token),
            "POST",
            "/api/conversations/TICKET-1/host-end",
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/conversations/TICKET-1")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["phase"], json!("closed"));
}
