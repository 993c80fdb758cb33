//! HTTP routes for the courier gateway.
//!
//! - `GET  /health` — liveness, unauthenticated
//! - `POST /api/references/:correlation_id` — register a conversation
//!   reference on the first turn of a session
//! - `GET  /api/conversations/:correlation_id` — activity record state
//! - `POST /api/notifications` — webhook ingestion for external
//!   notifications (ticket events, business rules)
//! - `POST /api/conversations/:correlation_id/end` — skill-side
//!   end-of-conversation signal
//! - `POST /api/conversations/:correlation_id/end/ack` — host
//!   acknowledgment of a pending end
//! - `POST /api/conversations/:correlation_id/host-end` — host-driven
//!   termination
//!
//! All `/api` routes sit behind the caller auth middleware.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use courier_common::Error;
use courier_session::{
    ActivityTracker, ConversationReference, Dispatcher, EndOfConversation, LifecycleController,
    ReferenceStore, SessionPhase,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::auth::{caller_auth_middleware, AuthState};
use crate::deliver::DeliveryExecutor;
use courier_session::tracker::ExternalNotification;

// ============================================================================
// State
// ============================================================================

/// Shared state for the gateway HTTP server.
pub struct GatewayState {
    /// Conversation reference persistence
    pub store: Arc<dyn ReferenceStore>,
    /// Activity record tracking
    pub tracker: Arc<ActivityTracker>,
    /// Edit-vs-append decisions
    pub dispatcher: Arc<Dispatcher>,
    /// Session teardown state machine
    pub lifecycle: Arc<LifecycleController>,
    /// Outbound delivery with bounded retry
    pub delivery: Arc<DeliveryExecutor>,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    /// Whether any field of the notification was fresh
    pub accepted: bool,
    /// Whether an outbound message was produced
    pub dispatched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    /// True when an existing message was edited in place
    #[serde(default)]
    pub updated: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationStateResponse {
    pub phase: SessionPhase,
    pub record: serde_json::Value,
}

fn error_response(err: Error) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "courier-gateway",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Register (or migrate) the conversation reference for a correlation
/// id. Called on the first turn of a conversation that subscribes to
/// external events.
async fn put_reference(
    State(state): State<Arc<GatewayState>>,
    Path(correlation_id): Path<String>,
    Json(reference): Json<ConversationReference>,
) -> Response {
    match state.store.put(&correlation_id, reference).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

/// Current phase and activity record for a correlation id.
async fn get_conversation(
    State(state): State<Arc<GatewayState>>,
    Path(correlation_id): Path<String>,
) -> Response {
    match state.tracker.resolve(&correlation_id).await {
        Ok(record) => Json(ConversationStateResponse {
            phase: state.lifecycle.phase(&correlation_id),
            record: serde_json::to_value(&record).unwrap_or_default(),
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

/// Webhook ingestion: fold the notification into the activity record,
/// then dispatch and deliver when anything fresh was accepted.
async fn post_notification(
    State(state): State<Arc<GatewayState>>,
    Json(notification): Json<ExternalNotification>,
) -> Response {
    let correlation_id = notification.correlation_id.clone();

    let outcome = match state.tracker.apply(notification).await {
        Ok(outcome) => outcome,
        Err(err) => {
            // No session to deliver to; logged and dropped, not retried
            tracing::warn!(
                correlation_id = %correlation_id,
                error = %err,
                "Dropping notification"
            );
            return error_response(err);
        }
    };

    if !outcome.is_dirty() {
        return Json(NotificationResponse {
            accepted: false,
            dispatched: false,
            activity_id: None,
            updated: false,
        })
        .into_response();
    }

    let instruction = match state.dispatcher.dispatch(&correlation_id).await {
        Ok(instruction) => instruction,
        Err(err) => return error_response(err),
    };

    match state.delivery.execute(&correlation_id, instruction).await {
        Ok(receipt) => Json(NotificationResponse {
            accepted: true,
            dispatched: true,
            activity_id: Some(receipt.activity_id),
            updated: receipt.updated,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

/// Skill-side completion signal; returns the end-of-conversation
/// payload surfaced to the host.
async fn post_end(
    State(state): State<Arc<GatewayState>>,
    Path(correlation_id): Path<String>,
    Json(completion): Json<EndOfConversation>,
) -> Response {
    match state.lifecycle.request_end(&correlation_id, completion) {
        Ok(signal) => Json(signal).into_response(),
        Err(err) => error_response(err),
    }
}

/// Host acknowledgment of a pending end-of-conversation.
async fn post_end_ack(
    State(state): State<Arc<GatewayState>>,
    Path(correlation_id): Path<String>,
) -> Response {
    match state.lifecycle.acknowledge(&correlation_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

/// Host-driven termination; closes the session immediately.
async fn post_host_end(
    State(state): State<Arc<GatewayState>>,
    Path(correlation_id): Path<String>,
) -> Response {
    state.lifecycle.host_ended(&correlation_id);
    StatusCode::NO_CONTENT.into_response()
}

// ============================================================================
// Router
// ============================================================================

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>, auth: AuthState) -> Router {
    let api = Router::new()
        .route("/references/:correlation_id", post(put_reference))
        .route("/conversations/:correlation_id", get(get_conversation))
        .route("/notifications", post(post_notification))
        .route("/conversations/:correlation_id/end", post(post_end))
        .route("/conversations/:correlation_id/end/ack", post(post_end_ack))
        .route(
            "/conversations/:correlation_id/host-end",
            post(post_host_end),
        )
        .layer(middleware::from_fn_with_state(
            auth.clone(),
            caller_auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(RequestBodyLimitLayer::new(256 * 1024))
}
