//! Webhook API Handlers
//!
//! Default target, per-session overrides, and the inbound event relay.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gw_common::{
    AgentWebhookConfigResponse, EventAcceptedResponse, SaveWebhookRequest, WebhookConfigResponse,
};
use serde_json::Value;
use tracing::{info, instrument};

use super::types::{default_response, override_response};
use crate::api::AppState;
use crate::sessions::types::SessionError;

/// GET /admin/webhook-config
#[instrument(skip(state))]
pub async fn get_default(State(state): State<AppState>) -> Json<WebhookConfigResponse> {
    let target = state.webhooks.store().get_default().await;
    Json(default_response(target.as_ref()))
}

/// POST /admin/webhook-config
#[instrument(skip(state, req))]
pub async fn save_default(
    State(state): State<AppState>,
    Json(req): Json<SaveWebhookRequest>,
) -> Response {
    match state
        .webhooks
        .store()
        .set_default(&req.url, req.secret.as_deref())
        .await
    {
        Ok(target) => Json(default_response(Some(&target))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /admin/sessions/{agent_id}/webhook
#[instrument(skip(state))]
pub async fn get_override(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Json<AgentWebhookConfigResponse> {
    let target = state.webhooks.store().get_override(&agent_id).await;
    Json(override_response(&agent_id, target.as_ref()))
}

/// POST /admin/sessions/{agent_id}/webhook
#[instrument(skip(state, req))]
pub async fn save_override(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(req): Json<SaveWebhookRequest>,
) -> Response {
    if let Err(e) = state.sessions.get(&agent_id).await {
        return e.into_response();
    }
    match state
        .webhooks
        .store()
        .set_override(&agent_id, &req.url, req.secret.as_deref())
        .await
    {
        Ok(target) => Json(override_response(&agent_id, Some(&target))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /admin/sessions/{agent_id}/webhook
#[instrument(skip(state))]
pub async fn clear_override(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Response {
    match state.webhooks.store().clear_override(&agent_id).await {
        Ok(_) => Json(override_response(&agent_id, None)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /webhooks/{agent_id}/events
///
/// Relays an event from the transport to the session's webhook. Delivery runs
/// in the background.
#[instrument(skip(state, payload))]
pub async fn relay_event(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<EventAcceptedResponse>), SessionError> {
    state.sessions.get(&agent_id).await?;
    state.webhooks.spawn_deliver(agent_id.clone(), payload);
    info!(agent_id = %agent_id, "Event accepted for delivery");
    Ok((StatusCode::ACCEPTED, Json(EventAcceptedResponse { accepted: true })))
}
