//! Session API Handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use gw_common::{
    CreateSessionRequest, CreateSessionResponse, DeleteSessionResponse, GetQrResponse,
    GetSessionResponse, RefreshLoopResponse, SessionListResponse,
};
use tracing::{info, instrument};

use super::types::Session;
use crate::api::AppState;
use crate::handshake::HandshakeError;

fn provision_response(session: &Session) -> CreateSessionResponse {
    CreateSessionResponse {
        is_ready: session.is_ready(),
        session_state: session.state,
        qr: session.qr_data(),
        timestamps: session.timestamps(),
    }
}

fn session_response(state: &AppState, session: &Session) -> GetSessionResponse {
    GetSessionResponse {
        agent_id: session.agent_id.clone(),
        agent_name: session.agent_name.clone(),
        is_ready: session.is_ready(),
        session_state: session.state,
        endpoint_url_run: session.endpoint(&state.config.ai_backend_url),
        qr: session.qr_data(),
        qr_updated_at: session.qr_token.as_ref().and(session.qr_issued_at),
        refresh_active: state.handshake.is_refreshing(&session.agent_id),
        last_error: state.handshake.last_error(&session.agent_id),
        timestamps: session.timestamps(),
    }
}

/// POST /sessions
#[instrument(skip(state, req), fields(agent_id = %req.agent_id))]
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), HandshakeError> {
    let session = state.handshake.provision(req, state.api_keys.as_ref()).await?;
    Ok((StatusCode::CREATED, Json(provision_response(&session))))
}

/// GET /sessions/{agent_id}
#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<GetSessionResponse>, HandshakeError> {
    let session = state.sessions.get(&agent_id).await?;
    Ok(Json(session_response(&state, &session)))
}

/// DELETE /sessions/{agent_id}
///
/// Stops the refresh loop and removes the session with its webhook override.
/// The `session.deleted` event still goes to the target in effect before removal.
#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<DeleteSessionResponse>, HandshakeError> {
    state.webhooks.pin_final_target(&agent_id).await;
    if let Err(e) = state.handshake.delete(&agent_id).await {
        state.webhooks.unpin_final_target(&agent_id);
        return Err(e);
    }
    if let Err(e) = state.webhooks.store().clear_override(&agent_id).await {
        tracing::warn!(agent_id = %agent_id, error = %e, "Failed to clear webhook override");
    }
    Ok(Json(DeleteSessionResponse { deleted: true }))
}

/// POST /sessions/{agent_id}/reconnect
#[instrument(skip(state))]
pub async fn reconnect_session(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<CreateSessionResponse>, HandshakeError> {
    let session = state
        .handshake
        .reconnect(&agent_id, state.api_keys.as_ref())
        .await?;
    Ok(Json(provision_response(&session)))
}

/// POST /sessions/{agent_id}/qr
#[instrument(skip(state))]
pub async fn request_qr(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<GetQrResponse>, HandshakeError> {
    let session = state.handshake.request_token(&agent_id).await?;
    match (session.qr_data(), session.qr_issued_at) {
        (Some(qr), Some(qr_updated_at)) => Ok(Json(GetQrResponse { qr, qr_updated_at })),
        _ => Err(HandshakeError::TokenUnavailable {
            agent_id,
            reason: "session holds no token".to_string(),
        }),
    }
}

/// POST /sessions/{agent_id}/qr/refresh
#[instrument(skip(state))]
pub async fn start_refresh(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<RefreshLoopResponse>, HandshakeError> {
    let session = state.sessions.get(&agent_id).await?;
    if session.state.is_terminal() {
        return Err(HandshakeError::TokenUnavailable {
            agent_id,
            reason: format!("session is {}", session.state),
        });
    }

    let interval = state.handshake.refresh_interval();
    state.handshake.start_refresh_loop(&agent_id, interval)?;
    Ok(Json(RefreshLoopResponse {
        agent_id,
        active: true,
        interval_secs: Some(interval.as_secs()),
    }))
}

/// DELETE /sessions/{agent_id}/qr/refresh
#[instrument(skip(state))]
pub async fn stop_refresh(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Json<RefreshLoopResponse> {
    state.handshake.stop_refresh_loop(&agent_id);
    Json(RefreshLoopResponse {
        agent_id,
        active: false,
        interval_secs: None,
    })
}

/// POST /sessions/{agent_id}/authenticated
///
/// Scan completion pushed by the transport.
#[instrument(skip(state))]
pub async fn confirm_scan(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<GetSessionResponse>, HandshakeError> {
    let session = state.handshake.confirm_scan(&agent_id).await?;
    info!(agent_id = %agent_id, "Scan confirmed by transport");
    Ok(Json(session_response(&state, &session)))
}

/// GET /admin/sessions
#[instrument(skip(state))]
pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    let sessions = state
        .sessions
        .list()
        .await
        .iter()
        .map(Session::summary)
        .collect();
    Json(SessionListResponse { sessions })
}
