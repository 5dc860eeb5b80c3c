//! API Router and Application State
//!
//! Central routing configuration and shared state.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit, extract::State, middleware::from_fn_with_state, routing::get,
    routing::post, Json, Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    admin, auth,
    config::Config,
    handshake::{ApiKeySource, HandshakeController},
    sessions::{self, SessionRegistry},
    webhooks::{self, WebhookDispatcher},
};

/// Largest accepted request body (inbound relayed events included).
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Session registry
    pub sessions: Arc<SessionRegistry>,
    /// QR handshake controller (owns refresh loops)
    pub handshake: HandshakeController,
    /// Webhook dispatcher and its configuration store
    pub webhooks: WebhookDispatcher,
    /// Active API keys used when provisioning without one
    pub api_keys: Arc<dyn ApiKeySource>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        config: Config,
        handshake: HandshakeController,
        webhooks: WebhookDispatcher,
        api_keys: Arc<dyn ApiKeySource>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::clone(handshake.registry()),
            handshake,
            webhooks,
            api_keys,
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Console and transport routes, behind basic auth when configured
    let protected_routes = Router::new()
        .nest("/sessions", sessions::router())
        .nest("/admin", admin::router())
        .route(
            "/webhooks/{agent_id}/events",
            post(webhooks::handlers::relay_event),
        )
        .layer(from_fn_with_state(state.clone(), auth::require_basic_auth));

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .merge(protected_routes)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        // State
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Sessions held in the registry
    sessions: usize,
    /// Running QR refresh loops
    active_refresh_loops: usize,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.sessions.len(),
        active_refresh_loops: state.handshake.active_loops(),
    })
}
