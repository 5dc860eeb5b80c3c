//! Admin Console Routes
//!
//! Endpoints the admin console drives:
//! - Default webhook configuration
//! - Session listing and per-session webhook overrides

use axum::{routing::get, Router};

use crate::api::AppState;
use crate::{sessions, webhooks};

/// Create the admin router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/webhook-config",
            get(webhooks::handlers::get_default).post(webhooks::handlers::save_default),
        )
        .route("/sessions", get(sessions::handlers::list_sessions))
        .route(
            "/sessions/{agent_id}/webhook",
            get(webhooks::handlers::get_override)
                .post(webhooks::handlers::save_override)
                .delete(webhooks::handlers::clear_override),
        )
}
