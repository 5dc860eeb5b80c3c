//! Messaging-Agent Sessions
//!
//! The session registry, its lifecycle events and the session endpoints.

pub mod events;
pub mod handlers;
mod queries;
pub mod registry;
pub mod types;

use axum::routing::{get, post};
use axum::Router;

use crate::api::AppState;

pub use events::{SessionEvent, SessionEventKind};
pub use registry::SessionRegistry;
pub use types::{NewSession, Session, SessionError, TransitionFields};

/// Create the session router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::create_session))
        .route(
            "/{agent_id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/{agent_id}/reconnect", post(handlers::reconnect_session))
        .route("/{agent_id}/qr", post(handlers::request_qr))
        .route(
            "/{agent_id}/qr/refresh",
            post(handlers::start_refresh).delete(handlers::stop_refresh),
        )
        .route("/{agent_id}/authenticated", post(handlers::confirm_scan))
}
