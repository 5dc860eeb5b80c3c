//! Session Types
//!
//! The session record owned by the registry, its inputs, and errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use gw_common::{QrData, SessionState, SessionSummary, Timestamps};
use thiserror::Error;

use crate::util::api_error;

/// Content type of QR payloads issued by the transport.
pub const QR_CONTENT_TYPE: &str = "image/png";

/// One messaging-agent login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub api_key: Option<String>,
    pub endpoint_override: Option<String>,
    pub state: SessionState,
    /// Present only while `state == AwaitingScan`.
    pub qr_token: Option<Vec<u8>>,
    pub qr_issued_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Effective inference endpoint: the override, or `{base}/agents/{agent_id}/execute`.
    pub fn endpoint(&self, ai_backend_url: &str) -> String {
        self.endpoint_override.clone().unwrap_or_else(|| {
            format!(
                "{}/agents/{}/execute",
                ai_backend_url.trim_end_matches('/'),
                self.agent_id
            )
        })
    }

    /// The live QR token rendered for JSON transport.
    pub fn qr_data(&self) -> Option<QrData> {
        self.qr_token.as_deref().map(render_qr)
    }

    pub const fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Authenticated)
    }

    pub fn timestamps(&self) -> Timestamps {
        Timestamps {
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            user_id: self.user_id.clone(),
            agent_id: self.agent_id.clone(),
            agent_name: self.agent_name.clone(),
            status: self.state,
        }
    }
}

/// Base64-render an opaque QR token.
pub fn render_qr(token: &[u8]) -> QrData {
    QrData {
        content_type: QR_CONTENT_TYPE.to_string(),
        base64: STANDARD.encode(token),
    }
}

/// Input for [`SessionRegistry::create`](super::registry::SessionRegistry::create).
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub user_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub api_key: Option<String>,
    pub endpoint_override: Option<String>,
}

/// Fields updated together with a state transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub qr_token: Option<Vec<u8>>,
    pub qr_issued_at: Option<DateTime<Utc>>,
}

impl TransitionFields {
    /// A freshly issued token.
    pub fn issued(token: Vec<u8>, at: DateTime<Utc>) -> Self {
        Self {
            qr_token: Some(token),
            qr_issued_at: Some(at),
        }
    }
}

/// Session registry errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Validation: {0}")]
    Validation(String),
    #[error("Session already exists for agent {agent_id}")]
    DuplicateSession { agent_id: String },
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
    /// The caller's refresh generation was stopped before the transition applied.
    #[error("Transition cancelled: refresh loop stopped")]
    Cancelled,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// The task applying a transition panicked or was shut down.
    #[error("Session write aborted: {0}")]
    Aborted(String),
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(msg) => api_error(StatusCode::BAD_REQUEST, "INVALID_PAYLOAD", msg),
            Self::DuplicateSession { .. } => {
                api_error(StatusCode::CONFLICT, "SESSION_EXISTS", self.to_string())
            }
            Self::NotFound(_) => {
                api_error(StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", self.to_string())
            }
            Self::InvalidTransition { .. } => {
                api_error(StatusCode::CONFLICT, "INVALID_TRANSITION", self.to_string())
            }
            Self::Cancelled => api_error(StatusCode::CONFLICT, "CANCELLED", self.to_string()),
            Self::Database(e) => {
                tracing::error!("Database error: {}", e);
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error",
                )
            }
            Self::Aborted(e) => {
                tracing::error!("Session write aborted: {}", e);
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error",
                )
            }
        }
    }
}
