//! Webhook Types
//!
//! Webhook targets, delivery outcomes and errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use gw_common::{AgentWebhookConfigResponse, WebhookConfigResponse};
use thiserror::Error;

use crate::util::api_error;

/// Which configuration a target came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookScope {
    Default,
    SessionOverride(String),
}

/// A webhook URL with its optional signing secret.
///
/// `url` is empty only for a session override that defers to the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub scope: WebhookScope,
    pub url: String,
    /// Absent means deliveries are unsigned.
    pub secret: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookTarget {
    pub fn is_usable(&self) -> bool {
        !self.url.is_empty()
    }
}

/// Render the default target, blank when unset.
pub fn default_response(target: Option<&WebhookTarget>) -> WebhookConfigResponse {
    WebhookConfigResponse {
        url: target.map(|t| t.url.clone()).unwrap_or_default(),
        secret: target.and_then(|t| t.secret.clone()).unwrap_or_default(),
        updated_at: target.map(|t| t.updated_at),
    }
}

/// Render a session override, blank when unset.
pub fn override_response(agent_id: &str, target: Option<&WebhookTarget>) -> AgentWebhookConfigResponse {
    AgentWebhookConfigResponse {
        agent_id: agent_id.to_string(),
        url: target.map(|t| t.url.clone()).unwrap_or_default(),
        secret: target.and_then(|t| t.secret.clone()).unwrap_or_default(),
        updated_at: target.map(|t| t.updated_at),
    }
}

/// Result of one [`deliver`](super::dispatch::WebhookDispatcher::deliver) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32, status: u16 },
    /// No usable webhook target; the event was dropped.
    Skipped,
    Exhausted { attempts: u32, last_error: String },
}

/// Webhook errors.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Validation: {0}")]
    Validation(String),
    #[error("No webhook configured for session {0}")]
    NoWebhookConfigured(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(msg) => api_error(StatusCode::BAD_REQUEST, "INVALID_PAYLOAD", msg),
            Self::NoWebhookConfigured(_) => {
                api_error(StatusCode::NOT_FOUND, "NO_WEBHOOK_CONFIGURED", self.to_string())
            }
            Self::Database(e) => {
                tracing::error!("Database error: {}", e);
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error",
                )
            }
        }
    }
}
