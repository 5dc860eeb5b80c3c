//! Webhook Configuration Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response for `GET /admin/webhook-config` and `POST /admin/webhook-config`.
///
/// An unset default renders as empty strings with no `updated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfigResponse {
    pub url: String,
    pub secret: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Response for the per-session override endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentWebhookConfigResponse {
    #[serde(rename = "agentId")]
    pub agent_id: String,
    pub url: String,
    pub secret: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Request body for saving a default or per-session webhook target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveWebhookRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
}

/// Response for `POST /webhooks/{agentId}/events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAcceptedResponse {
    pub accepted: bool,
}
