//! Session Lifecycle Events
//!
//! Emitted by the registry on every state change and consumed by the webhook
//! dispatcher.

use chrono::{DateTime, Utc};
use gw_common::SessionState;
use serde::{Deserialize, Serialize};

/// Lifecycle event types, named the way they appear in webhook payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionEventKind {
    #[serde(rename = "session.created")]
    Created,
    #[serde(rename = "session.qr_issued")]
    QrIssued,
    #[serde(rename = "session.authenticated")]
    Authenticated,
    #[serde(rename = "session.expired")]
    Expired,
    #[serde(rename = "session.failed")]
    Failed,
    #[serde(rename = "session.deleted")]
    Deleted,
}

impl SessionEventKind {
    /// Convert to the dot-separated string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "session.created",
            Self::QrIssued => "session.qr_issued",
            Self::Authenticated => "session.authenticated",
            Self::Expired => "session.expired",
            Self::Failed => "session.failed",
            Self::Deleted => "session.deleted",
        }
    }

    /// The event announcing entry into `state`.
    pub const fn entering(state: SessionState) -> Self {
        match state {
            SessionState::Created => Self::Created,
            SessionState::AwaitingScan => Self::QrIssued,
            SessionState::Authenticated => Self::Authenticated,
            SessionState::Expired => Self::Expired,
            SessionState::Failed => Self::Failed,
        }
    }
}

impl std::fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change observed on one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub kind: SessionEventKind,
    #[serde(rename = "agentId")]
    pub agent_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub state: SessionState,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    /// Webhook payload for this event.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.kind.as_str(),
            "agentId": self.agent_id,
            "userId": self.user_id,
            "state": self.state.as_str(),
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}
