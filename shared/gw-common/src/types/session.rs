//! Session Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a messaging-agent session.
///
/// `Authenticated` and `Failed` are terminal. `Expired` is not: a refresh that
/// reissues a QR token moves the session back to `AwaitingScan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Provisioned, no QR token issued yet.
    #[default]
    Created,
    /// A QR token is live and waiting to be scanned.
    AwaitingScan,
    /// The transport confirmed a completed scan.
    Authenticated,
    /// The token's validity window elapsed without a scan.
    Expired,
    /// Unrecoverable provisioning or transport error.
    Failed,
}

impl SessionState {
    /// Parse from the snake-case form (e.g., `"awaiting_scan"`).
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "awaiting_scan" => Some(Self::AwaitingScan),
            "authenticated" => Some(Self::Authenticated),
            "expired" => Some(Self::Expired),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Convert to the snake-case string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingScan => "awaiting_scan",
            Self::Authenticated => "authenticated",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }

    /// No transition leaves a terminal state.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Authenticated | Self::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `AwaitingScan -> AwaitingScan` is the refresh that replaces a live token.
    /// `Created -> Failed` covers a provisioning error before the first token.
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::AwaitingScan | Self::Failed)
                | (
                    Self::AwaitingScan,
                    Self::AwaitingScan | Self::Authenticated | Self::Expired | Self::Failed
                )
                | (Self::Expired, Self::AwaitingScan | Self::Failed)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body for `POST /sessions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub agent_name: String,
    /// Falls back to the user's active API key when absent.
    #[serde(default, rename = "apikey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Overrides the default inference endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url_run: Option<String>,
}

/// A scannable QR payload rendered for transport over JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrData {
    pub content_type: String,
    pub base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamps {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Response for `POST /sessions` and `POST /sessions/{agentId}/reconnect`.
///
/// `qr` is present only when the transport issued a token synchronously.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub is_ready: bool,
    pub session_state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<QrData>,
    pub timestamps: Timestamps,
}

/// Response for `GET /sessions/{agentId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSessionResponse {
    pub agent_id: String,
    pub agent_name: String,
    pub is_ready: bool,
    pub session_state: SessionState,
    pub endpoint_url_run: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<QrData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_updated_at: Option<DateTime<Utc>>,
    pub refresh_active: bool,
    /// Last refresh-loop failure, if the loop stopped on an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub timestamps: Timestamps,
}

/// Response for `POST /sessions/{agentId}/qr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetQrResponse {
    pub qr: QrData,
    pub qr_updated_at: DateTime<Utc>,
}

/// Response for the refresh-loop control endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshLoopResponse {
    pub agent_id: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSessionResponse {
    pub deleted: bool,
}

/// Lightweight view of a session for admin listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub user_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub status: SessionState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_str() {
        for state in [
            SessionState::Created,
            SessionState::AwaitingScan,
            SessionState::Authenticated,
            SessionState::Expired,
            SessionState::Failed,
        ] {
            assert_eq!(SessionState::parse_str(state.as_str()), Some(state));
        }
        assert_eq!(SessionState::parse_str("connected"), None);
    }

    #[test]
    fn permitted_transitions() {
        use SessionState::*;
        assert!(Created.can_transition_to(AwaitingScan));
        assert!(AwaitingScan.can_transition_to(Authenticated));
        assert!(AwaitingScan.can_transition_to(Expired));
        assert!(AwaitingScan.can_transition_to(AwaitingScan));
        assert!(Expired.can_transition_to(AwaitingScan));
        assert!(Expired.can_transition_to(Failed));
        assert!(AwaitingScan.can_transition_to(Failed));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use SessionState::*;
        for next in [Created, AwaitingScan, Authenticated, Expired, Failed] {
            assert!(!Authenticated.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
        assert!(!Created.can_transition_to(Authenticated));
        assert!(!Expired.can_transition_to(Authenticated));
        assert!(!Created.can_transition_to(Expired));
    }

    #[test]
    fn create_request_accepts_console_field_names() {
        let req: CreateSessionRequest = serde_json::from_str(
            r#"{"userId":"u1","agentId":"a1","agentName":"Bot","apikey":"k","endpointUrlRun":"https://ai.example/run"}"#,
        )
        .unwrap();
        assert_eq!(req.user_id, "u1");
        assert_eq!(req.api_key.as_deref(), Some("k"));
        assert_eq!(req.endpoint_url_run.as_deref(), Some("https://ai.example/run"));
    }

    #[test]
    fn create_response_omits_absent_qr() {
        let now = Utc::now();
        let resp = CreateSessionResponse {
            is_ready: false,
            session_state: SessionState::Created,
            qr: None,
            timestamps: Timestamps {
                created_at: now,
                updated_at: now,
            },
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("qr").is_none());
        assert_eq!(json["sessionState"], "created");
    }
}
