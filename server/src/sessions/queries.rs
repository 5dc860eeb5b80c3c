//! Session Database Queries
//!
//! Uses runtime queries (`sqlx::query` / `sqlx::query_as`) to avoid
//! requiring a live database at compile time.

use chrono::{DateTime, Utc};
use gw_common::SessionState;
use sqlx::PgPool;
use tracing::warn;

use super::types::Session;

/// Row shape of `whatsapp_sessions`.
#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    agent_id: String,
    user_id: String,
    agent_name: String,
    api_key: Option<String>,
    endpoint_url_run: Option<String>,
    status: String,
    qr_issued_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SessionRow {
    /// Tokens are not persisted, so a session stored mid-scan comes back `Expired`.
    fn into_session(self) -> Session {
        let state = match SessionState::parse_str(&self.status) {
            Some(SessionState::AwaitingScan) => SessionState::Expired,
            Some(state) => state,
            None => {
                warn!(agent_id = %self.agent_id, status = %self.status, "Unknown stored session status, loading as failed");
                SessionState::Failed
            }
        };
        Session {
            user_id: self.user_id,
            agent_id: self.agent_id,
            agent_name: self.agent_name,
            api_key: self.api_key,
            endpoint_override: self.endpoint_url_run,
            state,
            qr_token: None,
            qr_issued_at: self.qr_issued_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Insert or update a session row.
pub async fn upsert_session(pool: &PgPool, session: &Session) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO whatsapp_sessions
            (agent_id, user_id, agent_name, api_key, endpoint_url_run, status, qr_issued_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (agent_id) DO UPDATE SET
            status = EXCLUDED.status,
            qr_issued_at = EXCLUDED.qr_issued_at,
            updated_at = EXCLUDED.updated_at
        ",
    )
    .bind(&session.agent_id)
    .bind(&session.user_id)
    .bind(&session.agent_name)
    .bind(session.api_key.as_deref())
    .bind(session.endpoint_override.as_deref())
    .bind(session.state.as_str())
    .bind(session.qr_issued_at)
    .bind(session.created_at)
    .bind(session.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete a session row.
pub async fn delete_session(pool: &PgPool, agent_id: &str) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM whatsapp_sessions WHERE agent_id = $1")
        .bind(agent_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Load every stored session.
pub async fn list_sessions(pool: &PgPool) -> sqlx::Result<Vec<Session>> {
    let rows = sqlx::query_as::<_, SessionRow>(
        r"
        SELECT agent_id, user_id, agent_name, api_key, endpoint_url_run,
               status, qr_issued_at, created_at, updated_at
        FROM whatsapp_sessions
        ORDER BY created_at ASC
        ",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(SessionRow::into_session).collect())
}
