//! Webhook Database Queries
//!
//! Default target and per-session overrides.
//! Uses runtime queries (`sqlx::query` / `sqlx::query_as`) to avoid
//! requiring a live database at compile time.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::types::{WebhookScope, WebhookTarget};

#[derive(Debug, sqlx::FromRow)]
struct DefaultRow {
    url: String,
    secret: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OverrideRow {
    agent_id: String,
    url: String,
    secret: Option<String>,
    updated_at: DateTime<Utc>,
}

/// Load the default target, if one was saved.
pub async fn get_default(pool: &PgPool) -> sqlx::Result<Option<WebhookTarget>> {
    let row = sqlx::query_as::<_, DefaultRow>(
        "SELECT url, secret, updated_at FROM webhook_config WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| WebhookTarget {
        scope: WebhookScope::Default,
        url: r.url,
        secret: r.secret,
        updated_at: r.updated_at,
    }))
}

/// Save the default target (singleton row).
pub async fn upsert_default(pool: &PgPool, target: &WebhookTarget) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO webhook_config (id, url, secret, updated_at)
        VALUES (1, $1, $2, $3)
        ON CONFLICT (id) DO UPDATE SET
            url = EXCLUDED.url,
            secret = EXCLUDED.secret,
            updated_at = EXCLUDED.updated_at
        ",
    )
    .bind(&target.url)
    .bind(target.secret.as_deref())
    .bind(target.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load every session override.
pub async fn list_overrides(pool: &PgPool) -> sqlx::Result<Vec<WebhookTarget>> {
    let rows = sqlx::query_as::<_, OverrideRow>(
        "SELECT agent_id, url, secret, updated_at FROM agent_webhook_config",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| WebhookTarget {
            scope: WebhookScope::SessionOverride(r.agent_id),
            url: r.url,
            secret: r.secret,
            updated_at: r.updated_at,
        })
        .collect())
}

/// Save a session override.
pub async fn upsert_override(
    pool: &PgPool,
    agent_id: &str,
    target: &WebhookTarget,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO agent_webhook_config (agent_id, url, secret, updated_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (agent_id) DO UPDATE SET
            url = EXCLUDED.url,
            secret = EXCLUDED.secret,
            updated_at = EXCLUDED.updated_at
        ",
    )
    .bind(agent_id)
    .bind(&target.url)
    .bind(target.secret.as_deref())
    .bind(target.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete a session override. Returns whether a row was removed.
pub async fn delete_override(pool: &PgPool, agent_id: &str) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM agent_webhook_config WHERE agent_id = $1")
        .bind(agent_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
