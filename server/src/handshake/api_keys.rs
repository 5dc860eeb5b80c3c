//! Active API Keys
//!
//! Resolves the key a session uses when it is provisioned without one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

#[async_trait]
pub trait ApiKeySource: Send + Sync {
    /// The user's active key, if any.
    async fn active_key(&self, user_id: &str) -> Option<String>;
}

/// Keys configured through `ACTIVE_API_KEYS`.
#[derive(Debug, Clone, Default)]
pub struct StaticApiKeys {
    keys: HashMap<String, String>,
}

impl StaticApiKeys {
    pub const fn new(keys: HashMap<String, String>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl ApiKeySource for StaticApiKeys {
    async fn active_key(&self, user_id: &str) -> Option<String> {
        self.keys.get(user_id).cloned()
    }
}

/// Most recent active key from the `api_keys` table.
#[derive(Debug, Clone)]
pub struct PgApiKeys {
    pool: PgPool,
}

impl PgApiKeys {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeySource for PgApiKeys {
    async fn active_key(&self, user_id: &str) -> Option<String> {
        let row: Result<Option<(String,)>, sqlx::Error> = sqlx::query_as(
            r"
            SELECT access_token FROM api_keys
            WHERE user_id = $1 AND is_active
            ORDER BY created_at DESC
            LIMIT 1
            ",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(row) => row.map(|(token,)| token),
            Err(e) => {
                warn!(user_id, error = %e, "API key lookup failed");
                None
            }
        }
    }
}

/// Tries each source in order and returns the first key found.
#[derive(Clone, Default)]
pub struct ChainedApiKeys {
    sources: Vec<Arc<dyn ApiKeySource>>,
}

impl ChainedApiKeys {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, source: Arc<dyn ApiKeySource>) -> Self {
        self.sources.push(source);
        self
    }
}

#[async_trait]
impl ApiKeySource for ChainedApiKeys {
    async fn active_key(&self, user_id: &str) -> Option<String> {
        for source in &self.sources {
            if let Some(key) = source.active_key(user_id).await {
                return Some(key);
            }
        }
        None
    }
}
