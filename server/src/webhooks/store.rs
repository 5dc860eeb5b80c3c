//! Webhook Configuration Store
//!
//! One default target process-wide plus at most one override per session.
//! A single lock orders writes against resolution, and a write holds it until
//! the change is persisted.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::info;

use super::queries;
use super::types::{WebhookError, WebhookScope, WebhookTarget};
use crate::util::{non_blank, validate_http_url};

#[derive(Default)]
struct StoreState {
    default: Option<WebhookTarget>,
    overrides: HashMap<String, WebhookTarget>,
}

pub struct WebhookConfigStore {
    state: RwLock<StoreState>,
    db: Option<PgPool>,
}

impl WebhookConfigStore {
    /// Create an empty store, optionally backed by a database pool.
    pub fn new(db: Option<PgPool>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            db,
        }
    }

    /// Create a store and load saved targets from the database.
    pub async fn load(db: Option<PgPool>) -> Result<Self, WebhookError> {
        let store = Self::new(db);
        if let Some(pool) = &store.db {
            let default = queries::get_default(pool).await?;
            let overrides = queries::list_overrides(pool).await?;
            let mut state = store.state.write().await;
            state.default = default;
            for target in overrides {
                if let WebhookScope::SessionOverride(agent_id) = &target.scope {
                    state.overrides.insert(agent_id.clone(), target.clone());
                }
            }
            info!(
                has_default = state.default.is_some(),
                overrides = state.overrides.len(),
                "Webhook configuration loaded"
            );
        }
        Ok(store)
    }

    /// Apply the configured default only when none is stored yet.
    pub async fn bootstrap_default(
        &self,
        url: &str,
        secret: Option<&str>,
    ) -> Result<bool, WebhookError> {
        if self.state.read().await.default.is_some() {
            return Ok(false);
        }
        self.set_default(url, secret).await?;
        info!(url, "Default webhook bootstrapped from environment");
        Ok(true)
    }

    pub async fn get_default(&self) -> Option<WebhookTarget> {
        self.state.read().await.default.clone()
    }

    /// Replace the default target. The url must be an absolute http(s) URL.
    pub async fn set_default(
        &self,
        url: &str,
        secret: Option<&str>,
    ) -> Result<WebhookTarget, WebhookError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(WebhookError::Validation("url is required".to_string()));
        }
        validate_http_url(url).map_err(WebhookError::Validation)?;

        let target = WebhookTarget {
            scope: WebhookScope::Default,
            url: url.to_string(),
            secret: non_blank(secret),
            updated_at: Utc::now(),
        };

        let mut state = self.state.write().await;
        if let Some(pool) = &self.db {
            queries::upsert_default(pool, &target).await?;
        }
        state.default = Some(target.clone());
        info!(url = %target.url, signed = target.secret.is_some(), "Default webhook updated");
        Ok(target)
    }

    pub async fn get_override(&self, agent_id: &str) -> Option<WebhookTarget> {
        self.state.read().await.overrides.get(agent_id).cloned()
    }

    /// Set a session override. An empty url is stored and defers to the default.
    pub async fn set_override(
        &self,
        agent_id: &str,
        url: &str,
        secret: Option<&str>,
    ) -> Result<WebhookTarget, WebhookError> {
        let url = url.trim();
        if !url.is_empty() {
            validate_http_url(url).map_err(WebhookError::Validation)?;
        }

        let target = WebhookTarget {
            scope: WebhookScope::SessionOverride(agent_id.to_string()),
            url: url.to_string(),
            secret: non_blank(secret),
            updated_at: Utc::now(),
        };

        let mut state = self.state.write().await;
        if let Some(pool) = &self.db {
            queries::upsert_override(pool, agent_id, &target).await?;
        }
        state.overrides.insert(agent_id.to_string(), target.clone());
        info!(agent_id, url = %target.url, "Webhook override updated");
        Ok(target)
    }

    /// Remove a session override. Returns whether one existed.
    pub async fn clear_override(&self, agent_id: &str) -> Result<bool, WebhookError> {
        let mut state = self.state.write().await;
        if let Some(pool) = &self.db {
            queries::delete_override(pool, agent_id).await?;
        }
        Ok(state.overrides.remove(agent_id).is_some())
    }

    /// Resolve the target for a session: a usable override, else the default.
    pub async fn get_effective(&self, agent_id: &str) -> Result<WebhookTarget, WebhookError> {
        let state = self.state.read().await;
        state
            .overrides
            .get(agent_id)
            .filter(|target| target.is_usable())
            .or(state.default.as_ref())
            .filter(|target| target.is_usable())
            .cloned()
            .ok_or_else(|| WebhookError::NoWebhookConfigured(agent_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nothing_configured() {
        let store = WebhookConfigStore::new(None);
        assert!(store.get_default().await.is_none());
        assert!(matches!(
            store.get_effective("agentA").await,
            Err(WebhookError::NoWebhookConfigured(_))
        ));
    }

    #[tokio::test]
    async fn default_applies_to_every_session() {
        let store = WebhookConfigStore::new(None);
        store
            .set_default("https://hook.example/x", Some("s3cr3t"))
            .await
            .unwrap();

        let target = store.get_effective("agentA").await.unwrap();
        assert_eq!(target.url, "https://hook.example/x");
        assert_eq!(target.secret.as_deref(), Some("s3cr3t"));
        assert_eq!(target.scope, WebhookScope::Default);
    }

    #[tokio::test]
    async fn default_requires_absolute_url() {
        let store = WebhookConfigStore::new(None);
        for url in ["", "   ", "hook.example/x", "/relative"] {
            assert!(matches!(
                store.set_default(url, None).await,
                Err(WebhookError::Validation(_))
            ));
        }
        assert!(store.get_default().await.is_none());
    }

    #[tokio::test]
    async fn blank_secret_means_unsigned() {
        let store = WebhookConfigStore::new(None);
        let target = store
            .set_default("https://hook.example/x", Some("  "))
            .await
            .unwrap();
        assert!(target.secret.is_none());
    }

    #[tokio::test]
    async fn override_wins_over_default() {
        let store = WebhookConfigStore::new(None);
        store.set_default("https://hook.example/x", Some("d")).await.unwrap();
        store
            .set_override("a1", "https://other.example/y", Some("o"))
            .await
            .unwrap();

        let target = store.get_effective("a1").await.unwrap();
        assert_eq!(target.url, "https://other.example/y");
        assert_eq!(target.secret.as_deref(), Some("o"));
        assert_eq!(store.get_effective("a2").await.unwrap().url, "https://hook.example/x");
    }

    #[tokio::test]
    async fn empty_override_falls_through_to_default() {
        let store = WebhookConfigStore::new(None);
        store.set_default("https://hook.example/x", Some("d")).await.unwrap();
        store.set_override("a1", "", Some("ignored")).await.unwrap();

        let target = store.get_effective("a1").await.unwrap();
        assert_eq!(target.url, "https://hook.example/x");
        assert_eq!(target.secret.as_deref(), Some("d"));
        assert!(store.get_override("a1").await.is_some());
    }

    #[tokio::test]
    async fn empty_override_without_default_is_unconfigured() {
        let store = WebhookConfigStore::new(None);
        store.set_override("a1", "", None).await.unwrap();
        assert!(matches!(
            store.get_effective("a1").await,
            Err(WebhookError::NoWebhookConfigured(_))
        ));
    }

    #[tokio::test]
    async fn clear_override_restores_default() {
        let store = WebhookConfigStore::new(None);
        store.set_default("https://hook.example/x", None).await.unwrap();
        store
            .set_override("a1", "https://other.example/y", None)
            .await
            .unwrap();

        assert!(store.clear_override("a1").await.unwrap());
        assert!(!store.clear_override("a1").await.unwrap());
        assert_eq!(store.get_effective("a1").await.unwrap().url, "https://hook.example/x");
    }

    #[tokio::test]
    async fn bootstrap_does_not_replace_saved_default() {
        let store = WebhookConfigStore::new(None);
        assert!(store.bootstrap_default("https://env.example/a", None).await.unwrap());
        store.set_default("https://saved.example/b", None).await.unwrap();
        assert!(!store.bootstrap_default("https://env.example/a", None).await.unwrap());
        assert_eq!(store.get_default().await.unwrap().url, "https://saved.example/b");
    }
}
