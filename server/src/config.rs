//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:3000")
    pub bind_address: String,

    /// `PostgreSQL` connection URL. In-memory only when absent.
    pub database_url: Option<String>,

    /// Base URL of the inference backend, used to derive a session's default endpoint
    pub ai_backend_url: String,

    /// Base URL of the WhatsApp bridge transport
    pub transport_url: String,

    /// Timeout for a single transport request in seconds (default: 10)
    pub transport_timeout_secs: u64,

    /// QR refresh interval in seconds (default: 20)
    pub qr_refresh_interval_secs: u64,

    /// How long an issued QR token can be scanned, in seconds (default: 60)
    pub qr_validity_secs: u64,

    /// How often the expiry sweeper runs, in seconds (default: 5)
    pub qr_expiry_sweep_secs: u64,

    /// Bootstrap default webhook URL, applied when none is stored
    pub webhook_url: Option<String>,

    /// Bootstrap default webhook secret
    pub webhook_secret: Option<String>,

    /// Delivery attempts per webhook event (default: 3)
    pub webhook_max_attempts: u32,

    /// Base backoff between delivery attempts in milliseconds (default: 500)
    pub webhook_backoff_ms: u64,

    /// Timeout for a single webhook request in seconds (default: 10)
    pub webhook_timeout_secs: u64,

    /// Static active API keys, `user_id -> token`
    pub active_api_keys: HashMap<String, String>,

    /// Basic auth credentials (`user`, `password`) guarding the API (optional)
    pub admin_basic_auth: Option<(String, String)>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".into()),
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            ai_backend_url: env::var("AI_BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:8000".into()),
            transport_url: env::var("TRANSPORT_URL").context("TRANSPORT_URL must be set")?,
            transport_timeout_secs: parse_var("TRANSPORT_TIMEOUT_SECS", 10),
            qr_refresh_interval_secs: parse_var("QR_REFRESH_INTERVAL_SECS", 20),
            qr_validity_secs: parse_var("QR_VALIDITY_SECS", 60),
            qr_expiry_sweep_secs: parse_var("QR_EXPIRY_SWEEP_SECS", 5),
            webhook_url: env::var("WEBHOOK_URL").ok().filter(|v| !v.trim().is_empty()),
            webhook_secret: env::var("WEBHOOK_SECRET").ok().filter(|v| !v.trim().is_empty()),
            webhook_max_attempts: parse_var("WEBHOOK_MAX_ATTEMPTS", 3),
            webhook_backoff_ms: parse_var("WEBHOOK_BACKOFF_MS", 500),
            webhook_timeout_secs: parse_var("WEBHOOK_TIMEOUT_SECS", 10),
            active_api_keys: env::var("ACTIVE_API_KEYS")
                .map(|s| parse_api_keys(&s))
                .unwrap_or_default(),
            admin_basic_auth: env::var("ADMIN_BASIC_AUTH")
                .ok()
                .and_then(|s| parse_basic_auth(&s)),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would expose dead QR tokens or never deliver.
    pub fn validate(&self) -> Result<()> {
        if self.qr_refresh_interval_secs == 0 {
            bail!("QR_REFRESH_INTERVAL_SECS must be greater than zero");
        }
        if self.qr_refresh_interval_secs >= self.qr_validity_secs {
            bail!(
                "QR_REFRESH_INTERVAL_SECS ({}) must be less than QR_VALIDITY_SECS ({})",
                self.qr_refresh_interval_secs,
                self.qr_validity_secs
            );
        }
        if self.webhook_max_attempts == 0 {
            bail!("WEBHOOK_MAX_ATTEMPTS must be at least 1");
        }
        Ok(())
    }

    #[must_use]
    pub const fn qr_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.qr_refresh_interval_secs)
    }

    #[must_use]
    pub const fn qr_validity(&self) -> Duration {
        Duration::from_secs(self.qr_validity_secs)
    }

    /// Check if basic auth is configured.
    #[must_use]
    pub const fn has_basic_auth(&self) -> bool {
        self.admin_basic_auth.is_some()
    }

    /// Create a default configuration for testing.
    ///
    /// No database; the transport URL points at a closed port and is replaced
    /// by tests that need a live transport.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".into(),
            database_url: None,
            ai_backend_url: "http://ai.test".into(),
            transport_url: "http://127.0.0.1:9".into(),
            transport_timeout_secs: 2,
            qr_refresh_interval_secs: 20,
            qr_validity_secs: 60,
            qr_expiry_sweep_secs: 5,
            webhook_url: None,
            webhook_secret: None,
            webhook_max_attempts: 3,
            webhook_backoff_ms: 1,
            webhook_timeout_secs: 2,
            active_api_keys: HashMap::new(),
            admin_basic_auth: None,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse `user:token,user2:token2` into a map. Malformed pairs are skipped.
fn parse_api_keys(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (user, token) = pair.split_once(':')?;
            let (user, token) = (user.trim(), token.trim());
            (!user.is_empty() && !token.is_empty()).then(|| (user.to_string(), token.to_string()))
        })
        .collect()
}

fn parse_basic_auth(raw: &str) -> Option<(String, String)> {
    let (user, pass) = raw.split_once(':')?;
    if user.is_empty() {
        return None;
    }
    Some((user.to_string(), pass.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_valid() {
        assert!(Config::default_for_test().validate().is_ok());
    }

    #[test]
    fn refresh_must_be_shorter_than_validity() {
        let mut config = Config::default_for_test();
        config.qr_refresh_interval_secs = 60;
        config.qr_validity_secs = 60;
        assert!(config.validate().is_err());

        config.qr_refresh_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_api_key_pairs() {
        let keys = parse_api_keys("u1:tok1, u2 : tok2,broken,:x,u3:");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys.get("u1").map(String::as_str), Some("tok1"));
        assert_eq!(keys.get("u2").map(String::as_str), Some("tok2"));
    }

    #[test]
    fn parses_basic_auth() {
        assert_eq!(
            parse_basic_auth("admin:p:w"),
            Some(("admin".to_string(), "p:w".to_string()))
        );
        assert_eq!(parse_basic_auth(":nope"), None);
        assert_eq!(parse_basic_auth("nocolon"), None);
    }
}
