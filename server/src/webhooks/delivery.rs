//! Webhook Delivery
//!
//! Sends one signed payload to one target with bounded exponential backoff.
//! Network errors and non-2xx responses are retried; exhaustion is reported
//! to the caller and never escalated.

use std::time::Duration;

use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, warn};
use uuid::Uuid;

use super::signing;
use super::types::{DeliveryOutcome, WebhookTarget};

/// Header carrying a per-delivery id, stable across retries.
pub const DELIVERY_ID_HEADER: &str = "X-Go-Wa-Delivery";

#[derive(Debug, Clone)]
pub struct WebhookSender {
    client: Client,
    max_attempts: u32,
    backoff: Duration,
}

impl WebhookSender {
    pub fn new(timeout: Duration, max_attempts: u32, backoff: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            max_attempts: max_attempts.max(1),
            backoff,
        })
    }

    /// Deliver `body` to `target`, signing it when the target has a secret.
    pub async fn send(&self, target: &WebhookTarget, body: Vec<u8>) -> DeliveryOutcome {
        let signature = target
            .secret
            .as_deref()
            .map(|secret| signing::signature_header(secret, &body));
        let delivery_id = Uuid::now_v7().to_string();
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            let mut request = self
                .client
                .post(&target.url)
                .header(CONTENT_TYPE, "application/json")
                .header(DELIVERY_ID_HEADER, &delivery_id)
                .body(body.clone());
            if let Some(signature) = &signature {
                request = request.header(signing::SIGNATURE_HEADER, signature);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    let status = response.status().as_u16();
                    debug!(url = %target.url, attempt, status, "Webhook delivered");
                    return DeliveryOutcome::Delivered {
                        attempts: attempt,
                        status,
                    };
                }
                Ok(response) => last_error = format!("HTTP {}", response.status().as_u16()),
                Err(e) => last_error = e.to_string(),
            }

            warn!(
                url = %target.url,
                attempt,
                max_attempts = self.max_attempts,
                error = %last_error,
                "Webhook delivery attempt failed"
            );
            if attempt < self.max_attempts {
                tokio::time::sleep(backoff_delay(self.backoff, attempt)).await;
            }
        }

        DeliveryOutcome::Exhausted {
            attempts: self.max_attempts,
            last_error,
        }
    }
}

/// `base * 2^(attempt-1)` plus up to half of `base` in jitter.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << (attempt - 1).min(16));
    let jitter_ms = u64::try_from(base.as_millis() / 2).unwrap_or(u64::MAX);
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ms)
    };
    exp.saturating_add(Duration::from_millis(jitter))
}
