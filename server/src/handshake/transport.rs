//! QR Transport
//!
//! The WhatsApp bridge that issues QR tokens and reports scan completion.
//! Injected into the controller so tests can substitute a fake.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Whether the device bound to an agent has completed the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Pending,
    Authenticated,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Transient: the bridge is down, slow, or has nothing to hand out right now.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
    /// The bridge rejected the device; retrying will not help.
    #[error("Transport rejected the device: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait QrTransport: Send + Sync {
    /// Ask for a fresh QR token. `Ok(None)` means no token can be issued right now.
    async fn request_token(&self, agent_id: &str) -> Result<Option<Vec<u8>>, TransportError>;

    async fn scan_status(&self, agent_id: &str) -> Result<ScanStatus, TransportError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    logged_in: bool,
}

/// [`QrTransport`] backed by the bridge's HTTP device API.
#[derive(Debug, Clone)]
pub struct HttpBridgeTransport {
    client: Client,
    base_url: Url,
}

impl HttpBridgeTransport {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).context("TRANSPORT_URL is not a valid URL")?;
        if base_url.cannot_be_a_base() {
            bail!("TRANSPORT_URL must be an absolute http(s) URL");
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build transport HTTP client")?;
        Ok(Self { client, base_url })
    }

    /// `{base}/devices/{agent_id}/{leaf}` with the agent id percent-encoded.
    fn device_url(&self, agent_id: &str, leaf: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["devices", agent_id, leaf]);
        }
        url
    }
}

/// Map a non-success bridge status: client errors are fatal, server errors transient.
fn classify(status: reqwest::StatusCode) -> TransportError {
    if status.is_client_error() {
        TransportError::Fatal(format!("bridge returned HTTP {status}"))
    } else {
        TransportError::Unavailable(format!("bridge returned HTTP {status}"))
    }
}

#[async_trait]
impl QrTransport for HttpBridgeTransport {
    async fn request_token(&self, agent_id: &str) -> Result<Option<Vec<u8>>, TransportError> {
        let url = self.device_url(agent_id, "qr");
        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let status = response.status();
        match status.as_u16() {
            // No content, already paired, or device still booting
            204 | 409 | 425 => {
                debug!(agent_id, status = status.as_u16(), "No QR token available");
                Ok(None)
            }
            _ if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| TransportError::Unavailable(e.to_string()))?;
                Ok((!bytes.is_empty()).then(|| bytes.to_vec()))
            }
            _ => Err(classify(status)),
        }
    }

    async fn scan_status(&self, agent_id: &str) -> Result<ScanStatus, TransportError> {
        let url = self.device_url(agent_id, "status");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify(status));
        }

        let body: StatusBody = response
            .json()
            .await
            .map_err(|e| TransportError::Unavailable(format!("malformed status body: {e}")))?;
        Ok(if body.logged_in {
            ScanStatus::Authenticated
        } else {
            ScanStatus::Pending
        })
    }
}
