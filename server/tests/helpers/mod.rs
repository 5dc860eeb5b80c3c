//! Reusable test helpers for HTTP integration tests.
//!
//! Provides `TestApp` for building and sending requests through the full axum
//! router, with a scripted in-process QR transport in place of the bridge.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{self, header, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use gw_server::api::{create_router, AppState};
use gw_server::config::Config;
use gw_server::handshake::{
    ApiKeySource, HandshakeController, QrTransport, ScanStatus, StaticApiKeys, TransportError,
};
use gw_server::sessions::SessionRegistry;
use gw_server::webhooks::{
    spawn_event_forwarder, WebhookConfigStore, WebhookDispatcher, WebhookSender,
};

// ============================================================================
// Fake transport
// ============================================================================

/// QR transport that issues `qr-1`, `qr-2`, ... unless scripted otherwise.
#[derive(Default)]
pub struct FakeTransport {
    calls: AtomicUsize,
    scripted: Mutex<Option<Result<Option<Vec<u8>>, TransportError>>>,
    scanned: Mutex<bool>,
}

impl FakeTransport {
    /// Make every following `request_token` return `result`.
    pub fn respond_with(&self, result: Result<Option<Vec<u8>>, TransportError>) {
        *self.scripted.lock().unwrap() = Some(result);
    }

    /// Go back to issuing numbered tokens.
    pub fn issue_tokens(&self) {
        *self.scripted.lock().unwrap() = None;
    }

    pub fn set_scanned(&self, scanned: bool) {
        *self.scanned.lock().unwrap() = scanned;
    }

    /// Number of `request_token` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QrTransport for FakeTransport {
    async fn request_token(&self, _agent_id: &str) -> Result<Option<Vec<u8>>, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.scripted
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(Some(format!("qr-{n}").into_bytes())))
    }

    async fn scan_status(&self, _agent_id: &str) -> Result<ScanStatus, TransportError> {
        Ok(if *self.scanned.lock().unwrap() {
            ScanStatus::Authenticated
        } else {
            ScanStatus::Pending
        })
    }
}

// ============================================================================
// TestApp
// ============================================================================

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub config: Config,
    pub transport: Arc<FakeTransport>,
}

impl TestApp {
    /// Create a new test app with in-memory state.
    pub async fn new() -> Self {
        Self::with_config(Config::default_for_test())
    }

    /// Create a test app from a custom configuration.
    pub fn with_config(config: Config) -> Self {
        let transport = Arc::new(FakeTransport::default());
        let registry = Arc::new(SessionRegistry::new(None));
        let controller = HandshakeController::new(
            registry,
            Arc::clone(&transport) as Arc<dyn QrTransport>,
            config.qr_refresh_interval(),
        );
        let sender = WebhookSender::new(
            Duration::from_secs(config.webhook_timeout_secs),
            config.webhook_max_attempts,
            Duration::from_millis(config.webhook_backoff_ms),
        )
        .expect("Failed to build webhook sender");
        let dispatcher = WebhookDispatcher::new(Arc::new(WebhookConfigStore::new(None)), sender);
        let api_keys: Arc<dyn ApiKeySource> =
            Arc::new(StaticApiKeys::new(config.active_api_keys.clone()));

        let state = AppState::new(config.clone(), controller, dispatcher, api_keys);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            config,
            transport,
        }
    }

    /// Forward lifecycle events to webhooks. Cancel the token to stop.
    pub fn spawn_forwarder(&self) -> CancellationToken {
        let shutdown = CancellationToken::new();
        spawn_event_forwarder(
            self.state.webhooks.clone(),
            self.state.sessions.subscribe(),
            shutdown.clone(),
        );
        shutdown
    }

    /// Build a request with the given method and URI.
    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.oneshot(Self::request(Method::GET, uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.oneshot(
            Self::request(Method::DELETE, uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post(&self, uri: &str) -> Response<Body> {
        self.oneshot(Self::request(Method::POST, uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, body: &serde_json::Value) -> Response<Body> {
        self.oneshot(
            Self::request(Method::POST, uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(body).unwrap()))
                .unwrap(),
        )
        .await
    }

    /// Provision `agent_id` for user `u1` and return the response body.
    pub async fn create_session(&self, agent_id: &str) -> serde_json::Value {
        let resp = self
            .post_json(
                "/sessions",
                &serde_json::json!({
                    "userId": "u1",
                    "agentId": agent_id,
                    "agentName": "Bot",
                }),
            )
            .await;
        assert_eq!(resp.status(), 201, "session creation failed");
        body_to_json(resp).await
    }
}

// ============================================================================
// Response helpers
// ============================================================================

/// Parse a response body as JSON.
pub async fn body_to_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect response body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        let preview = String::from_utf8_lossy(&bytes);
        panic!("Failed to parse response as JSON: {e}\nBody: {preview}")
    })
}

/// Poll `check` every 10ms for up to two seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
