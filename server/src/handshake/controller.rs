//! QR Handshake Controller
//!
//! Provisions sessions, obtains QR tokens from the transport and keeps them
//! fresh until the session is authenticated or abandoned.
//!
//! Refresh loops are keyed by agent id. Each start gets a new generation and
//! its own cancellation token, so a loop that was stopped or replaced can
//! never apply a token it fetched before the stop: the token is checked while
//! the registry holds the session lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use dashmap::DashMap;
use gw_common::{CreateSessionRequest, SessionState};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::api_keys::ApiKeySource;
use super::transport::{QrTransport, ScanStatus, TransportError};
use crate::sessions::registry::SessionRegistry;
use crate::sessions::types::{NewSession, Session, SessionError, TransitionFields};
use crate::util::{api_error, non_blank, validate_http_url};

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("No QR token available for agent {agent_id}: {reason}")]
    TokenUnavailable { agent_id: String, reason: String },
    #[error("Transport failure: {0}")]
    Transport(String),
}

impl HandshakeError {
    fn unavailable(agent_id: &str, reason: impl Into<String>) -> Self {
        Self::TokenUnavailable {
            agent_id: agent_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        match self {
            Self::Session(e) => e.into_response(),
            Self::TokenUnavailable { .. } => {
                api_error(StatusCode::CONFLICT, "QR_UNAVAILABLE", self.to_string())
            }
            Self::Transport(_) => {
                api_error(StatusCode::BAD_GATEWAY, "TRANSPORT_FAILED", self.to_string())
            }
        }
    }
}

/// Why a refresh loop ended.
#[derive(Debug)]
pub enum LoopExit {
    /// Stopped by its owner, replaced, or its session was deleted.
    Stopped,
    Authenticated,
    Failed(HandshakeError),
}

struct LoopEntry {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct HandshakeController {
    registry: Arc<SessionRegistry>,
    transport: Arc<dyn QrTransport>,
    loops: Arc<DashMap<String, LoopEntry>>,
    /// Last refresh-loop failure per agent, cleared by the next successful token.
    failures: Arc<DashMap<String, String>>,
    generations: Arc<AtomicU64>,
    refresh_interval: Duration,
}

impl HandshakeController {
    pub fn new(
        registry: Arc<SessionRegistry>,
        transport: Arc<dyn QrTransport>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            loops: Arc::new(DashMap::new()),
            failures: Arc::new(DashMap::new()),
            generations: Arc::new(AtomicU64::new(0)),
            refresh_interval,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub const fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Create a session and try to obtain its first QR token.
    ///
    /// A token issued synchronously moves the session to `AwaitingScan` and
    /// starts the refresh loop. No token leaves it `Created`; a fatal transport
    /// error leaves it `Failed`.
    #[tracing::instrument(skip(self, request, api_keys), fields(agent_id = %request.agent_id))]
    pub async fn provision(
        &self,
        request: CreateSessionRequest,
        api_keys: &dyn ApiKeySource,
    ) -> Result<Session, HandshakeError> {
        let endpoint_override = non_blank(request.endpoint_url_run.as_deref());
        if let Some(endpoint) = &endpoint_override {
            validate_http_url(endpoint)
                .map_err(|msg| SessionError::Validation(format!("endpointUrlRun: {msg}")))?;
        }

        let api_key = match non_blank(request.api_key.as_deref()) {
            Some(key) => Some(key),
            None => api_keys.active_key(request.user_id.trim()).await,
        };
        if api_key.is_none() {
            debug!("No API key provided or active for user");
        }

        let session = self
            .registry
            .create(NewSession {
                user_id: request.user_id,
                agent_id: request.agent_id,
                agent_name: request.agent_name,
                api_key,
                endpoint_override,
            })
            .await?;
        let agent_id = session.agent_id.clone();

        match self.issue_token(&agent_id, || true).await {
            Ok(session) => {
                self.start_refresh_loop(&agent_id, self.refresh_interval)?;
                Ok(session)
            }
            Err(HandshakeError::TokenUnavailable { reason, .. }) => {
                info!(reason = %reason, "Session created without an initial QR token");
                Ok(self.registry.get(&agent_id).await?)
            }
            Err(HandshakeError::Transport(reason)) => {
                self.failures.insert(agent_id.clone(), reason);
                Ok(self.registry.get(&agent_id).await?)
            }
            Err(e) => Err(e),
        }
    }

    /// Obtain a fresh QR token. On success the session is `AwaitingScan`.
    ///
    /// Authenticated and failed sessions are rejected before the transport is
    /// contacted and are left untouched.
    pub async fn request_token(&self, agent_id: &str) -> Result<Session, HandshakeError> {
        self.issue_token(agent_id, || true).await
    }

    async fn issue_token<F>(&self, agent_id: &str, still_current: F) -> Result<Session, HandshakeError>
    where
        F: Fn() -> bool,
    {
        let session = self.registry.get(agent_id).await?;
        match session.state {
            SessionState::Authenticated => {
                return Err(HandshakeError::unavailable(agent_id, "session is already authenticated"))
            }
            SessionState::Failed => {
                return Err(HandshakeError::unavailable(agent_id, "session has failed"))
            }
            _ => {}
        }

        match self.transport.request_token(agent_id).await {
            Ok(Some(token)) => {
                let session = self
                    .registry
                    .transition_guarded(
                        agent_id,
                        SessionState::AwaitingScan,
                        TransitionFields::issued(token, Utc::now()),
                        &still_current,
                    )
                    .await?;
                self.failures.remove(agent_id);
                Ok(session)
            }
            Ok(None) => Err(HandshakeError::unavailable(agent_id, "transport has no token to issue")),
            Err(TransportError::Unavailable(reason)) => {
                Err(HandshakeError::unavailable(agent_id, reason))
            }
            Err(TransportError::Fatal(reason)) => {
                warn!(agent_id, reason = %reason, "Transport rejected device, failing session");
                self.registry
                    .transition_guarded(
                        agent_id,
                        SessionState::Failed,
                        TransitionFields::default(),
                        &still_current,
                    )
                    .await?;
                Err(HandshakeError::Transport(reason))
            }
        }
    }

    /// Start (or restart) the refresh loop for `agent_id`.
    ///
    /// Any loop already running for the agent is cancelled first. The handle
    /// resolves once the loop ends; dropping it detaches the loop.
    pub fn start_refresh_loop(
        &self,
        agent_id: &str,
        interval: Duration,
    ) -> Result<JoinHandle<LoopExit>, HandshakeError> {
        if interval.is_zero() {
            return Err(SessionError::Validation("refresh interval must be positive".into()).into());
        }

        let generation = self.generations.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = CancellationToken::new();
        let previous = self.loops.insert(
            agent_id.to_string(),
            LoopEntry {
                generation,
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
            debug!(agent_id, previous = previous.generation, "Replaced refresh loop");
        }
        self.failures.remove(agent_id);
        info!(agent_id, generation, interval_secs = interval.as_secs(), "Refresh loop started");

        let this = self.clone();
        let agent_id = agent_id.to_string();
        Ok(tokio::spawn(async move {
            let exit = this.run_loop(&agent_id, interval, &cancel).await;
            this.loops
                .remove_if(&agent_id, |_, entry| entry.generation == generation);
            match &exit {
                LoopExit::Stopped => debug!(agent_id = %agent_id, generation, "Refresh loop stopped"),
                LoopExit::Authenticated => {
                    info!(agent_id = %agent_id, generation, "Refresh loop finished: session authenticated");
                }
                LoopExit::Failed(e) => {
                    warn!(agent_id = %agent_id, generation, error = %e, "Refresh loop failed");
                    this.failures.insert(agent_id.clone(), e.to_string());
                }
            }
            exit
        }))
    }

    /// Stop the refresh loop for `agent_id`. Returns whether one was running.
    pub fn stop_refresh_loop(&self, agent_id: &str) -> bool {
        match self.loops.remove(agent_id) {
            Some((_, entry)) => {
                entry.cancel.cancel();
                info!(agent_id, generation = entry.generation, "Refresh loop stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_refreshing(&self, agent_id: &str) -> bool {
        self.loops.contains_key(agent_id)
    }

    pub fn active_loops(&self) -> usize {
        self.loops.len()
    }

    pub fn last_error(&self, agent_id: &str) -> Option<String> {
        self.failures.get(agent_id).map(|e| e.value().clone())
    }

    /// Record a scan completion pushed by the transport.
    pub async fn confirm_scan(&self, agent_id: &str) -> Result<Session, HandshakeError> {
        let session = self
            .registry
            .transition(agent_id, SessionState::Authenticated, TransitionFields::default())
            .await?;
        self.stop_refresh_loop(agent_id);
        Ok(session)
    }

    /// Stop refreshing and delete the session.
    pub async fn delete(&self, agent_id: &str) -> Result<Session, HandshakeError> {
        self.stop_refresh_loop(agent_id);
        let session = self.registry.remove(agent_id).await?;
        self.failures.remove(agent_id);
        Ok(session)
    }

    /// Delete and re-provision a session with its stored identity, key and endpoint.
    #[tracing::instrument(skip(self, api_keys))]
    pub async fn reconnect(
        &self,
        agent_id: &str,
        api_keys: &dyn ApiKeySource,
    ) -> Result<Session, HandshakeError> {
        let previous = self.delete(agent_id).await?;
        self.provision(
            CreateSessionRequest {
                user_id: previous.user_id,
                agent_id: previous.agent_id,
                agent_name: previous.agent_name,
                api_key: previous.api_key,
                endpoint_url_run: previous.endpoint_override,
            },
            api_keys,
        )
        .await
    }

    async fn run_loop(&self, agent_id: &str, interval: Duration, cancel: &CancellationToken) -> LoopExit {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return LoopExit::Stopped,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                () = cancel.cancelled() => return LoopExit::Stopped,
                outcome = self.refresh_once(agent_id, cancel) => outcome,
            };
            if let Some(exit) = outcome {
                return exit;
            }
        }
    }

    /// One tick: finish on a completed scan, otherwise replace the token.
    async fn refresh_once(&self, agent_id: &str, cancel: &CancellationToken) -> Option<LoopExit> {
        let still_current = || !cancel.is_cancelled();

        let session = match self.registry.get(agent_id).await {
            Ok(session) => session,
            Err(SessionError::NotFound(_)) => return Some(LoopExit::Stopped),
            Err(e) => return Some(LoopExit::Failed(e.into())),
        };
        match session.state {
            SessionState::Authenticated => return Some(LoopExit::Authenticated),
            SessionState::Failed => return Some(LoopExit::Stopped),
            _ => {}
        }

        match self.transport.scan_status(agent_id).await {
            Ok(ScanStatus::Authenticated) => {
                return Some(
                    match self
                        .registry
                        .transition_guarded(
                            agent_id,
                            SessionState::Authenticated,
                            TransitionFields::default(),
                            still_current,
                        )
                        .await
                    {
                        Ok(_) => LoopExit::Authenticated,
                        Err(e) => settled_exit(e.into()),
                    },
                );
            }
            Ok(ScanStatus::Pending) => {}
            Err(e) => debug!(agent_id, error = %e, "Scan status check failed"),
        }

        match self.issue_token(agent_id, still_current).await {
            Ok(_) => {
                debug!(agent_id, "QR token refreshed");
                None
            }
            Err(e) => Some(settled_exit(e)),
        }
    }
}

/// Exit for a tick whose write lost a race: the loop was stopped, the session
/// was deleted, or another writer already moved it to a terminal state.
/// Anything else is a failure.
fn settled_exit(error: HandshakeError) -> LoopExit {
    match error {
        HandshakeError::Session(SessionError::Cancelled | SessionError::NotFound(_)) => {
            LoopExit::Stopped
        }
        HandshakeError::Session(SessionError::InvalidTransition {
            from: SessionState::Authenticated,
            ..
        }) => LoopExit::Authenticated,
        HandshakeError::Session(SessionError::InvalidTransition {
            from: SessionState::Failed,
            ..
        }) => LoopExit::Stopped,
        e => LoopExit::Failed(e),
    }
}
