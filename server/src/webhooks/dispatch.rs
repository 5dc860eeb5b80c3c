//! Webhook Event Dispatch
//!
//! Resolves the effective target for a session and delivers events to it.
//! Lifecycle events are forwarded from the session registry's broadcast
//! channel, one spawned delivery per event, so a slow receiver never holds up
//! a session transition.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::delivery::WebhookSender;
use super::signing;
use super::store::WebhookConfigStore;
use super::types::{DeliveryOutcome, WebhookError, WebhookTarget};
use crate::sessions::events::{SessionEvent, SessionEventKind};

#[derive(Clone)]
pub struct WebhookDispatcher {
    store: Arc<WebhookConfigStore>,
    sender: WebhookSender,
    /// Targets resolved before a session's deletion, consumed by its
    /// `session.deleted` event.
    final_targets: Arc<DashMap<String, WebhookTarget>>,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<WebhookConfigStore>, sender: WebhookSender) -> Self {
        Self {
            store,
            sender,
            final_targets: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<WebhookConfigStore> {
        &self.store
    }

    /// Deliver `payload` for `session_id` to its effective webhook.
    ///
    /// Never fails: an unconfigured session drops the event and an exhausted
    /// delivery is logged. Neither touches session state.
    #[tracing::instrument(skip(self, payload))]
    pub async fn deliver(&self, session_id: &str, payload: &Value) -> DeliveryOutcome {
        let target = match self.store.get_effective(session_id).await {
            Ok(target) => target,
            Err(e @ WebhookError::NoWebhookConfigured(_)) => {
                info!(error = %e, "Dropping event");
                return DeliveryOutcome::Skipped;
            }
            Err(e) => {
                warn!(error = %e, "Failed to resolve webhook, dropping event");
                return DeliveryOutcome::Skipped;
            }
        };
        self.send_to(&target, payload).await
    }

    /// Deliver a lifecycle event. A deleted session's event goes to the target
    /// pinned before its override was cleared.
    pub async fn deliver_event(&self, event: &SessionEvent) -> DeliveryOutcome {
        let payload = event.to_payload();
        if event.kind == SessionEventKind::Deleted {
            if let Some((_, target)) = self.final_targets.remove(&event.agent_id) {
                return self.send_to(&target, &payload).await;
            }
        }
        self.deliver(&event.agent_id, &payload).await
    }

    /// Resolve the target for `session_id`'s final event ahead of its deletion.
    ///
    /// Call before deleting the session; the pin is consumed when the
    /// forwarder delivers the `session.deleted` event.
    pub async fn pin_final_target(&self, session_id: &str) {
        match self.store.get_effective(session_id).await {
            Ok(target) => {
                self.final_targets.insert(session_id.to_string(), target);
            }
            Err(_) => {
                self.final_targets.remove(session_id);
            }
        }
    }

    /// Drop a pin for a deletion that did not happen.
    pub fn unpin_final_target(&self, session_id: &str) {
        self.final_targets.remove(session_id);
    }

    /// Deliver in the background.
    pub fn spawn_deliver(&self, session_id: String, payload: Value) -> JoinHandle<DeliveryOutcome> {
        let this = self.clone();
        tokio::spawn(async move { this.deliver(&session_id, &payload).await })
    }

    async fn send_to(&self, target: &WebhookTarget, payload: &Value) -> DeliveryOutcome {
        let body = signing::canonical_json(payload);
        let outcome = self.sender.send(target, body).await;
        if let DeliveryOutcome::Exhausted {
            attempts,
            last_error,
        } = &outcome
        {
            warn!(
                url = %target.url,
                attempts,
                last_error = %last_error,
                "Webhook delivery exhausted retries"
            );
        }
        outcome
    }
}

/// Forward session lifecycle events to their webhooks until `shutdown`.
pub fn spawn_event_forwarder(
    dispatcher: WebhookDispatcher,
    mut events: broadcast::Receiver<SessionEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Webhook event forwarder started");
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => {
                    debug!(agent_id = %event.agent_id, event = %event.kind, "Forwarding session event");
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move { dispatcher.deliver_event(&event).await });
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Webhook event forwarder lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Webhook event forwarder stopped");
    })
}
