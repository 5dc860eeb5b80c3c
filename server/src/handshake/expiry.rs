//! QR expiry sweeper.
//!
//! Moves `AwaitingScan` sessions whose token outlived the validity window to
//! `Expired`. A later successful refresh brings them back to `AwaitingScan`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::sessions::registry::SessionRegistry;

/// Start the expiry sweeper background task.
///
/// Runs every `every` until `shutdown` is cancelled. The first tick is
/// consumed immediately, so nothing expires during startup hydration.
pub fn spawn_expiry_sweeper(
    registry: Arc<SessionRegistry>,
    every: Duration,
    validity: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // consume immediate first tick
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            run_sweep(&registry, validity).await;
        }
        tracing::debug!("Expiry sweeper stopped");
    })
}

#[tracing::instrument(skip(registry))]
async fn run_sweep(registry: &SessionRegistry, validity: Duration) {
    let expired = registry.expire_stale(Utc::now(), validity).await;
    if !expired.is_empty() {
        tracing::info!(count = expired.len(), agents = ?expired, "Expired stale QR tokens");
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use gw_common::SessionState;

    use super::*;
    use crate::sessions::types::{NewSession, TransitionFields};

    #[tokio::test]
    async fn sweeper_expires_old_tokens_and_stops_on_shutdown() {
        let registry = Arc::new(SessionRegistry::new(None));
        registry
            .create(NewSession {
                user_id: "u1".into(),
                agent_id: "a1".into(),
                agent_name: "Bot".into(),
                ..NewSession::default()
            })
            .await
            .unwrap();
        registry
            .transition(
                "a1",
                SessionState::AwaitingScan,
                TransitionFields::issued(b"qr".to_vec(), Utc::now() - TimeDelta::seconds(90)),
            )
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let handle = spawn_expiry_sweeper(
            Arc::clone(&registry),
            Duration::from_millis(10),
            Duration::from_secs(60),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let session = registry.get("a1").await.unwrap();
        assert_eq!(session.state, SessionState::Expired);
        assert!(session.qr_token.is_none());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
