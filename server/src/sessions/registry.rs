//! Session Registry
//!
//! Owns every session record. Transitions on one agent are serialized by a
//! per-session mutex; different agents never contend. Writes go through to
//! `PostgreSQL` when a pool is configured, and every state change is broadcast
//! as a [`SessionEvent`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gw_common::SessionState;
use sqlx::PgPool;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::events::{SessionEvent, SessionEventKind};
use super::queries;
use super::types::{NewSession, Session, SessionError, TransitionFields};

const EVENT_CHANNEL_CAPACITY: usize = 256;

type SessionSlot = Mutex<SlotInner>;

struct SlotInner {
    session: Session,
    /// Set once the slot is unlinked from the map; later writers must not resurrect it.
    removed: bool,
}

fn new_slot(session: Session) -> Arc<SessionSlot> {
    Arc::new(Mutex::new(SlotInner {
        session,
        removed: false,
    }))
}

/// Registry of messaging-agent sessions keyed by `agent_id`.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionSlot>>,
    db: Option<PgPool>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    /// Create a registry, optionally backed by a database pool.
    pub fn new(db: Option<PgPool>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sessions: DashMap::new(),
            db,
            events,
        }
    }

    /// Load stored sessions into memory. Returns the number loaded.
    pub async fn hydrate(&self) -> Result<usize, SessionError> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let stored = queries::list_sessions(db).await?;
        let count = stored.len();
        for session in stored {
            self.sessions
                .insert(session.agent_id.clone(), new_slot(session));
        }
        info!(count, "Sessions loaded from database");
        Ok(count)
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Create a session in state `Created`.
    ///
    /// `agent_id` is the registry key, so it is unique across users.
    #[tracing::instrument(skip(self, new), fields(agent_id = %new.agent_id))]
    pub async fn create(&self, new: NewSession) -> Result<Session, SessionError> {
        let user_id = new.user_id.trim();
        let agent_id = new.agent_id.trim();
        let agent_name = new.agent_name.trim();
        if user_id.is_empty() || agent_id.is_empty() || agent_name.is_empty() {
            return Err(SessionError::Validation(
                "userId, agentId, agentName are required".to_string(),
            ));
        }

        let now = Utc::now();
        let session = Session {
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
            api_key: new.api_key,
            endpoint_override: new.endpoint_override,
            state: SessionState::Created,
            qr_token: None,
            qr_issued_at: None,
            created_at: now,
            updated_at: now,
        };

        let slot = new_slot(session.clone());
        match self.sessions.entry(session.agent_id.clone()) {
            Entry::Occupied(_) => {
                return Err(SessionError::DuplicateSession {
                    agent_id: session.agent_id,
                })
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&slot));
            }
        }

        if let Some(db) = &self.db {
            let mut inner = slot.lock().await;
            if let Err(e) = queries::upsert_session(db, &inner.session).await {
                inner.removed = true;
                drop(inner);
                self.sessions
                    .remove_if(&session.agent_id, |_, s| Arc::ptr_eq(s, &slot));
                return Err(e.into());
            }
        }

        info!(user_id = %session.user_id, "Session created");
        emit(&self.events, SessionEventKind::Created, &session);
        Ok(session)
    }

    /// Snapshot of one session.
    pub async fn get(&self, agent_id: &str) -> Result<Session, SessionError> {
        let slot = self.slot(agent_id)?;
        let inner = slot.lock().await;
        if inner.removed {
            return Err(SessionError::NotFound(agent_id.to_string()));
        }
        Ok(inner.session.clone())
    }

    /// Snapshot of every session, oldest first.
    pub async fn list(&self) -> Vec<Session> {
        let mut sessions = Vec::with_capacity(self.sessions.len());
        for slot in self.slots() {
            let inner = slot.lock().await;
            if !inner.removed {
                sessions.push(inner.session.clone());
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Atomically move a session to `to`, updating the associated fields.
    pub async fn transition(
        &self,
        agent_id: &str,
        to: SessionState,
        fields: TransitionFields,
    ) -> Result<Session, SessionError> {
        self.transition_guarded(agent_id, to, fields, || true).await
    }

    /// Like [`transition`](Self::transition), but `still_current` is checked while
    /// the session is locked; returning `false` aborts with [`SessionError::Cancelled`].
    ///
    /// Refresh loops pass their cancellation check here so a stopped loop can
    /// never apply a token it fetched before the stop.
    pub async fn transition_guarded<F>(
        &self,
        agent_id: &str,
        to: SessionState,
        fields: TransitionFields,
        still_current: F,
    ) -> Result<Session, SessionError>
    where
        F: FnOnce() -> bool,
    {
        let inner = self.slot(agent_id)?.lock_owned().await;
        if inner.removed {
            return Err(SessionError::NotFound(agent_id.to_string()));
        }
        if !still_current() {
            return Err(SessionError::Cancelled);
        }
        self.commit(inner, to, fields).await
    }

    /// Move every `AwaitingScan` session whose token is older than `validity` to `Expired`.
    /// Returns the expired agent ids.
    pub async fn expire_stale(&self, now: DateTime<Utc>, validity: Duration) -> Vec<String> {
        let validity = TimeDelta::from_std(validity).unwrap_or(TimeDelta::MAX);
        let mut expired = Vec::new();

        for slot in self.slots() {
            let inner = slot.lock_owned().await;
            if inner.removed || inner.session.state != SessionState::AwaitingScan {
                continue;
            }
            let deadline = inner
                .session
                .qr_issued_at
                .and_then(|issued| issued.checked_add_signed(validity));
            if !deadline.is_some_and(|deadline| deadline <= now) {
                continue;
            }

            let agent_id = inner.session.agent_id.clone();
            match self
                .commit(inner, SessionState::Expired, TransitionFields::default())
                .await
            {
                Ok(_) => expired.push(agent_id),
                Err(e) => warn!(agent_id = %agent_id, error = %e, "Failed to expire session"),
            }
        }

        expired
    }

    /// Delete a session. Returns the final snapshot.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, agent_id: &str) -> Result<Session, SessionError> {
        let Some((key, slot)) = self.sessions.remove(agent_id) else {
            return Err(SessionError::NotFound(agent_id.to_string()));
        };

        let mut inner = slot.lock().await;
        if let Some(db) = &self.db {
            if let Err(e) = queries::delete_session(db, agent_id).await {
                drop(inner);
                self.sessions.insert(key, slot);
                return Err(e.into());
            }
        }
        inner.removed = true;
        let session = inner.session.clone();
        drop(inner);

        info!("Session deleted");
        emit(&self.events, SessionEventKind::Deleted, &session);
        Ok(session)
    }

    fn slot(&self, agent_id: &str) -> Result<Arc<SessionSlot>, SessionError> {
        self.sessions
            .get(agent_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::NotFound(agent_id.to_string()))
    }

    fn slots(&self) -> Vec<Arc<SessionSlot>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Validate and apply a transition on a locked session.
    ///
    /// The write-through and the in-memory update run together on their own
    /// task while it holds the lock, so a caller dropped mid-write never
    /// leaves the stored row and memory apart.
    async fn commit(
        &self,
        mut inner: OwnedMutexGuard<SlotInner>,
        to: SessionState,
        fields: TransitionFields,
    ) -> Result<Session, SessionError> {
        let from = inner.session.state;
        if !from.can_transition_to(to) {
            return Err(SessionError::InvalidTransition { from, to });
        }

        let mut next = inner.session.clone();
        next.state = to;
        next.updated_at = Utc::now();
        if to == SessionState::AwaitingScan {
            let Some(token) = fields.qr_token else {
                return Err(SessionError::Validation(
                    "a QR token is required to await a scan".to_string(),
                ));
            };
            next.qr_token = Some(token);
            next.qr_issued_at = Some(fields.qr_issued_at.unwrap_or(next.updated_at));
        } else {
            next.qr_token = None;
        }

        let db = self.db.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Some(db) = &db {
                queries::upsert_session(db, &next).await?;
            }

            inner.session = next.clone();
            if from == to {
                debug!(agent_id = %next.agent_id, "QR token refreshed");
            } else {
                info!(agent_id = %next.agent_id, from = %from, to = %to, "Session transitioned");
                emit(&events, SessionEventKind::entering(to), &next);
            }
            Ok::<_, SessionError>(next)
        })
        .await
        .unwrap_or_else(|e| Err(SessionError::Aborted(e.to_string())))
    }
}

fn emit(events: &broadcast::Sender<SessionEvent>, kind: SessionEventKind, session: &Session) {
    let event = SessionEvent {
        kind,
        agent_id: session.agent_id.clone(),
        user_id: session.user_id.clone(),
        state: session.state,
        timestamp: session.updated_at,
    };
    if events.send(event).is_err() {
        debug!(agent_id = %session.agent_id, event = %kind, "No event subscribers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session(user_id: &str, agent_id: &str) -> NewSession {
        NewSession {
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            agent_name: "Bot".into(),
            ..NewSession::default()
        }
    }

    async fn awaiting(registry: &SessionRegistry, agent_id: &str, issued_at: DateTime<Utc>) {
        registry.create(new_session("u1", agent_id)).await.unwrap();
        registry
            .transition(
                agent_id,
                SessionState::AwaitingScan,
                TransitionFields::issued(b"qr".to_vec(), issued_at),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_then_get_returns_created() {
        let registry = SessionRegistry::new(None);
        registry.create(new_session("u1", "a1")).await.unwrap();

        let session = registry.get("a1").await.unwrap();
        assert_eq!(session.state, SessionState::Created);
        assert_eq!(session.user_id, "u1");
        assert!(session.qr_token.is_none());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let registry = SessionRegistry::new(None);
        registry.create(new_session("u1", "a1")).await.unwrap();

        let err = registry.create(new_session("u1", "a1")).await.unwrap_err();
        assert!(matches!(err, SessionError::DuplicateSession { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn blank_identity_is_a_validation_error() {
        let registry = SessionRegistry::new(None);
        for (user, agent, name) in [("", "a1", "Bot"), ("u1", " ", "Bot"), ("u1", "a1", "")] {
            let err = registry
                .create(NewSession {
                    user_id: user.into(),
                    agent_id: agent.into(),
                    agent_name: name.into(),
                    ..NewSession::default()
                })
                .await
                .unwrap_err();
            assert!(matches!(err, SessionError::Validation(_)));
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let registry = SessionRegistry::new(None);
        assert!(matches!(
            registry.get("missing").await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_transition_leaves_state_untouched() {
        let registry = SessionRegistry::new(None);
        registry.create(new_session("u1", "a1")).await.unwrap();

        let err = registry
            .transition("a1", SessionState::Authenticated, TransitionFields::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                from: SessionState::Created,
                to: SessionState::Authenticated
            }
        ));
        assert_eq!(registry.get("a1").await.unwrap().state, SessionState::Created);
    }

    #[tokio::test]
    async fn awaiting_scan_requires_a_token() {
        let registry = SessionRegistry::new(None);
        registry.create(new_session("u1", "a1")).await.unwrap();

        let err = registry
            .transition("a1", SessionState::AwaitingScan, TransitionFields::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
    }

    #[tokio::test]
    async fn leaving_awaiting_scan_clears_the_token() {
        let registry = SessionRegistry::new(None);
        awaiting(&registry, "a1", Utc::now()).await;
        assert!(registry.get("a1").await.unwrap().qr_token.is_some());

        let session = registry
            .transition("a1", SessionState::Authenticated, TransitionFields::default())
            .await
            .unwrap();
        assert_eq!(session.state, SessionState::Authenticated);
        assert!(session.qr_token.is_none());
    }

    #[tokio::test]
    async fn stale_tokens_expire_and_refresh_revives() {
        let registry = SessionRegistry::new(None);
        let validity = Duration::from_secs(60);
        awaiting(&registry, "old", Utc::now() - TimeDelta::seconds(120)).await;
        awaiting(&registry, "fresh", Utc::now()).await;

        let expired = registry.expire_stale(Utc::now(), validity).await;
        assert_eq!(expired, vec!["old".to_string()]);
        assert_eq!(registry.get("old").await.unwrap().state, SessionState::Expired);
        assert_eq!(
            registry.get("fresh").await.unwrap().state,
            SessionState::AwaitingScan
        );

        let revived = registry
            .transition(
                "old",
                SessionState::AwaitingScan,
                TransitionFields::issued(b"new".to_vec(), Utc::now()),
            )
            .await
            .unwrap();
        assert_eq!(revived.state, SessionState::AwaitingScan);
        assert_eq!(revived.qr_token.as_deref(), Some(&b"new"[..]));
    }

    #[tokio::test]
    async fn guarded_transition_is_cancelled_when_stale() {
        let registry = SessionRegistry::new(None);
        registry.create(new_session("u1", "a1")).await.unwrap();

        let err = registry
            .transition_guarded(
                "a1",
                SessionState::AwaitingScan,
                TransitionFields::issued(b"qr".to_vec(), Utc::now()),
                || false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
        assert_eq!(registry.get("a1").await.unwrap().state, SessionState::Created);
    }

    #[tokio::test]
    async fn remove_deletes_and_blocks_later_writes() {
        let registry = SessionRegistry::new(None);
        registry.create(new_session("u1", "a1")).await.unwrap();

        registry.remove("a1").await.unwrap();
        assert!(matches!(
            registry.get("a1").await,
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            registry.remove("a1").await,
            Err(SessionError::NotFound(_))
        ));
        // The id is free again
        registry.create(new_session("u2", "a1")).await.unwrap();
    }

    #[tokio::test]
    async fn state_changes_are_broadcast() {
        let registry = SessionRegistry::new(None);
        let mut events = registry.subscribe();
        awaiting(&registry, "a1", Utc::now()).await;

        // A refresh in place is not a state change
        registry
            .transition(
                "a1",
                SessionState::AwaitingScan,
                TransitionFields::issued(b"qr2".to_vec(), Utc::now()),
            )
            .await
            .unwrap();

        assert_eq!(events.recv().await.unwrap().kind, SessionEventKind::Created);
        assert_eq!(events.recv().await.unwrap().kind, SessionEventKind::QrIssued);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_admit_exactly_one() {
        let registry = Arc::new(SessionRegistry::new(None));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry
                        .create(new_session(&format!("u{i}"), "shared"))
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn list_is_oldest_first() {
        let registry = SessionRegistry::new(None);
        registry.create(new_session("u1", "a1")).await.unwrap();
        registry.create(new_session("u1", "a2")).await.unwrap();

        let ids: Vec<_> = registry
            .list()
            .await
            .into_iter()
            .map(|s| s.agent_id)
            .collect();
        assert_eq!(ids, vec!["a1".to_string(), "a2".to_string()]);
    }

    #[tokio::test]
    async fn dropped_caller_does_not_interrupt_a_transition() {
        let registry = SessionRegistry::new(None);
        let mut events = registry.subscribe();
        registry.create(new_session("u1", "a1")).await.unwrap();

        // Poll the transition once, then drop it before it resolves
        tokio::select! {
            biased;
            _ = registry.transition(
                "a1",
                SessionState::AwaitingScan,
                TransitionFields::issued(b"qr".to_vec(), Utc::now()),
            ) => {}
            () = std::future::ready(()) => {}
        }

        let session = registry.get("a1").await.unwrap();
        assert_eq!(session.state, SessionState::AwaitingScan);
        assert_eq!(session.qr_token.as_deref(), Some(&b"qr"[..]));
        assert_eq!(events.recv().await.unwrap().kind, SessionEventKind::Created);
        assert_eq!(events.recv().await.unwrap().kind, SessionEventKind::QrIssued);
    }
}
