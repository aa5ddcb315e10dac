//! Auth session tracking
//!
//! Follows identity-provider sign-in/sign-out events, keeps the auth snapshot
//! current, emits login/logout telemetry once per transition, and signals a
//! full reset when the signed-in identity changes.
//!
//! ```text
//! identity provider ──AuthEvent──▶ AuthSessionTracker::observe
//!                                     ├─ SnapshotStore (5 min TTL)
//!                                     ├─ ActivityTracker (login/logout, deduplicated)
//!                                     ├─ QueryCache::clear on reset
//!                                     └─ broadcast<AuthTransition>
//! ```

pub mod credentials;
pub mod snapshot;

pub use snapshot::{AuthSnapshot, FileSnapshotStore, MemorySnapshotStore, SnapshotStore};

use crate::{
    activity::ActivityTracker,
    constants::AUTH_SNAPSHOT_TTL_SECS,
    query::QueryCache,
    types::{ActivityKind, AuthUser, Session},
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// Raw event from the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(AuthUser),
    SignedOut,
}

/// What an observed auth event meant for the app
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthTransition {
    /// Same state as before (e.g. the provider restored the cached user)
    Unchanged,
    /// Signed-out to signed-in
    SignedIn { user: AuthUser },
    /// One identity replaced by another
    Switched { previous_uid: String, user: AuthUser },
    /// Signed-in to signed-out
    SignedOut { previous_uid: String },
}

impl AuthTransition {
    /// A new identity is active; all in-memory state must be rebuilt
    pub fn requires_reload(&self) -> bool {
        matches!(
            self,
            AuthTransition::SignedIn { .. } | AuthTransition::Switched { .. }
        )
    }
}

/// Last known auth state; `None` until the first event or snapshot read
type KnownState = Option<Option<AuthUser>>;

pub struct AuthSessionTracker {
    store: Arc<dyn SnapshotStore>,
    activity: Arc<ActivityTracker>,
    cache: QueryCache,
    ttl: Duration,
    current: Mutex<KnownState>,
    session: Mutex<Option<Session>>,
    transitions: broadcast::Sender<AuthTransition>,
}

impl AuthSessionTracker {
    pub fn new(store: Arc<dyn SnapshotStore>, activity: Arc<ActivityTracker>, cache: QueryCache) -> Self {
        let (transitions, _) = broadcast::channel(16);
        Self {
            store,
            activity,
            cache,
            ttl: Duration::from_secs(AUTH_SNAPSHOT_TTL_SECS),
            current: Mutex::new(None),
            session: Mutex::new(None),
            transitions,
        }
    }

    /// Overrides the snapshot TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Receives every transition other than `Unchanged`
    pub fn subscribe(&self) -> broadcast::Receiver<AuthTransition> {
        self.transitions.subscribe()
    }

    /// Signed-in user from the snapshot, if fresh
    ///
    /// Missing, unreadable, or expired snapshots all read as "no cached user".
    pub async fn cached_user(&self) -> Option<AuthUser> {
        let snapshot = match self.store.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable auth snapshot");
                return None;
            }
        };

        if snapshot.is_expired(self.ttl) {
            tracing::debug!(cached_at = %snapshot.cached_at, "Auth snapshot expired");
            return None;
        }
        snapshot.user
    }

    /// Current user as last observed, falling back to the snapshot
    pub async fn current_user(&self) -> Option<AuthUser> {
        let known = self.current.lock().await.clone();
        match known {
            Some(user) => user,
            None => self.cached_user().await,
        }
    }

    /// Applies an identity-provider event
    pub async fn observe(&self, event: AuthEvent) -> AuthTransition {
        let mut current = self.current.lock().await;
        let previous = match current.take() {
            Some(known) => known,
            None => self.cached_user().await,
        };
        let next = match &event {
            AuthEvent::SignedIn(user) => Some(user.clone()),
            AuthEvent::SignedOut => None,
        };

        let transition = match (&previous, &next) {
            (None, None) => AuthTransition::Unchanged,
            (Some(prev), Some(user)) if prev.uid == user.uid => AuthTransition::Unchanged,
            (None, Some(user)) => AuthTransition::SignedIn { user: user.clone() },
            (Some(prev), Some(user)) => AuthTransition::Switched {
                previous_uid: prev.uid.clone(),
                user: user.clone(),
            },
            (Some(prev), None) => AuthTransition::SignedOut {
                previous_uid: prev.uid.clone(),
            },
        };

        *current = Some(next.clone());
        // Held across the write so snapshots land in observation order.
        self.write_snapshot(next).await;
        drop(current);

        self.apply(&transition);
        transition
    }

    async fn write_snapshot(&self, user: Option<AuthUser>) {
        let snapshot = AuthSnapshot::now(user);
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::warn!(error = %e, "Failed to persist auth snapshot");
        }
    }

    fn apply(&self, transition: &AuthTransition) {
        match transition {
            AuthTransition::Unchanged => return,
            AuthTransition::SignedIn { user } => {
                tracing::info!(uid = %user.uid, "User signed in");
                self.emit_login(user);
            }
            AuthTransition::Switched { previous_uid, user } => {
                tracing::info!(from = %previous_uid, to = %user.uid, "Signed-in user changed");
                self.emit_logout(previous_uid);
                self.emit_login(user);
            }
            AuthTransition::SignedOut { previous_uid } => {
                tracing::info!(uid = %previous_uid, "User signed out");
                self.emit_logout(previous_uid);
                self.activity.set_user(None);
            }
        }

        self.cache.clear();
        // No subscribers is fine; the return value is what callers act on.
        let _ = self.transitions.send(transition.clone());
    }

    fn emit_login(&self, user: &AuthUser) {
        self.activity.set_user(Some(user.uid.clone()));
        let mut event = self
            .activity
            .event(ActivityKind::Login)
            .with_target(user.uid.clone());
        if let Some(email) = &user.email {
            event = event.with_metadata("email", json!(email));
        }
        self.activity.emit_deduplicated(event);
    }

    fn emit_logout(&self, uid: &str) {
        let mut event = self.activity.event(ActivityKind::Logout).with_target(uid);
        event.user_id = uid.to_string();
        self.activity.emit_deduplicated(event);
    }

    /// Opens a browsing session and reports it
    pub async fn start_session(&self) -> Session {
        let session = Session::start(self.activity.user_id());
        self.activity.set_session(Some(session.id));
        self.activity.reset_counts();

        let event = self
            .activity
            .event(ActivityKind::SessionStart)
            .with_target(session.id.to_string());
        self.activity.emit(event);

        tracing::debug!(session_id = %session.id, user = %session.user_id, "Session started");
        *self.session.lock().await = Some(session.clone());
        session
    }

    /// Closes the open session with its activity counts and waits for delivery
    pub async fn end_session(&self) -> Option<Session> {
        let mut session = self.session.lock().await.take()?;
        let counts = self.activity.counts();
        session.ended_at = Some(chrono::Utc::now());
        session.page_views = counts.page_views;
        session.coin_views = counts.coin_views;
        session.chart_views = counts.chart_views;

        let event = self
            .activity
            .event(ActivityKind::SessionEnd)
            .with_target(session.id.to_string())
            .with_metadata("pageViews", json!(session.page_views))
            .with_metadata("coinViews", json!(session.coin_views))
            .with_metadata("chartViews", json!(session.chart_views))
            .with_metadata("durationSecs", json!(session.duration().num_seconds()));
        self.activity.emit(event);
        self.activity.flush().await;
        self.activity.set_session(None);

        tracing::debug!(session_id = %session.id, "Session ended");
        Some(session)
    }

    pub async fn session(&self) -> Option<Session> {
        self.session.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockBackend;
    use crate::query::QueryKey;
    use chrono::Utc;

    struct Harness {
        backend: Arc<MockBackend>,
        store: Arc<MemorySnapshotStore>,
        activity: Arc<ActivityTracker>,
        cache: QueryCache,
        tracker: AuthSessionTracker,
    }

    fn harness() -> Harness {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemorySnapshotStore::new());
        let activity = Arc::new(ActivityTracker::new(backend.clone()));
        let cache = QueryCache::new();
        let tracker = AuthSessionTracker::new(store.clone(), activity.clone(), cache.clone());
        Harness {
            backend,
            store,
            activity,
            cache,
            tracker,
        }
    }

    fn user(uid: &str) -> AuthUser {
        AuthUser {
            email: Some(format!("{}@example.com", uid)),
            ..AuthUser::new(uid)
        }
    }

    fn logins(backend: &MockBackend) -> usize {
        backend
            .tracked()
            .iter()
            .filter(|e| e.kind == ActivityKind::Login)
            .count()
    }

    #[tokio::test]
    async fn test_sign_in_tracks_once_and_reloads() {
        let h = harness();
        let mut transitions = h.tracker.subscribe();
        h.cache.set_query_data(&QueryKey::from(["coins"]), 1u8);

        let transition = h.tracker.observe(AuthEvent::SignedIn(user("u1"))).await;
        // Provider fires the same state again while initializing.
        let again = h.tracker.observe(AuthEvent::SignedIn(user("u1"))).await;
        h.activity.flush().await;

        assert!(transition.requires_reload());
        assert_eq!(again, AuthTransition::Unchanged);
        assert_eq!(logins(&h.backend), 1);
        assert_eq!(h.backend.tracked()[0].user_id, "u1");
        assert!(h.cache.is_empty());
        assert_eq!(transitions.recv().await.unwrap(), transition);
        assert_eq!(h.tracker.cached_user().await.unwrap().uid, "u1");
    }

    #[tokio::test]
    async fn test_restored_session_is_unchanged() {
        let h = harness();
        h.store
            .save(&AuthSnapshot::now(Some(user("u1"))))
            .await
            .unwrap();

        let transition = h.tracker.observe(AuthEvent::SignedIn(user("u1"))).await;
        h.activity.flush().await;

        assert_eq!(transition, AuthTransition::Unchanged);
        assert_eq!(h.backend.calls("track"), 0);
    }

    #[tokio::test]
    async fn test_expired_snapshot_behaves_as_absent() {
        let h = harness();
        h.store
            .save(&AuthSnapshot {
                user: Some(user("u1")),
                cached_at: Utc::now() - chrono::Duration::minutes(6),
            })
            .await
            .unwrap();

        assert_eq!(h.tracker.cached_user().await, None);
        assert_eq!(h.tracker.current_user().await, None);

        let transition = h.tracker.observe(AuthEvent::SignedIn(user("u1"))).await;
        h.activity.flush().await;
        assert!(matches!(transition, AuthTransition::SignedIn { .. }));
        assert_eq!(logins(&h.backend), 1);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_fails_open() {
        let h = harness();
        h.store.set_raw("{\"user\": 42");
        assert_eq!(h.tracker.cached_user().await, None);
    }

    #[tokio::test]
    async fn test_identity_switch_logs_out_then_in() {
        let h = harness();
        h.tracker.observe(AuthEvent::SignedIn(user("u1"))).await;
        let transition = h.tracker.observe(AuthEvent::SignedIn(user("u2"))).await;
        h.activity.flush().await;

        assert_eq!(
            transition,
            AuthTransition::Switched {
                previous_uid: "u1".into(),
                user: user("u2"),
            }
        );
        let kinds: Vec<_> = h.backend.tracked().iter().map(|e| (e.kind, e.user_id.clone())).collect();
        assert!(kinds.contains(&(ActivityKind::Logout, "u1".to_string())));
        assert!(kinds.contains(&(ActivityKind::Login, "u2".to_string())));
        assert_eq!(h.activity.user_id(), "u2");
    }

    #[tokio::test]
    async fn test_sign_out_tracks_logout_and_clears_state() {
        let h = harness();
        h.tracker.observe(AuthEvent::SignedIn(user("u1"))).await;
        h.cache.set_query_data(&QueryKey::from(["watchlist", "u1"]), vec!["btc".to_string()]);

        let transition = h.tracker.observe(AuthEvent::SignedOut).await;
        h.tracker.observe(AuthEvent::SignedOut).await;
        h.activity.flush().await;

        assert_eq!(
            transition,
            AuthTransition::SignedOut {
                previous_uid: "u1".into()
            }
        );
        assert!(!transition.requires_reload());
        let logouts = h
            .backend
            .tracked()
            .iter()
            .filter(|e| e.kind == ActivityKind::Logout)
            .count();
        assert_eq!(logouts, 1);
        assert!(h.cache.is_empty());
        assert_eq!(h.tracker.cached_user().await, None);
        assert_eq!(h.activity.user_id(), crate::constants::ANONYMOUS_USER);
    }

    /// Delays writes of `slow_uid` so concurrent saves could overtake them
    struct SlowStore {
        inner: MemorySnapshotStore,
        slow_uid: &'static str,
    }

    #[async_trait::async_trait]
    impl SnapshotStore for SlowStore {
        async fn load(&self) -> Result<Option<AuthSnapshot>, crate::error::SnapshotError> {
            self.inner.load().await
        }

        async fn save(&self, snapshot: &AuthSnapshot) -> Result<(), crate::error::SnapshotError> {
            if snapshot.user.as_ref().map(|u| u.uid.as_str()) == Some(self.slow_uid) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.inner.save(snapshot).await
        }

        async fn clear(&self) -> Result<(), crate::error::SnapshotError> {
            self.inner.clear().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_observes_persist_in_order() {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(SlowStore {
            inner: MemorySnapshotStore::new(),
            slow_uid: "u1",
        });
        let activity = Arc::new(ActivityTracker::new(backend.clone()));
        let tracker = AuthSessionTracker::new(store.clone(), activity, QueryCache::new());

        tokio::join!(
            tracker.observe(AuthEvent::SignedIn(user("u1"))),
            tracker.observe(AuthEvent::SignedIn(user("u2"))),
        );

        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.user.map(|u| u.uid), Some("u2".to_string()));
        assert_eq!(tracker.current_user().await.map(|u| u.uid), Some("u2".to_string()));
    }

    #[tokio::test]
    async fn test_session_aggregates_counts() {
        let h = harness();
        h.tracker.observe(AuthEvent::SignedIn(user("u1"))).await;

        let session = h.tracker.start_session().await;
        h.activity.track_page_view("/");
        h.activity.track_coin_view("bitcoin");
        h.activity.track_coin_view("ethereum");
        h.activity.track_chart_view("bitcoin", "7d");

        let closed = h.tracker.end_session().await.unwrap();
        assert_eq!(closed.id, session.id);
        assert!(!closed.is_open());
        assert_eq!((closed.page_views, closed.coin_views, closed.chart_views), (1, 2, 1));

        let end = h
            .backend
            .tracked()
            .into_iter()
            .find(|e| e.kind == ActivityKind::SessionEnd)
            .unwrap();
        assert_eq!(end.metadata["coinViews"], json!(2));
        assert_eq!(end.session_id, Some(session.id));
        assert!(h.tracker.end_session().await.is_none());
    }
}
