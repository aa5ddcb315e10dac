//! User profile and watchlist
//!
//! Watchlist mutations are optimistic: the local set changes first and stays
//! changed when the backend call fails. Failed mutations queue up, later
//! ones wait behind them, and [`WatchlistStore::sync_pending`] replays the
//! queue in order.

use crate::{
    api::UserDataApi,
    error::ApiError,
    query::{QueryCache, QueryKey},
    types::{AuthUser, ProfilePatch, UserProfile},
};
use chrono::Utc;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Profile lifecycle on top of the user data API
pub struct ProfileService {
    api: Arc<dyn UserDataApi>,
}

impl ProfileService {
    pub fn new(api: Arc<dyn UserDataApi>) -> Self {
        Self { api }
    }

    /// Returns the stored profile, creating it on first sign-in
    ///
    /// An existing profile gets its `last_login` bumped.
    pub async fn ensure_profile(&self, user: &AuthUser) -> Result<UserProfile, ApiError> {
        if let Some(mut profile) = self.api.profile(&user.uid).await? {
            let patch = ProfilePatch {
                last_login: Some(Utc::now()),
                ..Default::default()
            };
            self.api.update_profile(&user.uid, &patch).await?;
            patch.apply(&mut profile);
            return Ok(profile);
        }

        tracing::info!(uid = %user.uid, "Creating profile on first sign-in");
        self.api
            .create_profile(&UserProfile::from_auth_user(user))
            .await
    }

    /// Writes preference fields onto the profile
    pub async fn update_preferences(
        &self,
        uid: &str,
        preferences: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Result<(), ApiError> {
        let patch = ProfilePatch {
            preferences: preferences.into_iter().collect(),
            ..Default::default()
        };
        self.api.update_profile(uid, &patch).await
    }

    pub async fn update_profile(&self, uid: &str, patch: &ProfilePatch) -> Result<(), ApiError> {
        self.api.update_profile(uid, patch).await
    }
}

/// Set of coin ids followed by a user
pub type Watchlist = BTreeSet<String>;

/// Outcome of a watchlist mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Backend confirmed the change
    Synced,
    /// Applied locally; will sync when online
    Pending,
    /// Nothing to do (already in the requested state)
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WatchlistOp {
    Add(String),
    Remove(String),
}

impl WatchlistOp {
    fn coin_id(&self) -> &str {
        match self {
            WatchlistOp::Add(id) | WatchlistOp::Remove(id) => id,
        }
    }

    fn apply(&self, watchlist: &mut Watchlist) {
        match self {
            WatchlistOp::Add(id) => {
                watchlist.insert(id.clone());
            }
            WatchlistOp::Remove(id) => {
                watchlist.remove(id);
            }
        }
    }
}

#[derive(Debug, Default)]
struct WatchlistState {
    coins: Watchlist,
    pending: VecDeque<WatchlistOp>,
}

/// Optimistic watchlist for one user
///
/// The current set is mirrored into the query cache under
/// `["watchlist", <uid>]` so views reading the cache see local changes.
pub struct WatchlistStore {
    uid: String,
    api: Arc<dyn UserDataApi>,
    cache: QueryCache,
    state: Mutex<WatchlistState>,
}

impl WatchlistStore {
    pub fn new(uid: impl Into<String>, api: Arc<dyn UserDataApi>, cache: QueryCache) -> Self {
        Self {
            uid: uid.into(),
            api,
            cache,
            state: Mutex::new(WatchlistState::default()),
        }
    }

    pub fn query_key(&self) -> QueryKey {
        QueryKey::new(["watchlist", self.uid.as_str()])
    }

    /// Replaces the local set with the server's, then re-applies pending ops
    pub async fn load(&self) -> Result<Watchlist, ApiError> {
        let remote = self.api.watchlist(&self.uid).await?;
        let mut state = self.state.lock().await;
        state.coins = remote.into_iter().collect();
        let pending: Vec<_> = state.pending.iter().cloned().collect();
        for op in &pending {
            op.apply(&mut state.coins);
        }
        self.publish(&state.coins);
        Ok(state.coins.clone())
    }

    pub async fn coins(&self) -> Watchlist {
        self.state.lock().await.coins.clone()
    }

    pub async fn contains(&self, coin_id: &str) -> bool {
        self.state.lock().await.coins.contains(coin_id)
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn add(&self, coin_id: &str) -> SyncStatus {
        self.mutate(WatchlistOp::Add(coin_id.to_string())).await
    }

    pub async fn remove(&self, coin_id: &str) -> SyncStatus {
        self.mutate(WatchlistOp::Remove(coin_id.to_string())).await
    }

    pub async fn toggle(&self, coin_id: &str) -> SyncStatus {
        if self.contains(coin_id).await {
            self.remove(coin_id).await
        } else {
            self.add(coin_id).await
        }
    }

    async fn mutate(&self, op: WatchlistOp) -> SyncStatus {
        {
            let mut state = self.state.lock().await;
            let present = state.coins.contains(op.coin_id());
            let changes = matches!(
                (&op, present),
                (WatchlistOp::Add(_), false) | (WatchlistOp::Remove(_), true)
            );
            if !changes {
                return SyncStatus::Unchanged;
            }
            op.apply(&mut state.coins);
            self.publish(&state.coins);

            // Earlier changes must reach the backend first.
            if !state.pending.is_empty() {
                state.pending.push_back(op);
                return SyncStatus::Pending;
            }
        }

        match self.send(&op).await {
            Ok(()) => SyncStatus::Synced,
            Err(e) => {
                tracing::warn!(
                    uid = %self.uid,
                    coin = op.coin_id(),
                    error = %e,
                    "Watchlist change kept locally, will sync when online"
                );
                self.state.lock().await.pending.push_back(op);
                SyncStatus::Pending
            }
        }
    }

    /// Replays queued mutations in order; stops at the first failure
    ///
    /// Returns how many were delivered.
    pub async fn sync_pending(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.state.lock().await.pending.front().cloned();
            let Some(op) = next else {
                break;
            };

            if let Err(e) = self.send(&op).await {
                tracing::debug!(coin = op.coin_id(), error = %e, "Watchlist sync still failing");
                break;
            }

            let mut state = self.state.lock().await;
            if state.pending.front() == Some(&op) {
                state.pending.pop_front();
            }
            delivered += 1;
        }
        delivered
    }

    async fn send(&self, op: &WatchlistOp) -> Result<(), ApiError> {
        match op {
            WatchlistOp::Add(id) => self.api.add_to_watchlist(&self.uid, id).await,
            WatchlistOp::Remove(id) => self.api.remove_from_watchlist(&self.uid, id).await,
        }
    }

    fn publish(&self, coins: &Watchlist) {
        self.cache.set_query_data(&self.query_key(), coins.clone());
    }
}
