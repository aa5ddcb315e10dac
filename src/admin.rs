//! Admin moderation: coin visibility, activity log and user management
//!
//! Reads go through the query cache; every mutation invalidates the queries
//! it affects.

use crate::{
    api::AdminApi,
    constants::refresh,
    error::AdminError,
    query::{fetcher, QueryCache, QueryKey, QueryOptions},
    types::{ActivityEvent, ActivityFilter, AuthUser, HiddenCoin, UserProfile},
};
use std::collections::HashSet;
use std::sync::Arc;

pub struct AdminService {
    api: Arc<dyn AdminApi>,
    cache: QueryCache,
    options: QueryOptions,
}

impl AdminService {
    pub fn new(api: Arc<dyn AdminApi>, cache: QueryCache) -> Self {
        Self {
            api,
            cache,
            options: QueryOptions::polling(refresh::ADMIN),
        }
    }

    pub fn hidden_coins_key() -> QueryKey {
        QueryKey::from(["admin", "hidden-coins"])
    }

    pub fn users_key() -> QueryKey {
        QueryKey::from(["admin", "users"])
    }

    fn activities_key(filter: &ActivityFilter) -> QueryKey {
        QueryKey::new([
            "admin".to_string(),
            "activities".to_string(),
            filter.user_id.clone().unwrap_or_default(),
            filter.kind.map(|k| k.endpoint().to_string()).unwrap_or_default(),
            filter.limit.map(|l| l.to_string()).unwrap_or_default(),
        ])
    }

    pub async fn hidden_coins(&self) -> Result<Vec<HiddenCoin>, AdminError> {
        let api = self.api.clone();
        let coins = self
            .cache
            .fetch_query(
                &Self::hidden_coins_key(),
                &self.options,
                fetcher(move || {
                    let api = api.clone();
                    async move { api.hidden_coins().await }
                }),
            )
            .await?;
        Ok(coins)
    }

    /// Ids of hidden coins, for filtering public listings
    pub async fn hidden_coin_ids(&self) -> Result<HashSet<String>, AdminError> {
        Ok(self
            .hidden_coins()
            .await?
            .into_iter()
            .map(|c| c.coin_id)
            .collect())
    }

    pub async fn hide_coin(
        &self,
        actor: &AuthUser,
        coin_id: &str,
        reason: Option<&str>,
    ) -> Result<(), AdminError> {
        require_admin(actor)?;
        self.api.hide_coin(coin_id, reason).await?;
        tracing::info!(admin = %actor.uid, coin = coin_id, "Coin hidden");
        self.invalidate_coin_visibility();
        Ok(())
    }

    pub async fn unhide_coin(&self, actor: &AuthUser, coin_id: &str) -> Result<(), AdminError> {
        require_admin(actor)?;
        self.api.unhide_coin(coin_id).await?;
        tracing::info!(admin = %actor.uid, coin = coin_id, "Coin unhidden");
        self.invalidate_coin_visibility();
        Ok(())
    }

    fn invalidate_coin_visibility(&self) {
        self.cache.invalidate(&Self::hidden_coins_key());
        self.cache.invalidate(&QueryKey::from(["coins"]));
    }

    pub async fn activities(&self, filter: &ActivityFilter) -> Result<Vec<ActivityEvent>, AdminError> {
        let api = self.api.clone();
        let query_filter = filter.clone();
        let events = self
            .cache
            .fetch_query(
                &Self::activities_key(filter),
                &self.options,
                fetcher(move || {
                    let api = api.clone();
                    let filter = query_filter.clone();
                    async move { api.activities(&filter).await }
                }),
            )
            .await?;
        Ok(events)
    }

    pub async fn users(&self) -> Result<Vec<UserProfile>, AdminError> {
        let api = self.api.clone();
        let users = self
            .cache
            .fetch_query(
                &Self::users_key(),
                &self.options,
                fetcher(move || {
                    let api = api.clone();
                    async move { api.users().await }
                }),
            )
            .await?;
        Ok(users)
    }

    pub async fn set_user_disabled(
        &self,
        actor: &AuthUser,
        uid: &str,
        disabled: bool,
    ) -> Result<(), AdminError> {
        require_admin(actor)?;
        self.api.set_user_disabled(uid, disabled).await?;
        tracing::info!(admin = %actor.uid, uid = uid, disabled, "User access changed");
        self.cache.invalidate(&Self::users_key());
        Ok(())
    }

    pub async fn delete_user(&self, actor: &AuthUser, uid: &str) -> Result<(), AdminError> {
        require_admin(actor)?;
        self.api.delete_user(uid).await?;
        tracing::info!(admin = %actor.uid, uid = uid, "User deleted");
        self.cache.invalidate(&Self::users_key());
        self.cache.remove(&QueryKey::new(["watchlist", uid]));
        Ok(())
    }
}

fn require_admin(actor: &AuthUser) -> Result<(), AdminError> {
    if actor.is_admin {
        Ok(())
    } else {
        Err(AdminError::Forbidden {
            uid: actor.uid.clone(),
        })
    }
}
