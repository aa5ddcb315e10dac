//! Backend API abstraction
//!
//! The data fetch layer is split by concern so that each consumer only
//! depends on the calls it makes. [`crate::rest::RestClient`] implements all of them.

use crate::{
    error::ApiError,
    types::{
        ActivityEvent, ActivityFilter, AltSeasonIndex, CoinDetail, Coin, FearGreedIndex,
        HiddenCoin, HistoryInterval, MarketHours, MarketSnapshot, PriceHistory, ProfilePatch,
        SearchResult, UserProfile,
    },
};
use async_trait::async_trait;

/// Read-only market data
#[async_trait]
pub trait MarketDataApi: Send + Sync {
    /// Global market aggregates
    async fn global_stats(&self) -> Result<MarketSnapshot, ApiError>;

    /// One page of the coin table, ordered by market cap
    async fn coins(&self, page: u32, per_page: u32) -> Result<Vec<Coin>, ApiError>;

    /// Detail of a single coin
    async fn coin(&self, id: &str) -> Result<CoinDetail, ApiError>;

    /// Price history over the last `days` days
    async fn coin_history(
        &self,
        id: &str,
        days: u32,
        interval: HistoryInterval,
    ) -> Result<PriceHistory, ApiError>;

    /// Free-text coin search
    async fn search(&self, query: &str) -> Result<SearchResult, ApiError>;

    async fn alt_season_index(&self) -> Result<AltSeasonIndex, ApiError>;

    async fn fear_greed_index(&self) -> Result<FearGreedIndex, ApiError>;

    async fn market_hours(&self) -> Result<MarketHours, ApiError>;
}

/// Fire-and-forget telemetry sink
#[async_trait]
pub trait TrackingApi: Send + Sync {
    /// Posts one event to the tracking endpoint matching its kind
    async fn track(&self, event: &ActivityEvent) -> Result<(), ApiError>;
}

/// Per-user records: profile and watchlist
#[async_trait]
pub trait UserDataApi: Send + Sync {
    /// Returns `None` when the user has no profile yet
    async fn profile(&self, uid: &str) -> Result<Option<UserProfile>, ApiError>;

    async fn create_profile(&self, profile: &UserProfile) -> Result<UserProfile, ApiError>;

    async fn update_profile(&self, uid: &str, patch: &ProfilePatch) -> Result<(), ApiError>;

    async fn watchlist(&self, uid: &str) -> Result<Vec<String>, ApiError>;

    async fn add_to_watchlist(&self, uid: &str, coin_id: &str) -> Result<(), ApiError>;

    async fn remove_from_watchlist(&self, uid: &str, coin_id: &str) -> Result<(), ApiError>;
}

/// Admin moderation endpoints
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn hidden_coins(&self) -> Result<Vec<HiddenCoin>, ApiError>;

    async fn hide_coin(&self, coin_id: &str, reason: Option<&str>) -> Result<(), ApiError>;

    async fn unhide_coin(&self, coin_id: &str) -> Result<(), ApiError>;

    async fn activities(&self, filter: &ActivityFilter) -> Result<Vec<ActivityEvent>, ApiError>;

    async fn users(&self) -> Result<Vec<UserProfile>, ApiError>;

    async fn set_user_disabled(&self, uid: &str, disabled: bool) -> Result<(), ApiError>;

    async fn delete_user(&self, uid: &str) -> Result<(), ApiError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use serde::de::DeserializeOwned;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted outcome of one endpoint
    #[derive(Debug, Clone)]
    enum Scripted {
        Json(Value),
        Status(u16),
        Offline,
    }

    /// In-memory backend implementing every API trait
    ///
    /// Endpoints are addressed by short names (`"coins"`, `"track"`,
    /// `"add_to_watchlist"`, ...). Unscripted endpoints answer with `null`
    /// JSON, which is fine for unit-returning calls.
    #[derive(Default)]
    pub struct MockBackend {
        responses: Mutex<HashMap<&'static str, Scripted>>,
        delays: Mutex<HashMap<&'static str, Duration>>,
        calls: Mutex<HashMap<&'static str, usize>>,
        tracked: Mutex<Vec<ActivityEvent>>,
        mutations: Mutex<Vec<(String, String)>>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_json(&self, endpoint: &'static str, value: Value) {
            self.responses
                .lock()
                .unwrap()
                .insert(endpoint, Scripted::Json(value));
        }

        pub fn set_status(&self, endpoint: &'static str, status: u16) {
            self.responses
                .lock()
                .unwrap()
                .insert(endpoint, Scripted::Status(status));
        }

        /// Makes the endpoint fail as if the network were down
        pub fn set_offline(&self, endpoint: &'static str) {
            self.responses
                .lock()
                .unwrap()
                .insert(endpoint, Scripted::Offline);
        }

        pub fn clear(&self, endpoint: &'static str) {
            self.responses.lock().unwrap().remove(endpoint);
        }

        pub fn set_delay(&self, endpoint: &'static str, delay: Duration) {
            self.delays.lock().unwrap().insert(endpoint, delay);
        }

        pub fn calls(&self, endpoint: &'static str) -> usize {
            self.calls.lock().unwrap().get(endpoint).copied().unwrap_or(0)
        }

        /// Events that reached the tracking endpoint successfully
        pub fn tracked(&self) -> Vec<ActivityEvent> {
            self.tracked.lock().unwrap().clone()
        }

        /// Successful mutations as `(endpoint, argument)` pairs, in call order
        pub fn mutations(&self) -> Vec<(String, String)> {
            self.mutations.lock().unwrap().clone()
        }

        async fn respond<T: DeserializeOwned>(&self, endpoint: &'static str) -> Result<T, ApiError> {
            *self.calls.lock().unwrap().entry(endpoint).or_insert(0) += 1;

            let delay = self.delays.lock().unwrap().get(endpoint).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let scripted = self
                .responses
                .lock()
                .unwrap()
                .get(endpoint)
                .cloned()
                .unwrap_or(Scripted::Json(Value::Null));

            match scripted {
                Scripted::Json(value) => serde_json::from_value(value)
                    .map_err(|e| ApiError::InvalidResponse(e.to_string())),
                Scripted::Status(429) => Err(ApiError::RateLimited),
                Scripted::Status(status) => Err(ApiError::http(
                    reqwest::StatusCode::from_u16(status)
                        .unwrap_or(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
                )),
                Scripted::Offline => Err(ApiError::Timeout),
            }
        }

        async fn mutate(&self, endpoint: &'static str, arg: &str) -> Result<(), ApiError> {
            self.respond::<Value>(endpoint).await?;
            self.mutations
                .lock()
                .unwrap()
                .push((endpoint.to_string(), arg.to_string()));
            Ok(())
        }
    }

    #[async_trait]
    impl MarketDataApi for MockBackend {
        async fn global_stats(&self) -> Result<MarketSnapshot, ApiError> {
            self.respond("global_stats").await
        }

        async fn coins(&self, _page: u32, _per_page: u32) -> Result<Vec<Coin>, ApiError> {
            self.respond("coins").await
        }

        async fn coin(&self, _id: &str) -> Result<CoinDetail, ApiError> {
            self.respond("coin").await
        }

        async fn coin_history(
            &self,
            _id: &str,
            _days: u32,
            _interval: HistoryInterval,
        ) -> Result<PriceHistory, ApiError> {
            self.respond("coin_history").await
        }

        async fn search(&self, _query: &str) -> Result<SearchResult, ApiError> {
            self.respond("search").await
        }

        async fn alt_season_index(&self) -> Result<AltSeasonIndex, ApiError> {
            self.respond("alt_season_index").await
        }

        async fn fear_greed_index(&self) -> Result<FearGreedIndex, ApiError> {
            self.respond("fear_greed_index").await
        }

        async fn market_hours(&self) -> Result<MarketHours, ApiError> {
            self.respond("market_hours").await
        }
    }

    #[async_trait]
    impl TrackingApi for MockBackend {
        async fn track(&self, event: &ActivityEvent) -> Result<(), ApiError> {
            self.respond::<Value>("track").await?;
            self.tracked.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl UserDataApi for MockBackend {
        async fn profile(&self, _uid: &str) -> Result<Option<UserProfile>, ApiError> {
            self.respond("profile").await
        }

        async fn create_profile(&self, profile: &UserProfile) -> Result<UserProfile, ApiError> {
            self.mutate("create_profile", &profile.uid).await?;
            Ok(profile.clone())
        }

        async fn update_profile(&self, uid: &str, _patch: &ProfilePatch) -> Result<(), ApiError> {
            self.mutate("update_profile", uid).await
        }

        async fn watchlist(&self, _uid: &str) -> Result<Vec<String>, ApiError> {
            self.respond("watchlist").await
        }

        async fn add_to_watchlist(&self, _uid: &str, coin_id: &str) -> Result<(), ApiError> {
            self.mutate("add_to_watchlist", coin_id).await
        }

        async fn remove_from_watchlist(&self, _uid: &str, coin_id: &str) -> Result<(), ApiError> {
            self.mutate("remove_from_watchlist", coin_id).await
        }
    }

    #[async_trait]
    impl AdminApi for MockBackend {
        async fn hidden_coins(&self) -> Result<Vec<HiddenCoin>, ApiError> {
            self.respond("hidden_coins").await
        }

        async fn hide_coin(&self, coin_id: &str, _reason: Option<&str>) -> Result<(), ApiError> {
            self.mutate("hide_coin", coin_id).await
        }

        async fn unhide_coin(&self, coin_id: &str) -> Result<(), ApiError> {
            self.mutate("unhide_coin", coin_id).await
        }

        async fn activities(&self, _filter: &ActivityFilter) -> Result<Vec<ActivityEvent>, ApiError> {
            self.respond("activities").await
        }

        async fn users(&self) -> Result<Vec<UserProfile>, ApiError> {
            self.respond("users").await
        }

        async fn set_user_disabled(&self, uid: &str, _disabled: bool) -> Result<(), ApiError> {
            self.mutate("set_user_disabled", uid).await
        }

        async fn delete_user(&self, uid: &str) -> Result<(), ApiError> {
            self.mutate("delete_user", uid).await
        }
    }
}
