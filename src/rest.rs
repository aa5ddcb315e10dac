//! REST implementation of the backend API

use crate::{
    api::{AdminApi, MarketDataApi, TrackingApi, UserDataApi},
    config::ClientConfig,
    constants::CACHE_BUST_PARAM,
    error::ApiError,
    metrics::{ApiMetrics, RequestStats},
    types::{
        ActivityEvent, ActivityFilter, AltSeasonIndex, Coin, CoinDetail, FearGreedIndex,
        HiddenCoin, HistoryInterval, MarketHours, MarketSnapshot, PriceHistory, ProfilePatch,
        SearchResult, UserProfile,
    },
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, EXPIRES, PRAGMA};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use urlencoding::encode;
use uuid::Uuid;

/// HTTP client for the dashboard backend
///
/// Every GET carries a unique `_t` query parameter and no-cache headers so
/// that no intermediate cache ever answers for the backend.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    metrics: Arc<ApiMetrics>,
}

impl RestClient {
    /// Creates a client from configuration
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .default_headers(no_cache_headers())
            .build()
            .map_err(ApiError::Network)?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            metrics: Arc::new(ApiMetrics::new()),
        })
    }

    /// Creates a client configured from the environment
    pub fn from_env() -> Result<Self, ApiError> {
        Self::new(&ClientConfig::from_env())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Latency and success stats of all requests made so far
    pub async fn stats(&self) -> RequestStats {
        self.metrics.stats().await
    }

    pub fn metrics(&self) -> Arc<ApiMetrics> {
        self.metrics.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Issues a cache-busted GET and decodes the JSON body
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let request = self
            .client
            .get(self.url(path))
            .query(query)
            .query(&[(CACHE_BUST_PARAM, cache_buster())]);

        let body = self.send(request, path).await?;
        decode(path, &body)
    }

    /// Issues a JSON POST and discards the response body
    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        let request = self.client.post(self.url(path)).json(body);
        self.send(request, path).await.map(|_| ())
    }

    async fn patch_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        let request = self.client.patch(self.url(path)).json(body);
        self.send(request, path).await.map(|_| ())
    }

    /// Sends a request, maps the status, and records metrics
    async fn send(&self, request: RequestBuilder, path: &str) -> Result<String, ApiError> {
        let start = Instant::now();
        let result = self.execute(request).await;
        self.metrics
            .record_request(start.elapsed(), result.is_ok())
            .await;

        match &result {
            Ok(_) => tracing::debug!(
                path = path,
                latency_ms = start.elapsed().as_millis() as u64,
                "Request succeeded"
            ),
            Err(e) => tracing::debug!(path = path, error = %e, "Request failed"),
        }

        result
    }

    async fn execute(&self, request: RequestBuilder) -> Result<String, ApiError> {
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::RateLimited);
        }
        if !status.is_success() {
            return Err(ApiError::http(status));
        }

        response.text().await.map_err(map_transport_error)
    }

    /// Like `get_json`, but a 404 becomes `None`
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ApiError> {
        match self.get_json(path, &[]).await {
            Ok(value) => Ok(Some(value)),
            Err(ApiError::Http { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    headers
}

/// Unique value per request: wall-clock millis plus a random suffix
fn cache_buster() -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), &nonce[..8])
}

fn map_transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(err)
    }
}

fn decode<T: DeserializeOwned>(path: &str, body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| {
        ApiError::InvalidResponse(format!("Failed to parse response of {}: {}", path, e))
    })
}

#[async_trait]
impl MarketDataApi for RestClient {
    async fn global_stats(&self) -> Result<MarketSnapshot, ApiError> {
        self.get_json("/api/global-stats", &[]).await
    }

    async fn coins(&self, page: u32, per_page: u32) -> Result<Vec<Coin>, ApiError> {
        self.get_json(
            "/api/coins",
            &[("page", page.to_string()), ("per_page", per_page.to_string())],
        )
        .await
    }

    async fn coin(&self, id: &str) -> Result<CoinDetail, ApiError> {
        self.get_json(&format!("/api/coins/{}", encode(id)), &[])
            .await
    }

    async fn coin_history(
        &self,
        id: &str,
        days: u32,
        interval: HistoryInterval,
    ) -> Result<PriceHistory, ApiError> {
        self.get_json(
            &format!("/api/coins/{}/history", encode(id)),
            &[
                ("days", days.to_string()),
                ("interval", interval.as_str().to_string()),
            ],
        )
        .await
    }

    async fn search(&self, query: &str) -> Result<SearchResult, ApiError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(SearchResult::default());
        }
        self.get_json("/api/search", &[("q", query.to_string())])
            .await
    }

    async fn alt_season_index(&self) -> Result<AltSeasonIndex, ApiError> {
        self.get_json("/api/alt-season-index", &[]).await
    }

    async fn fear_greed_index(&self) -> Result<FearGreedIndex, ApiError> {
        self.get_json("/api/fear-greed-index", &[]).await
    }

    async fn market_hours(&self) -> Result<MarketHours, ApiError> {
        self.get_json("/api/market-hours", &[]).await
    }
}

#[async_trait]
impl TrackingApi for RestClient {
    async fn track(&self, event: &ActivityEvent) -> Result<(), ApiError> {
        self.post_json(&format!("/api/track/{}", event.kind.endpoint()), event)
            .await
    }
}

#[async_trait]
impl UserDataApi for RestClient {
    async fn profile(&self, uid: &str) -> Result<Option<UserProfile>, ApiError> {
        self.get_optional(&format!("/api/users/{}", encode(uid)))
            .await
    }

    async fn create_profile(&self, profile: &UserProfile) -> Result<UserProfile, ApiError> {
        self.post_json("/api/users", profile).await?;
        Ok(profile.clone())
    }

    async fn update_profile(&self, uid: &str, patch: &ProfilePatch) -> Result<(), ApiError> {
        self.patch_json(&format!("/api/users/{}", encode(uid)), patch)
            .await
    }

    async fn watchlist(&self, uid: &str) -> Result<Vec<String>, ApiError> {
        self.get_json(&format!("/api/users/{}/watchlist", encode(uid)), &[])
            .await
    }

    async fn add_to_watchlist(&self, uid: &str, coin_id: &str) -> Result<(), ApiError> {
        self.post_json(
            &format!("/api/users/{}/watchlist", encode(uid)),
            &json!({ "coinId": coin_id }),
        )
        .await
    }

    async fn remove_from_watchlist(&self, uid: &str, coin_id: &str) -> Result<(), ApiError> {
        self.post_json(
            &format!("/api/users/{}/watchlist/remove", encode(uid)),
            &json!({ "coinId": coin_id }),
        )
        .await
    }
}

#[async_trait]
impl AdminApi for RestClient {
    async fn hidden_coins(&self) -> Result<Vec<HiddenCoin>, ApiError> {
        self.get_json("/api/admin/hidden-coins", &[]).await
    }

    async fn hide_coin(&self, coin_id: &str, reason: Option<&str>) -> Result<(), ApiError> {
        self.post_json(
            "/api/admin/hidden-coins",
            &json!({ "coinId": coin_id, "reason": reason }),
        )
        .await
    }

    async fn unhide_coin(&self, coin_id: &str) -> Result<(), ApiError> {
        self.post_json(
            "/api/admin/hidden-coins/remove",
            &json!({ "coinId": coin_id }),
        )
        .await
    }

    async fn activities(&self, filter: &ActivityFilter) -> Result<Vec<ActivityEvent>, ApiError> {
        let mut query = Vec::new();
        if let Some(user_id) = &filter.user_id {
            query.push(("userId", user_id.clone()));
        }
        if let Some(kind) = filter.kind {
            query.push(("kind", kind.endpoint().to_string()));
        }
        if let Some(limit) = filter.limit {
            query.push(("limit", limit.to_string()));
        }
        self.get_json("/api/admin/activities", &query).await
    }

    async fn users(&self) -> Result<Vec<UserProfile>, ApiError> {
        self.get_json("/api/admin/users", &[]).await
    }

    async fn set_user_disabled(&self, uid: &str, disabled: bool) -> Result<(), ApiError> {
        self.post_json(
            &format!("/api/admin/users/{}/disabled", encode(uid)),
            &json!({ "disabled": disabled }),
        )
        .await
    }

    async fn delete_user(&self, uid: &str) -> Result<(), ApiError> {
        self.post_json(&format!("/api/admin/users/{}/delete", encode(uid)), &json!({}))
            .await
    }
}
