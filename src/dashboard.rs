//! Dashboard view models
//!
//! Turns cached queries into display-ready state. Nothing here returns an
//! error: failures become [`Loadable::Failed`] and render as `N/A`.

use crate::{
    admin::AdminService,
    api::MarketDataApi,
    constants::refresh,
    error::{ApiError, QueryError},
    metrics::ApiMetrics,
    query::{fetcher, Fetcher, QueryCache, QueryKey, QueryOptions, QueryState, QueryWatcher},
    types::{
        AltSeasonIndex, Coin, CoinDetail, ComponentHealth, FearGreedIndex, HealthStatus,
        HistoryInterval, MarketHours, MarketSnapshot, PriceHistory, SearchResult,
    },
};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Arc;

/// Placeholder shown when a value could not be loaded
pub const NOT_AVAILABLE: &str = "N/A";

/// Placeholder shown while a value is loading
pub const LOADING: &str = "…";

/// Display state of one piece of remote data
#[derive(Debug, Clone, PartialEq)]
pub enum Loadable<T> {
    Loading,
    Ready(T),
    Failed(String),
}

impl<T> Loadable<T> {
    pub fn from_result(result: Result<T, QueryError>) -> Self {
        match result {
            Ok(value) => Loadable::Ready(value),
            Err(e) => Loadable::Failed(e.to_string()),
        }
    }

    /// Stale data wins over an error so the view keeps showing something
    pub fn from_state(state: QueryState<T>) -> Self {
        match (state.data, state.error) {
            (Some(data), _) => Loadable::Ready(data),
            (None, Some(e)) => Loadable::Failed(e.to_string()),
            (None, None) => Loadable::Loading,
        }
    }

    pub fn as_ready(&self) -> Option<&T> {
        match self {
            Loadable::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Loadable::Failed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Loadable<U> {
        match self {
            Loadable::Loading => Loadable::Loading,
            Loadable::Ready(value) => Loadable::Ready(f(value)),
            Loadable::Failed(e) => Loadable::Failed(e),
        }
    }

    /// Renders the ready value with `f`, or the loading/error placeholder
    pub fn display_with(&self, f: impl FnOnce(&T) -> String) -> String {
        match self {
            Loadable::Loading => LOADING.to_string(),
            Loadable::Ready(value) => f(value),
            Loadable::Failed(_) => NOT_AVAILABLE.to_string(),
        }
    }
}

/// Formats a price: thousands separators above $1, six decimals below
pub fn format_price(value: Option<f64>) -> String {
    let Some(value) = value.filter(|v| v.is_finite()) else {
        return NOT_AVAILABLE.to_string();
    };
    if value.abs() >= 1.0 {
        format!("${}", group_thousands(value, 2))
    } else {
        format!("${:.6}", value)
    }
}

/// Formats a large dollar figure with a T/B/M/K suffix
pub fn format_usd(value: Option<f64>) -> String {
    let Some(value) = value.filter(|v| v.is_finite()) else {
        return NOT_AVAILABLE.to_string();
    };
    let abs = value.abs();
    if abs >= 1e12 {
        format!("${:.2}T", value / 1e12)
    } else if abs >= 1e9 {
        format!("${:.2}B", value / 1e9)
    } else if abs >= 1e6 {
        format!("${:.2}M", value / 1e6)
    } else if abs >= 1e3 {
        format!("${:.2}K", value / 1e3)
    } else {
        format!("${:.2}", value)
    }
}

/// Signed percentage with two decimals
pub fn format_percent(value: Option<f64>) -> String {
    match value.filter(|v| v.is_finite()) {
        Some(v) => format!("{:+.2}%", v),
        None => NOT_AVAILABLE.to_string(),
    }
}

fn group_thousands(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), ""));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    if frac_part.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, frac_part)
    }
}

/// One display row of the coin table
#[derive(Debug, Clone, PartialEq)]
pub struct CoinRow {
    pub id: String,
    pub rank: String,
    pub name: String,
    pub symbol: String,
    pub price: String,
    pub change_24h: String,
    pub market_cap: String,
    pub volume_24h: String,
}

impl From<&Coin> for CoinRow {
    fn from(coin: &Coin) -> Self {
        Self {
            id: coin.id.clone(),
            rank: coin
                .market_cap_rank
                .map(|r| r.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            name: coin.name.clone(),
            symbol: coin.symbol.to_uppercase(),
            price: format_price(coin.current_price),
            change_24h: format_percent(coin.price_change_percentage_24h),
            market_cap: format_usd(coin.market_cap),
            volume_24h: format_usd(coin.total_volume),
        }
    }
}

/// Header figures of the dashboard
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOverview {
    pub stats: Loadable<MarketSnapshot>,
    pub fear_greed: Loadable<FearGreedIndex>,
    pub alt_season: Loadable<AltSeasonIndex>,
}

impl MarketOverview {
    pub fn total_market_cap(&self) -> String {
        self.stats.display_with(|s| format_usd(Some(s.total_market_cap)))
    }

    pub fn total_volume(&self) -> String {
        self.stats.display_with(|s| format_usd(Some(s.total_volume)))
    }

    pub fn btc_dominance(&self) -> String {
        self.stats.display_with(|s| match s.btc_dominance {
            Some(d) => format!("{:.1}%", d),
            None => NOT_AVAILABLE.to_string(),
        })
    }

    pub fn sentiment(&self) -> String {
        self.fear_greed
            .display_with(|f| format!("{} ({})", f.value, f.class().label()))
    }
}

/// Market data views backed by the query cache
pub struct MarketDashboard {
    api: Arc<dyn MarketDataApi>,
    cache: QueryCache,
    visibility: Option<Arc<AdminService>>,
    metrics: Option<Arc<ApiMetrics>>,
}

impl MarketDashboard {
    pub fn new(api: Arc<dyn MarketDataApi>, cache: QueryCache) -> Self {
        Self {
            api,
            cache,
            visibility: None,
            metrics: None,
        }
    }

    /// Filters coins hidden by admins out of the coin table
    pub fn with_coin_visibility(mut self, admin: Arc<AdminService>) -> Self {
        self.visibility = Some(admin);
        self
    }

    /// Reports request metrics in the health check
    pub fn with_metrics(mut self, metrics: Arc<ApiMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    fn make_fetcher<T, F>(&self, call: F) -> Fetcher<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn MarketDataApi>) -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync + 'static,
    {
        let api = self.api.clone();
        fetcher(move || call(api.clone()))
    }

    async fn load<T>(&self, key: QueryKey, options: QueryOptions, fetch: Fetcher<T>) -> Loadable<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let result = self.cache.fetch_query(&key, &options, fetch).await;
        if let Err(e) = &result {
            tracing::warn!(key = %key, error = %e, "Dashboard query failed");
        }
        Loadable::from_result(result)
    }

    fn global_stats_query(&self) -> (QueryKey, QueryOptions, Fetcher<MarketSnapshot>) {
        (
            QueryKey::from(["global-stats"]),
            QueryOptions::polling(refresh::GLOBAL_STATS),
            self.make_fetcher(|api| async move { api.global_stats().await }.boxed()),
        )
    }

    fn coins_query(&self, page: u32, per_page: u32) -> (QueryKey, QueryOptions, Fetcher<Vec<Coin>>) {
        (
            QueryKey::new(["coins".to_string(), page.to_string(), per_page.to_string()]),
            QueryOptions::polling(refresh::COINS),
            self.make_fetcher(move |api| async move { api.coins(page, per_page).await }.boxed()),
        )
    }

    fn market_hours_query(&self) -> (QueryKey, QueryOptions, Fetcher<MarketHours>) {
        (
            QueryKey::from(["market-hours"]),
            QueryOptions::polling(refresh::MARKET_HOURS),
            self.make_fetcher(|api| async move { api.market_hours().await }.boxed()),
        )
    }

    /// Global stats and sentiment indices, fetched concurrently
    pub async fn overview(&self) -> MarketOverview {
        let (stats_key, stats_options, stats_fetch) = self.global_stats_query();
        let indices = QueryOptions::polling(refresh::INDICES);

        let (stats, fear_greed, alt_season) = tokio::join!(
            self.load(stats_key, stats_options, stats_fetch),
            self.load(
                QueryKey::from(["fear-greed"]),
                indices,
                self.make_fetcher(|api| async move { api.fear_greed_index().await }.boxed()),
            ),
            self.load(
                QueryKey::from(["alt-season"]),
                indices,
                self.make_fetcher(|api| async move { api.alt_season_index().await }.boxed()),
            ),
        );

        MarketOverview {
            stats,
            fear_greed,
            alt_season,
        }
    }

    /// One page of the coin table, without admin-hidden coins
    pub async fn coin_table(&self, page: u32, per_page: u32) -> Loadable<Vec<CoinRow>> {
        let (key, options, fetch) = self.coins_query(page, per_page);
        let coins = self.load(key, options, fetch).await;
        let hidden = self.hidden_coin_ids().await;

        coins.map(|coins| {
            coins
                .iter()
                .filter(|coin| !hidden.contains(&coin.id))
                .map(CoinRow::from)
                .collect()
        })
    }

    async fn hidden_coin_ids(&self) -> std::collections::HashSet<String> {
        let Some(admin) = &self.visibility else {
            return Default::default();
        };
        match admin.hidden_coin_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "Hidden coin list unavailable, showing all coins");
                Default::default()
            }
        }
    }

    pub async fn coin_detail(&self, id: &str) -> Loadable<CoinDetail> {
        let coin_id = id.to_string();
        self.load(
            QueryKey::new(["coin", id]),
            QueryOptions::polling(refresh::COIN_DETAIL),
            self.make_fetcher(move |api| {
                let coin_id = coin_id.clone();
                async move { api.coin(&coin_id).await }.boxed()
            }),
        )
        .await
    }

    pub async fn history(&self, id: &str, days: u32, interval: HistoryInterval) -> Loadable<PriceHistory> {
        let coin_id = id.to_string();
        self.load(
            QueryKey::new([
                "history".to_string(),
                id.to_string(),
                days.to_string(),
                interval.as_str().to_string(),
            ]),
            QueryOptions::polling(refresh::HISTORY),
            self.make_fetcher(move |api| {
                let coin_id = coin_id.clone();
                async move { api.coin_history(&coin_id, days, interval).await }.boxed()
            }),
        )
        .await
    }

    /// Blank queries resolve to an empty result without touching the cache
    pub async fn search(&self, query: &str) -> Loadable<SearchResult> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return Loadable::Ready(SearchResult::default());
        }

        let search_term = query.clone();
        self.load(
            QueryKey::new(["search".to_string(), query.to_lowercase()]),
            QueryOptions::stale_for(refresh::SEARCH_STALE),
            self.make_fetcher(move |api| {
                let search_term = search_term.clone();
                async move { api.search(&search_term).await }.boxed()
            }),
        )
        .await
    }

    pub async fn market_hours(&self) -> Loadable<MarketHours> {
        let (key, options, fetch) = self.market_hours_query();
        self.load(key, options, fetch).await
    }

    /// Polls the coin table page until the watcher is dropped
    pub fn watch_coins(&self, page: u32, per_page: u32) -> QueryWatcher<Vec<Coin>> {
        let (key, options, fetch) = self.coins_query(page, per_page);
        self.cache.watch(key, options, fetch)
    }

    pub fn watch_global_stats(&self) -> QueryWatcher<MarketSnapshot> {
        let (key, options, fetch) = self.global_stats_query();
        self.cache.watch(key, options, fetch)
    }

    pub fn watch_market_hours(&self) -> QueryWatcher<MarketHours> {
        let (key, options, fetch) = self.market_hours_query();
        self.cache.watch(key, options, fetch)
    }

    /// Forces a refresh of everything the dashboard shows
    pub fn refresh_all(&self) -> usize {
        ["global-stats", "coins", "fear-greed", "alt-season", "market-hours"]
            .into_iter()
            .map(|prefix| self.cache.invalidate(&QueryKey::from([prefix])))
            .sum()
    }

    /// Health of the data layer based on request outcomes and cached data
    pub async fn health_check(&self) -> ComponentHealth {
        let mut details = HashMap::new();
        details.insert("cached_queries".to_string(), serde_json::json!(self.cache.len()));

        let stats = match &self.metrics {
            Some(metrics) => Some(metrics.stats().await),
            None => None,
        };

        let status = match &stats {
            Some(stats) => {
                details.insert("total_requests".to_string(), serde_json::json!(stats.total_requests));
                details.insert("failed_requests".to_string(), serde_json::json!(stats.failed_requests));
                details.insert("success_rate".to_string(), serde_json::json!(stats.success_rate));
                details.insert("latency_p50_ms".to_string(), serde_json::json!(stats.latency_p50_ms));
                details.insert("latency_p99_ms".to_string(), serde_json::json!(stats.latency_p99_ms));

                if stats.total_requests > 0 && stats.failed_requests == stats.total_requests {
                    HealthStatus::Unhealthy
                } else if stats.success_rate < 0.9 {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                }
            }
            None => HealthStatus::Healthy,
        };

        let message = match status {
            HealthStatus::Healthy => "Market data is being served".to_string(),
            HealthStatus::Degraded => "Some market data requests are failing".to_string(),
            HealthStatus::Unhealthy => "Backend is unreachable".to_string(),
        };

        ComponentHealth {
            name: "market_dashboard".to_string(),
            status,
            message: Some(message),
            details,
            last_checked: chrono::Utc::now(),
        }
    }
}
