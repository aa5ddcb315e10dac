//! Types for the market dashboard data layer

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Global market aggregate figures
///
/// Read-only; replaced wholesale on each fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub total_market_cap: f64,
    pub total_volume: f64,
    #[serde(default)]
    pub market_cap_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub btc_dominance: Option<f64>,
    #[serde(default)]
    pub eth_dominance: Option<f64>,
    #[serde(default)]
    pub active_cryptocurrencies: Option<u32>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A coin row as returned by the coin list endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coin {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub high_24h: Option<f64>,
    #[serde(default)]
    pub low_24h: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub circulating_supply: Option<f64>,
}

/// Market figures nested in a coin detail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoinMarketData {
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_7d: Option<f64>,
    #[serde(default)]
    pub ath: Option<f64>,
    #[serde(default)]
    pub atl: Option<f64>,
    #[serde(default)]
    pub circulating_supply: Option<f64>,
    #[serde(default)]
    pub max_supply: Option<f64>,
}

/// Full coin detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinDetail {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub market_data: CoinMarketData,
}

/// Price history series; each entry is `[unix_millis, value]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
    #[serde(default)]
    pub prices: Vec<(i64, f64)>,
    #[serde(default)]
    pub market_caps: Vec<(i64, f64)>,
    #[serde(default)]
    pub total_volumes: Vec<(i64, f64)>,
}

/// A single chart point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl PriceHistory {
    /// Converts the raw price series into chart points, skipping invalid timestamps
    pub fn points(&self) -> Vec<PricePoint> {
        self.prices
            .iter()
            .filter_map(|(ms, value)| {
                Utc.timestamp_millis_opt(*ms).single().map(|timestamp| PricePoint {
                    timestamp,
                    value: *value,
                })
            })
            .collect()
    }

    /// Percentage change between the first and last price of the series
    pub fn change_percentage(&self) -> Option<f64> {
        let (_, first) = self.prices.first()?;
        let (_, last) = self.prices.last()?;
        if *first == 0.0 {
            return None;
        }
        Some((last - first) / first * 100.0)
    }
}

/// Chart range granularity accepted by the history endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryInterval {
    Minutely,
    Hourly,
    Daily,
}

impl HistoryInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryInterval::Minutely => "minutely",
            HistoryInterval::Hourly => "hourly",
            HistoryInterval::Daily => "daily",
        }
    }
}

/// Coin hit in a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCoin {
    pub id: String,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    #[serde(default)]
    pub thumb: Option<String>,
}

/// Search endpoint response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub coins: Vec<SearchCoin>,
}

/// Alt season index (0-100)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AltSeasonIndex {
    pub value: u8,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Which side of the market is outperforming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AltSeason {
    BitcoinSeason,
    Neutral,
    AltcoinSeason,
}

impl AltSeasonIndex {
    /// 75 and above is altcoin season, 25 and below is bitcoin season
    pub fn season(&self) -> AltSeason {
        match self.value {
            75..=u8::MAX => AltSeason::AltcoinSeason,
            0..=25 => AltSeason::BitcoinSeason,
            _ => AltSeason::Neutral,
        }
    }
}

/// Fear & greed index (0-100)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FearGreedIndex {
    pub value: u8,
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Sentiment band of the fear & greed index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FearGreedClass {
    ExtremeFear,
    Fear,
    Neutral,
    Greed,
    ExtremeGreed,
}

impl FearGreedClass {
    pub fn from_value(value: u8) -> Self {
        match value {
            0..=24 => FearGreedClass::ExtremeFear,
            25..=44 => FearGreedClass::Fear,
            45..=55 => FearGreedClass::Neutral,
            56..=75 => FearGreedClass::Greed,
            _ => FearGreedClass::ExtremeGreed,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FearGreedClass::ExtremeFear => "Extreme Fear",
            FearGreedClass::Fear => "Fear",
            FearGreedClass::Neutral => "Neutral",
            FearGreedClass::Greed => "Greed",
            FearGreedClass::ExtremeGreed => "Extreme Greed",
        }
    }
}

impl FearGreedIndex {
    /// Band derived from the value; the backend label is informational only
    pub fn class(&self) -> FearGreedClass {
        FearGreedClass::from_value(self.value)
    }
}

/// Trading session of a traditional market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSession {
    pub name: String,
    #[serde(default)]
    pub timezone: Option<String>,
    pub is_open: bool,
    #[serde(default)]
    pub opens_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closes_at: Option<DateTime<Utc>>,
}

/// Market hours endpoint response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketHours {
    #[serde(default)]
    pub markets: Vec<MarketSession>,
}

impl MarketHours {
    pub fn open_markets(&self) -> impl Iterator<Item = &MarketSession> {
        self.markets.iter().filter(|m| m.is_open)
    }
}

/// Kind of telemetry event; each maps to one tracking endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityKind {
    Login,
    Logout,
    PageView,
    CoinView,
    ChartView,
    SessionStart,
    SessionEnd,
}

impl ActivityKind {
    /// Path segment under `/api/track/`
    pub fn endpoint(&self) -> &'static str {
        match self {
            ActivityKind::Login => "login",
            ActivityKind::Logout => "logout",
            ActivityKind::PageView => "page-view",
            ActivityKind::CoinView => "coin-view",
            ActivityKind::ChartView => "chart-view",
            ActivityKind::SessionStart => "session-start",
            ActivityKind::SessionEnd => "session-end",
        }
    }
}

/// Immutable record of a user action, sent once to the tracking endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: Uuid,
    pub kind: ActivityKind,
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    /// Creates a new event stamped now
    pub fn new(kind: ActivityKind, user_id: impl Into<String>, session_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            user_id: user_id.into(),
            session_id,
            target: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

impl std::fmt::Display for ActivityEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{} by {} on {}", self.kind.endpoint(), self.user_id, target),
            None => write!(f, "{} by {}", self.kind.endpoint(), self.user_id),
        }
    }
}

/// Browsing session with aggregated activity counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub page_views: u64,
    #[serde(default)]
    pub coin_views: u64,
    #[serde(default)]
    pub chart_views: u64,
}

impl Session {
    pub fn start(user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            started_at: Utc::now(),
            ended_at: None,
            page_views: 0,
            coin_views: 0,
            chart_views: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Session length; open sessions are measured up to now
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at.unwrap_or_else(Utc::now) - self.started_at
    }
}

/// Signed-in identity as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            display_name: None,
            photo_url: None,
            is_admin: false,
        }
    }
}

/// Stored user profile with a free-form preference bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub preferences: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub disabled: bool,
}

impl UserProfile {
    /// Builds the profile created on first sign-in
    pub fn from_auth_user(user: &AuthUser) -> Self {
        let now = Utc::now();
        Self {
            uid: user.uid.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            photo_url: user.photo_url.clone(),
            created_at: now,
            last_login: Some(now),
            preferences: HashMap::new(),
            is_admin: user.is_admin,
            disabled: false,
        }
    }
}

/// Direct field update of a profile; unset fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub preferences: HashMap<String, serde_json::Value>,
}

impl ProfilePatch {
    /// Applies the patch locally
    pub fn apply(&self, profile: &mut UserProfile) {
        if let Some(name) = &self.display_name {
            profile.display_name = Some(name.clone());
        }
        if let Some(photo) = &self.photo_url {
            profile.photo_url = Some(photo.clone());
        }
        if let Some(at) = self.last_login {
            profile.last_login = Some(at);
        }
        for (key, value) in &self.preferences {
            profile.preferences.insert(key.clone(), value.clone());
        }
    }
}

/// Coin hidden from public listings by an admin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenCoin {
    pub coin_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub hidden_by: Option<String>,
    #[serde(default)]
    pub hidden_at: Option<DateTime<Utc>>,
}

/// Query for the admin activity log
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ActivityKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Overall system health status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// All components are operational
    Healthy,
    /// Degraded but still functional
    Degraded,
    /// Requires attention
    Unhealthy,
}

/// Component health information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub details: HashMap<String, serde_json::Value>,
    pub last_checked: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fear_greed_bands() {
        assert_eq!(FearGreedClass::from_value(10), FearGreedClass::ExtremeFear);
        assert_eq!(FearGreedClass::from_value(44), FearGreedClass::Fear);
        assert_eq!(FearGreedClass::from_value(50), FearGreedClass::Neutral);
        assert_eq!(FearGreedClass::from_value(75), FearGreedClass::Greed);
        assert_eq!(FearGreedClass::from_value(76).label(), "Extreme Greed");
    }

    #[test]
    fn test_alt_season_thresholds() {
        let index = |value| AltSeasonIndex {
            value,
            updated_at: None,
        };
        assert_eq!(index(80).season(), AltSeason::AltcoinSeason);
        assert_eq!(index(25).season(), AltSeason::BitcoinSeason);
        assert_eq!(index(50).season(), AltSeason::Neutral);
    }

    #[test]
    fn test_history_points_and_change() {
        let history: PriceHistory = serde_json::from_value(serde_json::json!({
            "prices": [[1700000000000i64, 100.0], [1700003600000i64, 110.0]]
        }))
        .unwrap();

        let points = history.points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].value, 110.0);
        let change = history.change_percentage().unwrap();
        assert!((change - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_coin_tolerates_null_fields() {
        let coin: Coin = serde_json::from_value(serde_json::json!({
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "current_price": null,
            "market_cap_rank": 1
        }))
        .unwrap();
        assert_eq!(coin.current_price, None);
        assert_eq!(coin.market_cap_rank, Some(1));
    }

    #[test]
    fn test_activity_event_wire_format() {
        let event = ActivityEvent::new(ActivityKind::CoinView, "user-1", None).with_target("eth");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "coin-view");
        assert_eq!(value["userId"], "user-1");
        assert_eq!(value["target"], "eth");
        assert_eq!(event.to_string(), "coin-view by user-1 on eth");
    }
}
