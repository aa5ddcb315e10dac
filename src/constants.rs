//! Constants for the market dashboard SDK
//!
//! Compile-time defaults for the REST client, the query cache presets and the
//! telemetry windows. Runtime overrides go through [`crate::config::ClientConfig`].

use std::time::Duration;

/// Default backend base URL (overridden by `DASHBOARD_API_URL`)
pub const DEFAULT_API_URL: &str = "http://localhost:3001";

/// HTTP request timeout (in seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// User agent for HTTP requests
pub const USER_AGENT: &str = "market-dashboard-sdk/0.1.0";

/// Name of the query parameter appended to every GET to bypass intermediate caches
pub const CACHE_BUST_PARAM: &str = "_t";

/// Window in which identical telemetry keys are suppressed (in seconds)
pub const DEDUP_WINDOW_SECS: u64 = 5;

/// Age after which a cached auth snapshot is ignored (in seconds)
pub const AUTH_SNAPSHOT_TTL_SECS: u64 = 5 * 60;

/// Default file name of the persisted auth snapshot
pub const AUTH_SNAPSHOT_FILE: &str = "auth_snapshot.json";

/// User id reported for events emitted while signed out
pub const ANONYMOUS_USER: &str = "anonymous";

/// Minimum accepted password length at sign-up
pub const MIN_PASSWORD_LEN: usize = 6;

/// Default page size of the coin table
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Refresh interval and staleness window for each kind of polled data
pub mod refresh {
    use super::Duration;

    /// Market hours clock (open/closed sessions)
    pub const MARKET_HOURS: Duration = Duration::from_secs(1);

    /// Coin table prices
    pub const COINS: Duration = Duration::from_secs(30);

    /// Single coin detail
    pub const COIN_DETAIL: Duration = Duration::from_secs(30);

    /// Global market snapshot
    pub const GLOBAL_STATS: Duration = Duration::from_secs(60);

    /// Fear & greed / alt season indices
    pub const INDICES: Duration = Duration::from_secs(5 * 60);

    /// Price history charts
    pub const HISTORY: Duration = Duration::from_secs(5 * 60);

    /// Search results are never polled, only kept fresh for a short while
    pub const SEARCH_STALE: Duration = Duration::from_secs(60);

    /// Admin moderation tables
    pub const ADMIN: Duration = Duration::from_secs(30);
}

/// Maximum number of latency samples kept by the API metrics window
pub const METRICS_MAX_SAMPLES: usize = 100;
