//! # Market Dashboard SDK
//!
//! Client-side data layer for a cryptocurrency market dashboard: a REST
//! client for the dashboard backend, a keyed query cache with polling,
//! auth session tracking and deduplicated activity telemetry.
//!
//! ## Usage
//!
//! ```no_run
//! use market_dashboard_sdk::{
//!     ActivityTracker, AuthEvent, AuthSessionTracker, ClientConfig, Deduplicator,
//!     FileSnapshotStore, MarketDashboard, QueryCache, RestClient,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env();
//! let client = Arc::new(RestClient::new(&config)?);
//! let cache = QueryCache::new();
//!
//! let activity = Arc::new(ActivityTracker::with_deduplicator(
//!     client.clone(),
//!     Deduplicator::new(config.dedup_window),
//! ));
//! let session = AuthSessionTracker::new(
//!     Arc::new(FileSnapshotStore::new(&config.snapshot_path)),
//!     activity.clone(),
//!     cache.clone(),
//! );
//!
//! // Feed identity provider events in; reload when a new identity appears
//! let transition = session.observe(AuthEvent::SignedOut).await;
//! if transition.requires_reload() {
//!     // rebuild views
//! }
//!
//! let dashboard = MarketDashboard::new(client.clone(), cache).with_metrics(client.metrics());
//! let table = dashboard.coin_table(1, 100).await;
//! println!("{} coins", table.display_with(|rows| rows.len().to_string()));
//! activity.track_page_view("/");
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod admin;
pub mod api;
pub mod config;
pub mod constants;
pub mod dashboard;
pub mod dedup;
pub mod error;
pub mod metrics;
pub mod query;
pub mod rest;
pub mod session;
pub mod types;
pub mod user;

// Re-export commonly used types
pub use activity::{ActivityCounts, ActivityTracker};
pub use admin::AdminService;
pub use api::{AdminApi, MarketDataApi, TrackingApi, UserDataApi};
pub use config::ClientConfig;
pub use dashboard::{CoinRow, Loadable, MarketDashboard, MarketOverview};
pub use dedup::Deduplicator;
pub use error::{AdminError, ApiError, AuthError, QueryError, SnapshotError};
pub use metrics::{ApiMetrics, RequestStats};
pub use query::{fetcher, QueryCache, QueryKey, QueryOptions, QueryState, QueryWatcher};
pub use rest::RestClient;
pub use session::{
    AuthEvent, AuthSessionTracker, AuthTransition, FileSnapshotStore, MemorySnapshotStore,
    SnapshotStore,
};
pub use types::{
    ActivityEvent, ActivityKind, AuthUser, Coin, ComponentHealth, HealthStatus, MarketSnapshot,
    Session, UserProfile,
};
pub use user::{ProfileService, SyncStatus, Watchlist, WatchlistStore};
