//! Fire-and-forget user activity telemetry
//!
//! Page, coin and chart views are turned into [`ActivityEvent`]s, deduplicated
//! for a short window, and posted in the background. Delivery failures are
//! logged and dropped.

use crate::{
    api::TrackingApi,
    constants::ANONYMOUS_USER,
    dedup::Deduplicator,
    types::{ActivityEvent, ActivityKind},
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Number of events emitted per kind since the counters were last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityCounts {
    pub page_views: u64,
    pub coin_views: u64,
    pub chart_views: u64,
}

#[derive(Debug, Default)]
struct Counters {
    page_views: AtomicU64,
    coin_views: AtomicU64,
    chart_views: AtomicU64,
}

impl Counters {
    fn record(&self, kind: ActivityKind) {
        let counter = match kind {
            ActivityKind::PageView => &self.page_views,
            ActivityKind::CoinView => &self.coin_views,
            ActivityKind::ChartView => &self.chart_views,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ActivityCounts {
        ActivityCounts {
            page_views: self.page_views.load(Ordering::Relaxed),
            coin_views: self.coin_views.load(Ordering::Relaxed),
            chart_views: self.chart_views.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.page_views.store(0, Ordering::Relaxed);
        self.coin_views.store(0, Ordering::Relaxed);
        self.chart_views.store(0, Ordering::Relaxed);
    }
}

/// Records user interactions and ships them to the tracking endpoints
pub struct ActivityTracker {
    api: Arc<dyn TrackingApi>,
    dedup: Deduplicator,
    user_id: RwLock<Option<String>>,
    session_id: RwLock<Option<Uuid>>,
    counters: Counters,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl ActivityTracker {
    pub fn new(api: Arc<dyn TrackingApi>) -> Self {
        Self::with_deduplicator(api, Deduplicator::default())
    }

    pub fn with_deduplicator(api: Arc<dyn TrackingApi>, dedup: Deduplicator) -> Self {
        Self {
            api,
            dedup,
            user_id: RwLock::new(None),
            session_id: RwLock::new(None),
            counters: Counters::default(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Sets the user events are attributed to; `None` means anonymous
    pub fn set_user(&self, user_id: Option<String>) {
        *self.user_id.write().unwrap_or_else(|e| e.into_inner()) = user_id;
    }

    pub fn user_id(&self) -> String {
        self.user_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| ANONYMOUS_USER.to_string())
    }

    pub fn set_session(&self, session_id: Option<Uuid>) {
        *self.session_id.write().unwrap_or_else(|e| e.into_inner()) = session_id;
    }

    pub fn session_id(&self) -> Option<Uuid> {
        *self.session_id.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn counts(&self) -> ActivityCounts {
        self.counters.snapshot()
    }

    pub fn reset_counts(&self) {
        self.counters.reset();
    }

    /// Returns true if the event was dispatched, false if suppressed
    pub fn track_page_view(&self, path: &str) -> bool {
        let event = self.event(ActivityKind::PageView).with_target(path);
        self.emit_deduplicated(event)
    }

    pub fn track_coin_view(&self, coin_id: &str) -> bool {
        let event = self.event(ActivityKind::CoinView).with_target(coin_id);
        self.emit_deduplicated(event)
    }

    pub fn track_chart_view(&self, coin_id: &str, timeframe: &str) -> bool {
        let event = self
            .event(ActivityKind::ChartView)
            .with_target(coin_id)
            .with_metadata("timeframe", json!(timeframe));
        self.emit_deduplicated(event)
    }

    /// Builds an event for the current user and session
    pub fn event(&self, kind: ActivityKind) -> ActivityEvent {
        ActivityEvent::new(kind, self.user_id(), self.session_id())
    }

    /// Emits unless an event with the same key was emitted within the window
    ///
    /// The key is `<kind>:<user>:<target>:<session>`. Chart views also
    /// include the timeframe.
    pub fn emit_deduplicated(&self, event: ActivityEvent) -> bool {
        let key = dedup_key(&event);
        if !self.dedup.check_and_register(&key) {
            return false;
        }
        self.emit(event)
    }

    /// Dispatches the event in the background without deduplication
    pub fn emit(&self, event: ActivityEvent) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(event = %event, "No async runtime, dropping activity event");
            return false;
        };

        self.counters.record(event.kind);

        let api = self.api.clone();
        let handle = runtime.spawn(async move {
            match api.track(&event).await {
                Ok(()) => tracing::debug!(event = %event, "Activity event sent"),
                Err(e) => tracing::warn!(event = %event, error = %e, "Failed to send activity event"),
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
        true
    }

    /// Waits for every dispatched event to be delivered or dropped
    pub async fn flush(&self) {
        let handles: Vec<_> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Activity task did not complete");
            }
        }
    }
}

fn dedup_key(event: &ActivityEvent) -> String {
    let session = event
        .session_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "none".to_string());
    let target = event.target.as_deref().unwrap_or("");
    let mut key = format!(
        "{}:{}:{}:{}",
        event.kind.endpoint(),
        event.user_id,
        target,
        session
    );
    if let Some(timeframe) = event.metadata.get("timeframe").and_then(|v| v.as_str()) {
        key.push(':');
        key.push_str(timeframe);
    }
    key
}
