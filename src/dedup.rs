//! Time-windowed suppression of repeated telemetry keys

use crate::constants::DEDUP_WINDOW_SECS;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Remembers recently emitted event keys and suppresses repeats
///
/// A key is registered with an expiry of `now + window`. While it has not
/// expired, `check_and_register` on the same key returns false. The check and
/// the registration happen under one lock, so two racing triggers of the same
/// key yield exactly one emission.
#[derive(Debug)]
pub struct Deduplicator {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEDUP_WINDOW_SECS))
    }
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns true if the key should be emitted, registering it for the window
    pub fn check_and_register(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.lock();

        seen.retain(|_, expires_at| *expires_at > now);

        if seen.contains_key(key) {
            tracing::debug!(key = key, "Suppressing duplicate event");
            return false;
        }

        seen.insert(key.to_string(), now + self.window);
        true
    }

    /// Returns true if the key is currently suppressed
    pub fn is_suppressed(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .get(key)
            .is_some_and(|expires_at| *expires_at > now)
    }

    /// Drops a key so that the next trigger emits again
    pub fn forget(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Evicts expired keys and returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut seen = self.lock();
        let before = seen.len();
        seen.retain(|_, expires_at| *expires_at > now);
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        // A poisoned map only holds expiry times; keep using it.
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_repeat_within_window_is_suppressed() {
        let dedup = Deduplicator::default();

        assert!(dedup.check_and_register("coin-view:u1:btc:s1"));
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!dedup.check_and_register("coin-view:u1:btc:s1"));
        assert!(dedup.check_and_register("coin-view:u1:eth:s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_emits_again_after_window() {
        let dedup = Deduplicator::default();

        assert!(dedup.check_and_register("page-view:u1:/:s1"));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(dedup.check_and_register("page-view:u1:/:s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppressed_repeat_does_not_extend_window() {
        let dedup = Deduplicator::new(Duration::from_secs(5));

        assert!(dedup.check_and_register("k"));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!dedup.check_and_register("k"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(dedup.check_and_register("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let dedup = Deduplicator::new(Duration::from_secs(5));
        dedup.check_and_register("a");
        tokio::time::advance(Duration::from_secs(3)).await;
        dedup.check_and_register("b");
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(dedup.purge_expired(), 1);
        assert!(dedup.is_suppressed("b"));
        assert!(!dedup.is_suppressed("a"));
    }

    #[tokio::test]
    async fn test_concurrent_triggers_emit_once() {
        let dedup = Arc::new(Deduplicator::default());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let dedup = dedup.clone();
                tokio::spawn(async move { dedup.check_and_register("login:u1") })
            })
            .collect();

        let mut emitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                emitted += 1;
            }
        }
        assert_eq!(emitted, 1);
    }

    #[tokio::test]
    async fn test_forget() {
        let dedup = Deduplicator::default();
        assert!(dedup.check_and_register("k"));
        dedup.forget("k");
        assert!(dedup.check_and_register("k"));
        assert_eq!(dedup.len(), 1);
    }
}
