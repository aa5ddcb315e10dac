//! Request metrics for the REST client
//!
//! Tracks a rolling latency window and lifetime success counts per client.

use crate::constants::METRICS_MAX_SAMPLES;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::RwLock;

/// Point-in-time view of the collected metrics
#[derive(Debug, Clone, PartialEq)]
pub struct RequestStats {
    /// 50th percentile latency of successful requests in milliseconds
    pub latency_p50_ms: f64,
    /// 99th percentile latency of successful requests in milliseconds
    pub latency_p99_ms: f64,
    /// Success rate (0.0 to 1.0)
    pub success_rate: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
}

impl RequestStats {
    /// Stats with no data
    pub fn empty() -> Self {
        Self {
            latency_p50_ms: 0.0,
            latency_p99_ms: 0.0,
            success_rate: 1.0,
            total_requests: 0,
            failed_requests: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct LatencySample {
    duration_ms: f64,
    success: bool,
}

#[derive(Debug, Default)]
struct MetricsState {
    samples: VecDeque<LatencySample>,
    total_requests: u64,
    failed_requests: u64,
}

/// Collects latency and outcome of every backend request
#[derive(Debug, Default)]
pub struct ApiMetrics {
    state: RwLock<MetricsState>,
}

impl ApiMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request with its duration and success status
    pub async fn record_request(&self, duration: Duration, success: bool) {
        let mut state = self.state.write().await;
        state.total_requests += 1;
        if !success {
            state.failed_requests += 1;
        }

        if state.samples.len() >= METRICS_MAX_SAMPLES {
            state.samples.pop_front();
        }
        state.samples.push_back(LatencySample {
            duration_ms: duration.as_secs_f64() * 1000.0,
            success,
        });
    }

    /// Computes current stats from the collected samples
    pub async fn stats(&self) -> RequestStats {
        let state = self.state.read().await;
        if state.samples.is_empty() {
            return RequestStats::empty();
        }

        let mut latencies: Vec<f64> = state
            .samples
            .iter()
            .filter(|s| s.success)
            .map(|s| s.duration_ms)
            .collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let success_rate = if state.total_requests > 0 {
            (state.total_requests - state.failed_requests) as f64 / state.total_requests as f64
        } else {
            1.0
        };

        RequestStats {
            latency_p50_ms: percentile(&latencies, 50.0),
            latency_p99_ms: percentile(&latencies, 99.0),
            success_rate,
            total_requests: state.total_requests,
            failed_requests: state.failed_requests,
        }
    }
}

/// Calculate percentile from sorted values
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let idx = (p / 100.0 * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[idx.min(sorted_values.len() - 1)]
}
