//! Decision metrics with Prometheus text export
//!
//! Counters are plain atomics bumped on the decision path. Latencies go into a
//! bounded sample window and percentiles are only computed when a snapshot is
//! taken.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Latency samples kept for percentile estimates
const LATENCY_WINDOW: usize = 4_096;

/// Point-in-time view of the decision counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineMetrics {
    /// Permission checks answered, cached or not
    pub total_requests: u64,
    pub allowed_decisions: u64,
    pub denied_decisions: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,

    /// Threshold breaches reported by the anomaly detector
    pub anomalies_detected: u64,

    /// Percentiles over the most recent samples
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,
    pub avg_latency_ms: f64,

    /// Checks that failed with a storage error
    pub error_count: u64,
}

impl EngineMetrics {
    pub fn cache_hit_rate(&self) -> f64 {
        ratio(self.cache_hits, self.cache_hits + self.cache_misses)
    }

    /// Share of decisions that granted access
    pub fn allow_rate(&self) -> f64 {
        ratio(
            self.allowed_decisions,
            self.allowed_decisions + self.denied_decisions,
        )
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    match whole {
        0 => 0.0,
        _ => part as f64 / whole as f64,
    }
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    anomalies: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn all(&self) -> [&AtomicU64; 7] {
        [
            &self.requests,
            &self.allowed,
            &self.denied,
            &self.cache_hits,
            &self.cache_misses,
            &self.anomalies,
            &self.errors,
        ]
    }
}

/// Collects decision counters and latency samples for one engine
pub struct MetricsCollector {
    counters: Counters,
    latencies: Mutex<VecDeque<f64>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }

    pub fn record_cache_hit(&self) {
        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one answered check
    pub fn record_decision(&self, allowed: bool) {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let outcome = if allowed {
            &self.counters.allowed
        } else {
            &self.counters.denied
        };
        outcome.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_anomaly(&self) {
        self.counters.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Add a latency sample, dropping the oldest once the window is full
    pub async fn record_latency(&self, latency: Duration) {
        let mut window = self.latencies.lock().await;
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency.as_secs_f64() * 1_000.0);
    }

    /// Snapshot counters and compute latency percentiles
    pub async fn get_metrics(&self) -> EngineMetrics {
        let mut sorted: Vec<f64> = self.latencies.lock().await.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let avg_latency_ms = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };

        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        EngineMetrics {
            total_requests: load(&self.counters.requests),
            allowed_decisions: load(&self.counters.allowed),
            denied_decisions: load(&self.counters.denied),
            cache_hits: load(&self.counters.cache_hits),
            cache_misses: load(&self.counters.cache_misses),
            anomalies_detected: load(&self.counters.anomalies),
            latency_p50_ms: quantile(&sorted, 0.50),
            latency_p90_ms: quantile(&sorted, 0.90),
            latency_p99_ms: quantile(&sorted, 0.99),
            avg_latency_ms,
            error_count: load(&self.counters.errors),
        }
    }

    pub async fn reset(&self) {
        for counter in self.counters.all() {
            counter.store(0, Ordering::Relaxed);
        }
        self.latencies.lock().await.clear();
    }

    /// Render the Prometheus text exposition format
    pub async fn export_prometheus(&self) -> String {
        let m = self.get_metrics().await;
        let mut out = String::new();

        let counters = [
            ("rbac_checks_total", "Total number of permission checks", m.total_requests),
            ("rbac_allowed_total", "Number of granted decisions", m.allowed_decisions),
            ("rbac_denied_total", "Number of denied decisions", m.denied_decisions),
            ("rbac_cache_hits_total", "Decision cache hits", m.cache_hits),
            ("rbac_cache_misses_total", "Decision cache misses", m.cache_misses),
            ("rbac_anomalies_total", "Users flagged for repeated denials", m.anomalies_detected),
            ("rbac_errors_total", "Checks that failed with an error", m.error_count),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {value}\n");
        }

        let _ = writeln!(
            out,
            "# HELP rbac_check_latency_seconds Permission check latency percentiles"
        );
        let _ = writeln!(out, "# TYPE rbac_check_latency_seconds summary");
        for (q, ms) in [
            ("0.5", m.latency_p50_ms),
            ("0.9", m.latency_p90_ms),
            ("0.99", m.latency_p99_ms),
        ] {
            let _ = writeln!(
                out,
                "rbac_check_latency_seconds{{quantile=\"{q}\"}} {}",
                ms / 1_000.0
            );
        }
        out
    }
}

/// Nearest-rank quantile over an ascending slice
fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n => sorted[((n as f64 * q) as usize).min(n - 1)],
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
