//! # Metrics & Observability Module
//!
//! Metrics untuk gateway, diekspor dalam Prometheus text format di
//! `GET /metrics`.
//!
//! ## Prinsip
//!
//! - Semua metrics thread-safe (atomic operations)
//! - Urutan output deterministik
//!
//! ## Metrics
//!
//! - `gateway_trigger_*`: lifecycle trigger request (masuk, error per code, quorum, reap)
//! - `gateway_node_*`: pesan dari node dan throttling
//! - `gateway_http_action_*`: outbound HTTP action
//! - `gateway_cache_*`: response cache
//! - `gateway_metadata_*`: push, pull, dan hasil sync metadata

use std::collections::BTreeMap;
use std::fmt::{Display, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

// ════════════════════════════════════════════════════════════════════════════
// COUNTER
// ════════════════════════════════════════════════════════════════════════════

/// Thread-safe counter menggunakan atomic operations.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// GAUGE
// ════════════════════════════════════════════════════════════════════════════

/// Gauge untuk nilai yang bisa naik turun.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// HISTOGRAM
// ════════════════════════════════════════════════════════════════════════════

const BUCKET_COUNT: usize = 10;

/// Histogram latency dalam milidetik.
///
/// Buckets: 5, 10, 25, 50, 100, 250, 500, 1000, 5000 ms, +Inf.
pub struct Histogram {
    buckets: [AtomicU64; BUCKET_COUNT],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub const BUCKET_BOUNDS: [u64; BUCKET_COUNT - 1] = [5, 10, 25, 50, 100, 250, 500, 1000, 5000];

    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value_ms: u64) {
        self.sum.fetch_add(value_ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| value_ms <= bound)
            .unwrap_or(BUCKET_COUNT - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Jumlah kumulatif sampai dan termasuk bucket `idx`.
    pub fn cumulative(&self, idx: usize) -> u64 {
        self.buckets[..=idx.min(BUCKET_COUNT - 1)]
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .sum()
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn write_prometheus(&self, out: &mut String, name: &str, help: &str) {
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for (i, bound) in Self::BUCKET_BOUNDS.iter().enumerate() {
            let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", name, bound, self.cumulative(i));
        }
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, self.cumulative(BUCKET_COUNT - 1));
        let _ = writeln!(out, "{}_sum {}", name, self.sum());
        let _ = writeln!(out, "{}_count {}", name, self.count());
        let _ = writeln!(out);
    }
}

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Histogram")
            .field("count", &self.count())
            .field("sum", &self.sum())
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// LABELED COUNTERS
// ════════════════════════════════════════════════════════════════════════════

/// Counter per label (JSON-RPC code, method).
#[derive(Debug)]
pub struct LabeledCounters<K: Ord> {
    counters: RwLock<BTreeMap<K, Counter>>,
}

impl<K: Ord> Default for LabeledCounters<K> {
    fn default() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K: Ord + Clone + Display> LabeledCounters<K> {
    pub fn inc(&self, label: &K) {
        {
            let counters = self.counters.read();
            if let Some(c) = counters.get(label) {
                c.inc();
                return;
            }
        }
        self.counters.write().entry(label.clone()).or_default().inc();
    }

    pub fn get(&self, label: &K) -> u64 {
        self.counters.read().get(label).map(Counter::get).unwrap_or(0)
    }

    fn write_prometheus(&self, out: &mut String, name: &str, label: &str, help: &str) {
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} counter", name);
        for (k, v) in self.counters.read().iter() {
            let _ = writeln!(out, "{}{{{}=\"{}\"}} {}", name, label, k, v.get());
        }
        let _ = writeln!(out);
    }
}

// ════════════════════════════════════════════════════════════════════════════
// GATEWAY METRICS
// ════════════════════════════════════════════════════════════════════════════

/// Semua metrics gateway.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub trigger_requests: Counter,
    pub trigger_errors: LabeledCounters<i64>,
    pub trigger_quorum_reached: Counter,
    pub trigger_latency: Histogram,
    pub callbacks_pending: Gauge,
    pub callbacks_reaped: Counter,
    pub workflow_throttled: Counter,
    pub replay_rejected: Counter,

    pub node_messages: LabeledCounters<String>,
    pub node_throttled_sender: Counter,
    pub node_throttled_global: Counter,
    pub node_unknown_sender: Counter,

    pub http_actions: Counter,
    pub http_action_failures: Counter,
    pub http_action_latency: Histogram,

    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub cache_stores: Counter,
    pub cache_evictions: Counter,

    pub metadata_pushes: Counter,
    pub metadata_pull_responses: Counter,
    pub metadata_pulls_sent: Counter,
    pub metadata_pull_errors: Counter,
    pub metadata_workflows: Gauge,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export dalam Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::with_capacity(4096);

        let counters: [(&str, &str, &Counter); 18] = [
            ("gateway_trigger_requests_total", "Trigger requests received", &self.trigger_requests),
            ("gateway_trigger_quorum_reached_total", "Trigger requests resolved by quorum", &self.trigger_quorum_reached),
            ("gateway_callbacks_reaped_total", "In-flight callbacks removed after expiry", &self.callbacks_reaped),
            ("gateway_workflow_throttled_total", "Trigger requests rejected by the workflow rate limiter", &self.workflow_throttled),
            ("gateway_replay_rejected_total", "Trigger requests rejected as token replays", &self.replay_rejected),
            ("gateway_node_throttled_sender_total", "Node messages rejected by the per-sender limiter", &self.node_throttled_sender),
            ("gateway_node_throttled_global_total", "Node messages rejected by the global limiter", &self.node_throttled_global),
            ("gateway_node_unknown_sender_total", "Node messages from addresses outside the DON", &self.node_unknown_sender),
            ("gateway_http_actions_total", "Outbound HTTP actions scheduled", &self.http_actions),
            ("gateway_http_action_failures_total", "Outbound HTTP actions that returned an error", &self.http_action_failures),
            ("gateway_cache_hits_total", "Response cache hits", &self.cache_hits),
            ("gateway_cache_misses_total", "Response cache misses", &self.cache_misses),
            ("gateway_cache_stores_total", "Responses stored in the cache", &self.cache_stores),
            ("gateway_cache_evictions_total", "Expired cache entries removed", &self.cache_evictions),
            ("gateway_metadata_pushes_total", "Metadata push messages accepted", &self.metadata_pushes),
            ("gateway_metadata_pull_responses_total", "Metadata pull responses accepted", &self.metadata_pull_responses),
            ("gateway_metadata_pulls_sent_total", "Metadata pull requests sent to nodes", &self.metadata_pulls_sent),
            ("gateway_metadata_pull_errors_total", "Metadata pull requests that failed to send", &self.metadata_pull_errors),
        ];
        for (name, help, c) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, c.get());
            let _ = writeln!(out);
        }

        let gauges: [(&str, &str, &Gauge); 2] = [
            ("gateway_callbacks_pending", "Trigger requests awaiting quorum", &self.callbacks_pending),
            ("gateway_metadata_workflows", "Workflows known after the last metadata sync", &self.metadata_workflows),
        ];
        for (name, help, g) in gauges {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} gauge", name);
            let _ = writeln!(out, "{} {}", name, g.get());
            let _ = writeln!(out);
        }

        self.trigger_errors.write_prometheus(
            &mut out,
            "gateway_trigger_errors_total",
            "code",
            "Trigger requests answered with a JSON-RPC error",
        );
        self.node_messages.write_prometheus(
            &mut out,
            "gateway_node_messages_total",
            "method",
            "Node messages handled per method",
        );
        self.trigger_latency.write_prometheus(
            &mut out,
            "gateway_trigger_latency_ms",
            "Latency from trigger receipt to quorum",
        );
        self.http_action_latency.write_prometheus(
            &mut out,
            "gateway_http_action_latency_ms",
            "Latency of outbound HTTP actions",
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counter_concurrent_increments() {
        let c = Arc::new(Counter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        c.inc();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.get(), 4000);
    }

    #[test]
    fn test_histogram_buckets_cumulative() {
        let h = Histogram::new();
        h.observe(3);
        h.observe(40);
        h.observe(100_000);
        assert_eq!(h.cumulative(0), 1);
        assert_eq!(h.cumulative(3), 2);
        assert_eq!(h.cumulative(BUCKET_COUNT - 1), 3);
        assert_eq!(h.count(), 3);
        assert_eq!(h.sum(), 100_043);
    }

    #[test]
    fn test_labeled_counters() {
        let l: LabeledCounters<i64> = LabeledCounters::default();
        l.inc(&-32009);
        l.inc(&-32009);
        l.inc(&-32600);
        assert_eq!(l.get(&-32009), 2);
        assert_eq!(l.get(&-32600), 1);
        assert_eq!(l.get(&-1), 0);
    }

    #[test]
    fn test_prometheus_output() {
        let m = GatewayMetrics::new();
        m.trigger_requests.inc();
        m.trigger_errors.inc(&-32005);
        m.node_messages.inc(&"http_action".to_string());
        m.trigger_latency.observe(12);
        let text = m.to_prometheus();
        assert!(text.contains("gateway_trigger_requests_total 1"));
        assert!(text.contains("gateway_trigger_errors_total{code=\"-32005\"} 1"));
        assert!(text.contains("gateway_node_messages_total{method=\"http_action\"} 1"));
        assert!(text.contains("gateway_trigger_latency_ms_bucket{le=\"25\"} 1"));
        assert!(text.contains("# TYPE gateway_callbacks_pending gauge"));
    }
}
