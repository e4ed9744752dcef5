//! Metrics for the node and proxy tiers.
//!
//! Counters are monotonic for the lifetime of the process; snapshots are
//! plain structs so they can travel over the wire or into logs.

mod counters;

pub use counters::{Counter, LabeledCounter};

use std::time::Instant;

/// Request counters kept by a storage node.
#[derive(Debug)]
pub struct NodeMetrics {
    /// get/set/delete requests served.
    pub requests_total: Counter,
    /// Gets that found a live entry.
    pub hits: Counter,
    /// Gets that found nothing or an expired entry.
    pub misses: Counter,
    started_at: Instant,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Counter::new("node_requests_total"),
            hits: Counter::new("node_cache_hits"),
            misses: Counter::new("node_cache_misses"),
            started_at: Instant::now(),
        }
    }

    /// Record a get and whether it hit.
    pub fn record_get(&self, hit: bool) {
        self.requests_total.inc();
        if hit {
            self.hits.inc();
        } else {
            self.misses.inc();
        }
    }

    /// Seconds since the metrics were created.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Request counters kept by the proxy.
#[derive(Debug)]
pub struct ProxyMetrics {
    /// Requests per namespace and operation. Removed namespaces lose their series.
    pub requests: LabeledCounter<2>,
    /// Requests rejected for an unknown api key.
    pub auth_failures: Counter,
    /// Requests rejected by a namespace rate limit.
    pub rate_limited: Counter,
    /// Node calls that failed, per node. Nodes that leave the ring lose their series.
    pub node_errors: LabeledCounter<1>,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self {
            requests: LabeledCounter::new("proxy_requests_total", ["namespace", "op"]),
            auth_failures: Counter::new("proxy_auth_failures_total"),
            rate_limited: Counter::new("proxy_rate_limited_total"),
            node_errors: LabeledCounter::new("proxy_node_errors_total", ["node"]),
        }
    }

    pub fn snapshot(&self) -> ProxyMetricsSnapshot {
        ProxyMetricsSnapshot {
            requests_total: self.requests.total(),
            auth_failures: self.auth_failures.get(),
            rate_limited: self.rate_limited.get(),
            node_errors: self.node_errors.total(),
        }
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time totals of [`ProxyMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyMetricsSnapshot {
    pub requests_total: u64,
    pub auth_failures: u64,
    pub rate_limited: u64,
    pub node_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_metrics_record_get() {
        let metrics = NodeMetrics::new();
        metrics.record_get(true);
        metrics.record_get(false);
        metrics.record_get(false);

        assert_eq!(metrics.requests_total.get(), 3);
        assert_eq!(metrics.hits.get(), 1);
        assert_eq!(metrics.misses.get(), 2);
    }

    #[test]
    fn test_proxy_snapshot_sums_labels() {
        let metrics = ProxyMetrics::new();
        metrics.requests.inc(["a", "get"]);
        metrics.requests.inc(["b", "set"]);
        metrics.node_errors.inc(["n0"]);
        metrics.auth_failures.inc();

        let snap = metrics.snapshot();
        assert_eq!(snap.requests_total, 2);
        assert_eq!(snap.node_errors, 1);
        assert_eq!(snap.auth_failures, 1);
        assert_eq!(snap.rate_limited, 0);
    }
}
