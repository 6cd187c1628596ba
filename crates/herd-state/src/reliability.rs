//! Per-node reliability tracking
//!
//! Every terminated attempt lands here, success or failure, whether or not
//! failover eventually saved the request. Counters are monotonic; the
//! latency and outcome rings are bounded and replace their oldest entry on
//! overflow. Within one node, updates are ordered by completion time (the
//! per-entry shard lock serializes them).

use dashmap::DashMap;
use herd_core::{FailureKind, NodeId};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Read-only view of one node's reliability state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReliabilityStats {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,

    /// `successes / total`, defined as 1.0 for a node with no history
    pub success_rate: f64,

    /// Mean over the latency ring, in milliseconds
    pub latency_mean_ms: f64,

    /// Population variance over the latency ring, in ms²
    pub latency_variance: f64,

    /// Failure ratio over the outcome ring (recent completed attempts)
    pub recent_failure_ratio: f64,

    /// Number of latency samples currently in the ring
    pub samples: usize,
}

impl ReliabilityStats {
    fn fresh() -> Self {
        Self {
            total: 0,
            successes: 0,
            failures: 0,
            timeouts: 0,
            success_rate: 1.0,
            latency_mean_ms: 0.0,
            latency_variance: 0.0,
            recent_failure_ratio: 0.0,
            samples: 0,
        }
    }
}

#[derive(Debug)]
struct NodeHistory {
    total: u64,
    successes: u64,
    failures: u64,
    timeouts: u64,

    /// Durations of the last N completed requests, in milliseconds
    latencies: VecDeque<f64>,

    /// Success/failure of the last N terminated attempts
    outcomes: VecDeque<bool>,
}

impl NodeHistory {
    fn new() -> Self {
        Self {
            total: 0,
            successes: 0,
            failures: 0,
            timeouts: 0,
            latencies: VecDeque::new(),
            outcomes: VecDeque::new(),
        }
    }

    fn push_latency(&mut self, latency_ms: f64, window: usize) {
        if self.latencies.len() == window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_ms);
    }

    fn push_outcome(&mut self, success: bool, window: usize) {
        if self.outcomes.len() == window {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    fn stats(&self) -> ReliabilityStats {
        let success_rate = if self.total == 0 {
            1.0
        } else {
            self.successes as f64 / self.total as f64
        };

        let samples = self.latencies.len();
        let (mean, variance) = if samples == 0 {
            (0.0, 0.0)
        } else {
            let mean = self.latencies.iter().sum::<f64>() / samples as f64;
            let variance = self
                .latencies
                .iter()
                .map(|l| (l - mean) * (l - mean))
                .sum::<f64>()
                / samples as f64;
            (mean, variance)
        };

        let recent_failure_ratio = if self.outcomes.is_empty() {
            0.0
        } else {
            self.outcomes.iter().filter(|s| !**s).count() as f64 / self.outcomes.len() as f64
        };

        ReliabilityStats {
            total: self.total,
            successes: self.successes,
            failures: self.failures,
            timeouts: self.timeouts,
            success_rate,
            latency_mean_ms: mean,
            latency_variance: variance,
            recent_failure_ratio,
            samples,
        }
    }
}

/// Rolling reliability metrics for every node in the fleet
#[derive(Debug)]
pub struct ReliabilityTracker {
    nodes: DashMap<NodeId, NodeHistory>,

    /// Ring size for latencies and outcomes
    window: usize,

    /// Attempts required before rankings trust the observed rate
    warm_requests: u64,
}

impl ReliabilityTracker {
    pub fn new(window: usize, warm_requests: u64) -> Self {
        Self {
            nodes: DashMap::new(),
            window,
            warm_requests,
        }
    }

    pub fn warm_requests(&self) -> u64 {
        self.warm_requests
    }

    /// Record a successful attempt and its duration
    pub fn record_success(&self, id: &NodeId, latency: Duration) {
        let window = self.window;
        let mut entry = self.nodes.entry(id.clone()).or_insert_with(NodeHistory::new);
        entry.total += 1;
        entry.successes += 1;
        entry.push_latency(latency.as_secs_f64() * 1000.0, window);
        entry.push_outcome(true, window);
    }

    /// Record a failed attempt; the latency is recorded when the attempt
    /// ran long enough to measure (timeouts and slow 5xx responses)
    pub fn record_failure(&self, id: &NodeId, kind: FailureKind, latency: Option<Duration>) {
        let window = self.window;
        let mut entry = self.nodes.entry(id.clone()).or_insert_with(NodeHistory::new);
        entry.total += 1;
        entry.failures += 1;
        if kind == FailureKind::Timeout {
            entry.timeouts += 1;
        }
        if let Some(latency) = latency {
            entry.push_latency(latency.as_secs_f64() * 1000.0, window);
        }
        entry.push_outcome(false, window);

        debug!(node_id = %id, kind = %kind, "recorded failure");
    }

    /// Read-only stats for one node; fresh nodes report a 1.0 success rate
    pub fn stats(&self, id: &NodeId) -> ReliabilityStats {
        self.nodes
            .get(id)
            .map(|h| h.stats())
            .unwrap_or_else(ReliabilityStats::fresh)
    }

    /// Success rate used for ranking: nodes below the warm threshold get a
    /// 1.0 prior so fresh nodes are not penalized
    pub fn ranking_success_rate(&self, id: &NodeId) -> f64 {
        let stats = self.stats(id);
        if stats.total < self.warm_requests {
            1.0
        } else {
            stats.success_rate
        }
    }

    /// Whether a node has enough history for RELIABLE mode to trust it
    pub fn is_warm(&self, id: &NodeId) -> bool {
        self.stats(id).total >= self.warm_requests
    }

    /// Node ids with a ranking success rate at or above the floor, ordered
    /// by (success rate desc, latency variance asc, latency mean asc)
    pub fn most_reliable(&self, min_success_rate: f64) -> Vec<NodeId> {
        let mut ranked: Vec<(NodeId, ReliabilityStats, f64)> = self
            .nodes
            .iter()
            .map(|entry| {
                let stats = entry.value().stats();
                let rate = if stats.total < self.warm_requests {
                    1.0
                } else {
                    stats.success_rate
                };
                (entry.key().clone(), stats, rate)
            })
            .filter(|(_, _, rate)| *rate >= min_success_rate)
            .collect();

        ranked.sort_by(|(a_id, a, a_rate), (b_id, b, b_rate)| {
            b_rate
                .partial_cmp(a_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    a.latency_variance
                        .partial_cmp(&b.latency_variance)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(
                    a.latency_mean_ms
                        .partial_cmp(&b.latency_mean_ms)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a_id.cmp(b_id))
        });

        ranked.into_iter().map(|(id, _, _)| id).collect()
    }

    /// Drop all history for a node (admin action)
    pub fn reset(&self, id: &NodeId) {
        self.nodes.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ReliabilityTracker {
        ReliabilityTracker::new(100, 10)
    }

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    #[test]
    fn test_fresh_node_defaults() {
        let t = tracker();
        let stats = t.stats(&id("a"));
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 1.0);
        assert_eq!(stats.recent_failure_ratio, 0.0);
    }

    #[test]
    fn test_counters_stay_consistent() {
        let t = tracker();
        let a = id("a");

        t.record_success(&a, Duration::from_millis(100));
        t.record_failure(&a, FailureKind::Timeout, Some(Duration::from_secs(30)));
        t.record_failure(&a, FailureKind::HttpStatus(502), None);

        let stats = t.stats(&a);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.successes + stats.failures, stats.total);
        assert!(stats.timeouts <= stats.failures);
        // The 502 carried no latency; only two samples
        assert_eq!(stats.samples, 2);
    }

    #[test]
    fn test_latency_ring_replaces_oldest() {
        let t = ReliabilityTracker::new(3, 10);
        let a = id("a");

        for ms in [10, 20, 30, 40] {
            t.record_success(&a, Duration::from_millis(ms));
        }

        let stats = t.stats(&a);
        assert_eq!(stats.samples, 3);
        // Ring now holds 20, 30, 40
        assert!((stats.latency_mean_ms - 30.0).abs() < 1e-9);
        assert_eq!(stats.total, 4, "counters are not windowed");
    }

    #[test]
    fn test_variance_over_ring() {
        let t = tracker();
        let a = id("a");
        for ms in [10, 10, 10] {
            t.record_success(&a, Duration::from_millis(ms));
        }
        assert_eq!(t.stats(&a).latency_variance, 0.0);

        let b = id("b");
        for ms in [0, 20] {
            t.record_success(&b, Duration::from_millis(ms));
        }
        // mean 10, population variance ((-10)^2 + 10^2) / 2 = 100
        assert!((t.stats(&b).latency_variance - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_fresh_nodes_get_ranking_prior() {
        let t = tracker();
        let a = id("a");

        // 3 attempts, 2 failures: observed rate 0.33, but under the warm
        // threshold the ranking rate stays at the prior
        t.record_success(&a, Duration::from_millis(10));
        t.record_failure(&a, FailureKind::Unreachable, None);
        t.record_failure(&a, FailureKind::Unreachable, None);

        assert!(t.stats(&a).success_rate < 0.5);
        assert_eq!(t.ranking_success_rate(&a), 1.0);
        assert!(!t.is_warm(&a));

        for _ in 0..10 {
            t.record_failure(&a, FailureKind::Unreachable, None);
        }
        assert!(t.is_warm(&a));
        assert!(t.ranking_success_rate(&a) < 0.2);
    }

    #[test]
    fn test_most_reliable_ordering() {
        let t = tracker();

        // a: perfect but jittery
        for ms in [10, 500, 10, 500, 10, 500, 10, 500, 10, 500] {
            t.record_success(&id("a"), Duration::from_millis(ms));
        }
        // b: perfect and steady
        for _ in 0..10 {
            t.record_success(&id("b"), Duration::from_millis(100));
        }
        // c: warm but flaky
        for i in 0..20 {
            if i % 2 == 0 {
                t.record_success(&id("c"), Duration::from_millis(50));
            } else {
                t.record_failure(&id("c"), FailureKind::HttpStatus(500), None);
            }
        }

        let ranked = t.most_reliable(0.9);
        assert_eq!(ranked, vec![id("b"), id("a")], "steady beats jittery, flaky excluded");

        let ranked = t.most_reliable(0.4);
        assert_eq!(ranked.last(), Some(&id("c")));
    }

    #[test]
    fn test_reset_clears_history() {
        let t = tracker();
        let a = id("a");
        t.record_failure(&a, FailureKind::Timeout, None);
        assert_eq!(t.stats(&a).total, 1);

        t.reset(&a);
        assert_eq!(t.stats(&a).total, 0);
        assert_eq!(t.stats(&a).success_rate, 1.0);
    }
}
