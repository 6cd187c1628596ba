//! Per-node in-flight accounting
//!
//! The scheduler owns these counters: one increment before dispatch, one
//! guaranteed decrement when the guard drops, on every path including
//! panics. Discovery reads them to avoid deleting a node that is still
//! serving a request.

use dashmap::DashMap;
use herd_core::NodeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Concurrent map of in-flight request counts per node
#[derive(Debug, Default)]
pub struct NodeLoad {
    counts: DashMap<NodeId, Arc<AtomicU32>>,
}

impl NodeLoad {
    pub fn new() -> Self {
        Self {
            counts: DashMap::new(),
        }
    }

    fn counter(&self, id: &NodeId) -> Arc<AtomicU32> {
        self.counts
            .entry(id.clone())
            .or_insert_with(|| Arc::new(AtomicU32::new(0)))
            .clone()
    }

    /// Current in-flight count for a node
    pub fn get(&self, id: &NodeId) -> u32 {
        self.counts
            .get(id)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Whether the node currently serves at least one request
    pub fn is_busy(&self, id: &NodeId) -> bool {
        self.get(id) > 0
    }

    /// Sum of in-flight counts across the fleet
    pub fn total(&self) -> u32 {
        self.counts
            .iter()
            .map(|entry| entry.value().load(Ordering::Acquire))
            .sum()
    }

    /// All current counts, for stats views
    pub fn snapshot(&self) -> HashMap<NodeId, u32> {
        self.counts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Acquire)))
            .collect()
    }

    /// Increment a node's count, returning a guard that decrements on drop
    pub fn begin(&self, id: &NodeId) -> InFlightGuard {
        let counter = self.counter(id);
        counter.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            node_id: id.clone(),
            counter,
        }
    }

    /// Increment a node's count only while it stays within `cap`
    ///
    /// The check-and-increment is atomic, so concurrent attempts can never
    /// push a node past its cap.
    pub fn try_begin(&self, id: &NodeId, cap: u32) -> Option<InFlightGuard> {
        let counter = self.counter(id);
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < cap).then_some(current + 1)
            })
            .ok()?;
        Some(InFlightGuard {
            node_id: id.clone(),
            counter,
        })
    }
}

/// RAII token for one in-flight request on one node
#[derive(Debug)]
pub struct InFlightGuard {
    node_id: NodeId,
    counter: Arc<AtomicU32>,
}

impl InFlightGuard {
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_release() {
        let load = NodeLoad::new();
        let id: NodeId = "a:11434".into();

        assert_eq!(load.get(&id), 0);
        assert!(!load.is_busy(&id));

        let g1 = load.begin(&id);
        let g2 = load.begin(&id);
        assert_eq!(load.get(&id), 2);
        assert_eq!(load.total(), 2);
        assert_eq!(g1.node_id(), &id);

        drop(g1);
        assert_eq!(load.get(&id), 1);
        drop(g2);
        assert_eq!(load.get(&id), 0);
    }

    #[test]
    fn test_try_begin_respects_cap() {
        let load = NodeLoad::new();
        let id: NodeId = "a:11434".into();

        let g1 = load.try_begin(&id, 2).unwrap();
        let _g2 = load.try_begin(&id, 2).unwrap();
        assert!(load.try_begin(&id, 2).is_none(), "cap reached");
        assert_eq!(load.get(&id), 2);

        drop(g1);
        assert!(load.try_begin(&id, 2).is_some(), "slot freed");
    }

    #[test]
    fn test_release_on_panic() {
        let load = Arc::new(NodeLoad::new());
        let id: NodeId = "a:11434".into();

        let load2 = Arc::clone(&load);
        let id2 = id.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = load2.begin(&id2);
            panic!("worker died");
        }));
        assert!(result.is_err());

        // The guard's drop ran during unwinding
        assert_eq!(load.get(&id), 0);
    }

    #[test]
    fn test_snapshot_covers_all_nodes() {
        let load = NodeLoad::new();
        let a: NodeId = "a:11434".into();
        let b: NodeId = "b:11434".into();

        let _ga = load.begin(&a);
        let _gb1 = load.begin(&b);
        let _gb2 = load.begin(&b);

        let snapshot = load.snapshot();
        assert_eq!(snapshot.get(&a), Some(&1));
        assert_eq!(snapshot.get(&b), Some(&2));
    }
}
