//! Admission control and node selection
//!
//! The scheduler is the only cross-request serialization point: a global
//! permit pool bounds total in-flight work, a priority queue orders the
//! waiters, and per-node caps bound each backend. Node selection ranks the
//! current registry snapshot under one of the three routing disciplines
//! and returns an ordered candidate list so the router can fail over.

use herd_core::{
    Error, ModelCatalog, Node, NodeId, Priority, ReliabilityConfig, Result, RouteConstraints,
    RoutingConfig, RoutingMode, SchedulerConfig,
};
use herd_state::{InFlightGuard, NodeLoad, ReliabilityTracker};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

struct Waiter {
    /// Monotonic id; doubles as arrival order
    id: u64,
    priority: Priority,
    /// ASYNC requests queue behind interactive work of equal priority
    background: bool,
    tx: oneshot::Sender<()>,
}

struct QueueState {
    /// Global permits not currently held
    available: u32,
    queue: Vec<Waiter>,
    next_id: u64,
}

/// Bounded-concurrency admission control with priority ordering
pub struct Scheduler {
    config: SchedulerConfig,
    routing: RoutingConfig,
    reliability_config: ReliabilityConfig,
    load: Arc<NodeLoad>,
    state: Mutex<QueueState>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        routing: RoutingConfig,
        reliability_config: ReliabilityConfig,
        load: Arc<NodeLoad>,
    ) -> Self {
        let available = config.max_in_flight;
        Self {
            config,
            routing,
            reliability_config,
            load,
            state: Mutex::new(QueueState {
                available,
                queue: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Permits not currently held (for stats and tests)
    pub fn available(&self) -> u32 {
        self.state.lock().available
    }

    /// Current waiting-queue length
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// The per-node in-flight cap for one node
    pub fn per_node_cap(&self, node: &Node) -> u32 {
        node.parallelism.unwrap_or(self.config.per_node_cap)
    }

    /// Start one attempt against a node, refusing when the node is at its
    /// cap; the guard releases on drop
    pub fn begin_attempt(&self, node: &Node) -> Option<InFlightGuard> {
        self.load.try_begin(&node.id, self.per_node_cap(node))
    }

    /// Acquire a global permit, waiting in priority order
    ///
    /// Returns `Overloaded` immediately when the waiting queue is at its
    /// soft cap. Cancellation or deadline expiry removes the waiter from
    /// the queue with no side effects.
    pub async fn acquire(
        self: &Arc<Self>,
        priority: Priority,
        mode: RoutingMode,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<SchedulerPermit> {
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let (id, mut rx) = {
            let mut state = self.state.lock();
            if state.available > 0 && state.queue.is_empty() {
                state.available -= 1;
                trace!("permit acquired immediately");
                return Ok(SchedulerPermit {
                    scheduler: Arc::clone(self),
                });
            }
            if state.queue.len() >= self.config.queue_soft_cap {
                return Err(Error::overloaded(format!(
                    "waiting queue at soft cap ({})",
                    self.config.queue_soft_cap
                )));
            }

            let (tx, rx) = oneshot::channel();
            let id = state.next_id;
            state.next_id += 1;
            state.queue.push(Waiter {
                id,
                priority,
                background: mode.is_background(),
                tx,
            });
            (id, rx)
        };

        debug!(priority = %priority, mode = %mode, "queued for a permit");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.abandon(id, &mut rx);
                Err(Error::Canceled)
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                self.abandon(id, &mut rx);
                Err(Error::deadline("while waiting for a scheduler permit"))
            }
            granted = &mut rx => match granted {
                Ok(()) => Ok(SchedulerPermit {
                    scheduler: Arc::clone(self),
                }),
                Err(_) => Err(Error::internal("scheduler dropped a queued waiter")),
            }
        }
    }

    /// Remove an abandoned waiter; if its grant raced in, pass it on
    fn abandon(&self, id: u64, rx: &mut oneshot::Receiver<()>) {
        let maybe_granted = {
            let mut state = self.state.lock();
            let before = state.queue.len();
            state.queue.retain(|w| w.id != id);
            state.queue.len() == before
        };
        if maybe_granted && rx.try_recv().is_ok() {
            self.release();
        }
    }

    /// Hand a freed permit to the best waiter, or back to the pool
    ///
    /// The grant is sent while the lock is held so an abandoning waiter
    /// always observes either its queue entry or its grant, never neither.
    fn release(&self) {
        let mut state = self.state.lock();
        loop {
            let best = state
                .queue
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    b.priority
                        .cmp(&a.priority)
                        .then(a.background.cmp(&b.background))
                        .then(a.id.cmp(&b.id))
                })
                .map(|(i, _)| i);

            match best {
                Some(i) => {
                    let waiter = state.queue.remove(i);
                    if waiter.tx.send(()).is_ok() {
                        return;
                    }
                    // Receiver vanished between abandon and grant; try next
                }
                None => {
                    state.available += 1;
                    return;
                }
            }
        }
    }

    /// Rank the snapshot's nodes for a model under a routing mode
    ///
    /// The list is ordered best-first; the router walks it for failover.
    pub fn select_candidates(
        &self,
        model: &str,
        mode: RoutingMode,
        constraints: &RouteConstraints,
        snapshot: &HashMap<NodeId, Node>,
        reliability: &ReliabilityTracker,
        catalog: &ModelCatalog,
    ) -> Vec<NodeId> {
        let mut eligible: Vec<&Node> = snapshot
            .values()
            .filter(|node| self.is_eligible(model, node, constraints, catalog))
            .collect();

        // prefer_cpu narrows the field only when CPU nodes qualify at all
        if constraints.prefer_cpu && eligible.iter().any(|n| n.is_cpu()) {
            eligible.retain(|n| n.is_cpu());
        }

        match mode {
            RoutingMode::Fast => self.rank_fast(model, eligible, constraints, reliability),
            RoutingMode::Reliable => {
                self.rank_reliable(model, eligible, constraints, reliability)
            }
            RoutingMode::Async => self.rank_async(model, eligible, catalog),
        }
    }

    fn is_eligible(
        &self,
        model: &str,
        node: &Node,
        constraints: &RouteConstraints,
        catalog: &ModelCatalog,
    ) -> bool {
        if !node.healthy {
            return false;
        }
        if self.load.get(&node.id) >= self.per_node_cap(node) {
            return false;
        }
        if !catalog.fits(model, node).fits {
            return false;
        }
        if let Some(min_vram) = constraints.min_free_vram_bytes {
            // Unknown VRAM never excludes a node on its own
            if node.vram_total_bytes > 0 && node.vram_free_bytes < min_vram {
                return false;
            }
        }
        true
    }

    /// FAST: performance-first weighted score
    fn rank_fast(
        &self,
        _model: &str,
        eligible: Vec<&Node>,
        constraints: &RouteConstraints,
        reliability: &ReliabilityTracker,
    ) -> Vec<NodeId> {
        let w = &self.routing.fast_weights;

        let mut scored: Vec<(f64, u32, bool, NodeId)> = eligible
            .into_iter()
            .map(|node| {
                let in_flight = self.load.get(&node.id);
                let stats = reliability.stats(&node.id);
                let latency_mean_s = stats.latency_mean_ms / 1000.0;

                let score = w.in_flight * (1.0 / (1.0 + in_flight as f64))
                    + w.gpu * if node.is_gpu() { 1.0 } else { 0.0 }
                    + w.free_vram * node.free_vram_ratio().unwrap_or(0.0)
                    + w.local * if node.is_local() { 1.0 } else { 0.0 }
                    + w.latency * (1.0 / (1.0 + latency_mean_s))
                    - w.recent_failure * stats.recent_failure_ratio;

                (score, in_flight, node.is_local(), node.id.clone())
            })
            .collect();

        scored.sort_by(|(a_score, a_load, a_local, a_id), (b_score, b_load, b_local, b_id)| {
            let local_order = if constraints.prefer_local {
                b_local.cmp(a_local)
            } else {
                std::cmp::Ordering::Equal
            };
            local_order
                .then(
                    b_score
                        .partial_cmp(a_score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a_load.cmp(b_load))
                .then(a_id.cmp(b_id))
        });

        scored.into_iter().map(|(_, _, _, id)| id).collect()
    }

    /// RELIABLE: filter to warm nodes above the success-rate floor, ranked
    /// by (success rate desc, latency variance asc, uptime desc). Falls
    /// back to FAST scoring when nothing qualifies.
    fn rank_reliable(
        &self,
        model: &str,
        eligible: Vec<&Node>,
        constraints: &RouteConstraints,
        reliability: &ReliabilityTracker,
    ) -> Vec<NodeId> {
        let floor = constraints
            .min_success_rate
            .unwrap_or(self.reliability_config.min_success_rate);

        let mut proven: Vec<(&Node, f64, f64)> = eligible
            .iter()
            .filter_map(|node| {
                let stats = reliability.stats(&node.id);
                if stats.total >= self.reliability_config.warm_requests
                    && stats.success_rate >= floor
                {
                    Some((*node, stats.success_rate, stats.latency_variance))
                } else {
                    None
                }
            })
            .collect();

        if proven.is_empty() {
            debug!("no warm node clears the reliability floor, using fast scoring");
            return self.rank_fast(model, eligible, constraints, reliability);
        }

        proven.sort_by(|(a, a_rate, a_var), (b, b_rate, b_var)| {
            b_rate
                .partial_cmp(a_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a_var.partial_cmp(b_var).unwrap_or(std::cmp::Ordering::Equal))
                .then(b.uptime_seconds().cmp(&a.uptime_seconds()))
                .then(a.id.cmp(&b.id))
        });

        proven.into_iter().map(|(node, _, _)| node.id.clone()).collect()
    }

    /// ASYNC: CPU nodes that fit the model in RAM win; GPU nodes are used
    /// only when no CPU node fits. Lowest in-flight first, no local bias.
    fn rank_async(
        &self,
        model: &str,
        eligible: Vec<&Node>,
        catalog: &ModelCatalog,
    ) -> Vec<NodeId> {
        let (cpu, other): (Vec<&Node>, Vec<&Node>) = eligible
            .into_iter()
            .partition(|node| node.is_cpu() && catalog.fits(model, node).fits);

        let pool = if cpu.is_empty() { other } else { cpu };

        let mut ranked: Vec<(u32, NodeId)> = pool
            .into_iter()
            .map(|node| (self.load.get(&node.id), node.id.clone()))
            .collect();
        ranked.sort_by(|(a_load, a_id), (b_load, b_id)| a_load.cmp(b_load).then(a_id.cmp(b_id)));
        ranked.into_iter().map(|(_, id)| id).collect()
    }
}

/// A held admission permit; dropping it admits the next waiter
pub struct SchedulerPermit {
    scheduler: Arc<Scheduler>,
}

impl Drop for SchedulerPermit {
    fn drop(&mut self) {
        self.scheduler.release();
    }
}

impl std::fmt::Debug for SchedulerPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerPermit").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_core::{CatalogConfig, NodeAddress, NodeClass};
    use std::time::Duration;

    fn scheduler_with(config: SchedulerConfig) -> (Arc<Scheduler>, Arc<NodeLoad>) {
        let load = Arc::new(NodeLoad::new());
        let scheduler = Arc::new(Scheduler::new(
            config,
            RoutingConfig::default(),
            ReliabilityConfig::default(),
            Arc::clone(&load),
        ));
        (scheduler, load)
    }

    fn scheduler() -> (Arc<Scheduler>, Arc<NodeLoad>) {
        scheduler_with(SchedulerConfig::default())
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn node(host: &str, class: NodeClass) -> Node {
        let mut node = Node::new(NodeAddress::new(host, 11434), class);
        node.healthy = true;
        node
    }

    fn gpu_node(host: &str, vram_total: u64, vram_free: u64) -> Node {
        let mut node = node(host, NodeClass::Gpu);
        node.vram_total_bytes = vram_total;
        node.vram_free_bytes = vram_free;
        node
    }

    fn cpu_node(host: &str, ram_total: u64, ram_free: u64) -> Node {
        let mut node = node(host, NodeClass::Cpu);
        node.ram_total_bytes = ram_total;
        node.ram_free_bytes = ram_free;
        node
    }

    fn snapshot(nodes: Vec<Node>) -> HashMap<NodeId, Node> {
        nodes.into_iter().map(|n| (n.id.clone(), n)).collect()
    }

    fn catalog() -> ModelCatalog {
        ModelCatalog::new(&CatalogConfig::default()).unwrap()
    }

    fn tracker() -> ReliabilityTracker {
        ReliabilityTracker::new(100, 10)
    }

    const GIB: u64 = 1 << 30;

    #[tokio::test]
    async fn test_permits_bounded_by_max_in_flight() {
        let (s, _) = scheduler_with(SchedulerConfig {
            max_in_flight: 2,
            ..Default::default()
        });
        let cancel = CancellationToken::new();

        let p1 = s
            .acquire(Priority::default(), RoutingMode::Fast, deadline(), &cancel)
            .await
            .unwrap();
        let _p2 = s
            .acquire(Priority::default(), RoutingMode::Fast, deadline(), &cancel)
            .await
            .unwrap();
        assert_eq!(s.available(), 0);

        // Third acquire must wait until a permit frees
        let s2 = Arc::clone(&s);
        let cancel2 = cancel.clone();
        let waiter = tokio::spawn(async move {
            s2.acquire(Priority::default(), RoutingMode::Fast, deadline(), &cancel2)
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        assert_eq!(s.queue_len(), 1);

        drop(p1);
        let permit = waiter.await.unwrap();
        assert!(permit.is_ok());
    }

    #[tokio::test]
    async fn test_queue_soft_cap_overloads() {
        let (s, _) = scheduler_with(SchedulerConfig {
            max_in_flight: 1,
            queue_soft_cap: 1,
            ..Default::default()
        });
        let cancel = CancellationToken::new();

        let _held = s
            .acquire(Priority::default(), RoutingMode::Fast, deadline(), &cancel)
            .await
            .unwrap();

        // One waiter fits in the queue
        let s2 = Arc::clone(&s);
        let cancel2 = cancel.clone();
        let _waiter = tokio::spawn(async move {
            s2.acquire(Priority::default(), RoutingMode::Fast, deadline(), &cancel2)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The next one bounces immediately
        let err = s
            .acquire(Priority::default(), RoutingMode::Fast, deadline(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Overloaded(_)));
    }

    #[tokio::test]
    async fn test_priority_order_and_async_yielding() {
        let (s, _) = scheduler_with(SchedulerConfig {
            max_in_flight: 1,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let held = s
            .acquire(Priority::default(), RoutingMode::Fast, deadline(), &cancel)
            .await
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<&'static str>();

        // Queued in arrival order: low-prio fast, async prio 5, fast prio 5,
        // high-prio async
        for (label, priority, mode) in [
            ("low-fast", 2, RoutingMode::Fast),
            ("async-5", 5, RoutingMode::Async),
            ("fast-5", 5, RoutingMode::Fast),
            ("async-9", 9, RoutingMode::Async),
        ] {
            let s2 = Arc::clone(&s);
            let cancel2 = cancel.clone();
            let tx2 = tx.clone();
            tokio::spawn(async move {
                let permit = s2
                    .acquire(Priority::new(priority), mode, deadline(), &cancel2)
                    .await
                    .unwrap();
                tx2.send(label).unwrap();
                drop(permit);
            });
            // Deterministic arrival order
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(s.queue_len(), 4);
        drop(held);

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(rx.recv().await.unwrap());
        }
        assert_eq!(order, vec!["async-9", "fast-5", "async-5", "low-fast"]);
    }

    #[tokio::test]
    async fn test_canceled_waiter_leaves_no_trace() {
        let (s, _) = scheduler_with(SchedulerConfig {
            max_in_flight: 1,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let held = s
            .acquire(Priority::default(), RoutingMode::Fast, deadline(), &cancel)
            .await
            .unwrap();

        let waiter_cancel = CancellationToken::new();
        let s2 = Arc::clone(&s);
        let wc = waiter_cancel.clone();
        let waiter = tokio::spawn(async move {
            s2.acquire(Priority::default(), RoutingMode::Fast, deadline(), &wc)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(s.queue_len(), 1);

        waiter_cancel.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Canceled));
        assert_eq!(s.queue_len(), 0);

        // The held permit still comes back to the pool untouched
        drop(held);
        assert_eq!(s.available(), 1);
    }

    #[tokio::test]
    async fn test_deadline_while_queued() {
        let (s, _) = scheduler_with(SchedulerConfig {
            max_in_flight: 1,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let _held = s
            .acquire(Priority::default(), RoutingMode::Fast, deadline(), &cancel)
            .await
            .unwrap();

        let err = s
            .acquire(
                Priority::default(),
                RoutingMode::Fast,
                Instant::now() + Duration::from_millis(30),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(_)));
        assert_eq!(s.queue_len(), 0);
    }

    #[test]
    fn test_fast_prefers_idle_gpu() {
        let (s, load) = scheduler();
        let a = gpu_node("a", 16 * GIB, 10 * GIB);
        let b = gpu_node("b", 16 * GIB, 10 * GIB);

        // a is busy with two requests
        let _g1 = load.begin(&a.id);
        let _g2 = load.begin(&a.id);

        let ranked = s.select_candidates(
            "med-7b",
            RoutingMode::Fast,
            &RouteConstraints::default(),
            &snapshot(vec![a, b]),
            &tracker(),
            &catalog(),
        );
        assert_eq!(ranked.first().map(|id| id.as_str()), Some("b:11434"));
    }

    #[test]
    fn test_fast_gpu_beats_cpu() {
        let (s, _) = scheduler();
        let gpu = gpu_node("g", 16 * GIB, 10 * GIB);
        let cpu = cpu_node("c", 32 * GIB, 30 * GIB);

        let ranked = s.select_candidates(
            "med-7b",
            RoutingMode::Fast,
            &RouteConstraints::default(),
            &snapshot(vec![gpu, cpu]),
            &tracker(),
            &catalog(),
        );
        assert_eq!(ranked.first().map(|id| id.as_str()), Some("g:11434"));
    }

    #[test]
    fn test_unhealthy_and_capped_nodes_excluded() {
        let (s, load) = scheduler();
        let mut sick = gpu_node("sick", 16 * GIB, 10 * GIB);
        sick.healthy = false;

        let full = gpu_node("full", 16 * GIB, 10 * GIB);
        let _g1 = load.begin(&full.id);
        let _g2 = load.begin(&full.id); // default per-node cap is 2

        let ok = gpu_node("ok", 16 * GIB, 10 * GIB);

        let ranked = s.select_candidates(
            "med-7b",
            RoutingMode::Fast,
            &RouteConstraints::default(),
            &snapshot(vec![sick, full, ok]),
            &tracker(),
            &catalog(),
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].as_str(), "ok:11434");
    }

    #[test]
    fn test_reliable_requires_warmth() {
        let (s, _) = scheduler();
        let t = tracker();
        let a = cpu_node("a", 32 * GIB, 30 * GIB);
        let b = cpu_node("b", 32 * GIB, 30 * GIB);

        // a: 3 perfect requests (cold). b: 50 requests at 98%.
        for _ in 0..3 {
            t.record_success(&a.id, Duration::from_millis(100));
        }
        for i in 0..50 {
            if i == 0 {
                t.record_failure(&b.id, herd_core::FailureKind::Timeout, None);
            } else {
                t.record_success(&b.id, Duration::from_millis(100));
            }
        }

        let ranked = s.select_candidates(
            "small-1b",
            RoutingMode::Reliable,
            &RouteConstraints::default(),
            &snapshot(vec![a, b]),
            &t,
            &catalog(),
        );
        assert_eq!(ranked.first().map(|id| id.as_str()), Some("b:11434"));
    }

    #[test]
    fn test_reliable_falls_back_to_fast_when_all_cold() {
        let (s, _) = scheduler();
        let a = gpu_node("a", 16 * GIB, 10 * GIB);

        let ranked = s.select_candidates(
            "med-7b",
            RoutingMode::Reliable,
            &RouteConstraints::default(),
            &snapshot(vec![a]),
            &tracker(),
            &catalog(),
        );
        assert_eq!(ranked.len(), 1, "cold fleet still yields candidates");
    }

    #[test]
    fn test_async_prefers_cpu_even_when_gpu_is_free() {
        let (s, _) = scheduler();
        let gpu = gpu_node("g", 16 * GIB, 12 * GIB);
        let cpu = cpu_node("c", 32 * GIB, 30 * GIB);

        let ranked = s.select_candidates(
            "med-7b",
            RoutingMode::Async,
            &RouteConstraints::default(),
            &snapshot(vec![gpu, cpu]),
            &tracker(),
            &catalog(),
        );
        assert_eq!(ranked.first().map(|id| id.as_str()), Some("c:11434"));
        assert_eq!(ranked.len(), 1, "GPU not offered while a CPU node fits");
    }

    #[test]
    fn test_async_uses_gpu_when_no_cpu_fits() {
        let (s, _) = scheduler();
        let gpu = gpu_node("g", 64 * GIB, 60 * GIB);
        let cpu = cpu_node("c", 8 * GIB, 2 * GIB); // 70b will not fit

        let ranked = s.select_candidates(
            "llama3.1:70b",
            RoutingMode::Async,
            &RouteConstraints::default(),
            &snapshot(vec![gpu, cpu]),
            &tracker(),
            &catalog(),
        );
        assert_eq!(ranked.first().map(|id| id.as_str()), Some("g:11434"));
    }

    #[test]
    fn test_min_free_vram_constraint() {
        let (s, _) = scheduler();
        let small = gpu_node("small", 8 * GIB, 2 * GIB);
        let big = gpu_node("big", 24 * GIB, 20 * GIB);
        let unknown = node("unknown-vram", NodeClass::Gpu); // totals unknown

        let constraints = RouteConstraints {
            min_free_vram_bytes: Some(8 * GIB),
            ..Default::default()
        };
        let ranked = s.select_candidates(
            "mystery-model",
            RoutingMode::Fast,
            &constraints,
            &snapshot(vec![small, big, unknown]),
            &tracker(),
            &catalog(),
        );

        let ids: Vec<&str> = ranked.iter().map(|id| id.as_str()).collect();
        assert!(!ids.contains(&"small:11434"), "below the VRAM floor");
        assert!(ids.contains(&"big:11434"));
        assert!(
            ids.contains(&"unknown-vram:11434"),
            "unknown VRAM is not excluded"
        );
    }

    #[test]
    fn test_prefer_local_overrides_score() {
        let (s, _) = scheduler();
        let remote = gpu_node("10.0.0.9", 16 * GIB, 12 * GIB);
        let local = cpu_node("127.0.0.1", 32 * GIB, 30 * GIB);

        let constraints = RouteConstraints {
            prefer_local: true,
            ..Default::default()
        };
        let ranked = s.select_candidates(
            "med-7b",
            RoutingMode::Fast,
            &constraints,
            &snapshot(vec![remote, local]),
            &tracker(),
            &catalog(),
        );
        assert_eq!(ranked.first().map(|id| id.as_str()), Some("127.0.0.1:11434"));
    }
}
