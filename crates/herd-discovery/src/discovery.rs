//! Node discovery and lifecycle
//!
//! Inputs, in order of precedence: the operator seed list, environment
//! overrides (merged into the seed list by the configuration layer), and
//! an optional local-subnet probe. Seeds are permanent; probed nodes are
//! removed after `grace_failures` consecutive missed probes, and a node
//! with requests in flight is never removed.

use crate::scanner::SubnetScanner;
use herd_core::{Backend, DiscoveryConfig, Node, NodeAddress, NodeId, SeedNode};
use herd_state::{NodeLoad, NodeRegistry};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Discovers backend nodes and retires the ones that disappear
pub struct Discovery {
    config: DiscoveryConfig,
    backend: Arc<dyn Backend>,
    registry: Arc<NodeRegistry>,
    load: Arc<NodeLoad>,

    /// Nodes that may never be removed (operator seeds)
    permanent: Mutex<HashSet<NodeId>>,

    /// Consecutive missed probes per node
    misses: Mutex<HashMap<NodeId, u32>>,
}

impl Discovery {
    pub fn new(
        config: DiscoveryConfig,
        backend: Arc<dyn Backend>,
        registry: Arc<NodeRegistry>,
        load: Arc<NodeLoad>,
    ) -> Self {
        Self {
            config,
            backend,
            registry,
            load,
            permanent: Mutex::new(HashSet::new()),
            misses: Mutex::new(HashMap::new()),
        }
    }

    /// Run discovery until canceled: one full pass at startup (seeds, then
    /// the subnet scan), then interval re-probing of every known node
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("discovery stopped during bootstrap");
                return;
            }
            _ = self.bootstrap() => {}
        }

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("discovery stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("discovery stopped");
                    return;
                }
                _ = self.probe_known_nodes() => {}
            }
        }
    }

    async fn bootstrap(&self) {
        self.register_seeds().await;
        if self.config.scan_local_subnet {
            self.scan_subnet().await;
        }
    }

    /// Register the configured seed nodes and probe them once
    pub async fn register_seeds(&self) {
        for seed in &self.config.seeds {
            let node = node_from_seed(seed);
            let id = node.id.clone();
            self.permanent.lock().insert(id.clone());
            self.registry.upsert(node);
            self.probe_node(&id).await;
        }

        if !self.config.seeds.is_empty() {
            info!(count = self.config.seeds.len(), "registered seed nodes");
        }
    }

    /// One-shot subnet scan; responsive hosts that answer `tags` become
    /// nodes. Suppressed after the first full pass.
    async fn scan_subnet(&self) {
        let subnet = match self
            .config
            .subnet
            .clone()
            .or_else(SubnetScanner::derive_local_subnet)
        {
            Some(subnet) => subnet,
            None => {
                warn!("subnet scan enabled but no subnet could be derived");
                return;
            }
        };

        let scanner = SubnetScanner::new(subnet, 11434, self.config.probe_timeout());
        for (host, port) in scanner.scan().await {
            let node = Node::new(NodeAddress::new(host, port), Default::default());
            let id = node.id.clone();
            if self.registry.get(&id).is_none() {
                // Only a real tags answer turns a responsive port into a node
                let probe = self
                    .backend
                    .tags(&node, self.config.probe_timeout())
                    .await;
                if probe.is_ok() {
                    self.registry.upsert(node);
                    self.registry.set_healthy(&id, true);
                    info!(node_id = %id, "discovered node on local subnet");
                }
            }
        }
    }

    /// Probe every registered node once, retiring the silent ones
    pub async fn probe_known_nodes(&self) {
        for node in self.registry.nodes() {
            self.probe_node(&node.id).await;
        }
    }

    /// Probe one node with a `tags` call and update its lifecycle state
    async fn probe_node(&self, id: &NodeId) {
        let Some(node) = self.registry.get(id) else {
            return;
        };

        match self
            .backend
            .tags(&node, self.config.probe_timeout())
            .await
        {
            Ok(_) => {
                self.misses.lock().remove(id);
                if !node.healthy {
                    info!(node_id = %id, "node answered probe, marking healthy");
                }
                self.registry.set_healthy(id, true);
            }
            Err(e) => {
                let missed = {
                    let mut misses = self.misses.lock();
                    let missed = misses.entry(id.clone()).or_insert(0);
                    *missed += 1;
                    *missed
                };

                debug!(node_id = %id, missed, error = %e, "probe failed");
                self.registry.set_healthy(id, false);

                if missed >= self.config.grace_failures {
                    self.maybe_remove(id);
                }
            }
        }
    }

    /// Remove a node past its grace window, unless it is a permanent seed
    /// or still has requests in flight
    fn maybe_remove(&self, id: &NodeId) {
        if self.permanent.lock().contains(id) {
            return;
        }
        if self.load.is_busy(id) {
            debug!(node_id = %id, "grace expired but node is busy, keeping");
            return;
        }

        if self.registry.remove(id).is_some() {
            warn!(node_id = %id, "node silent past grace window, removed");
        }
        self.misses.lock().remove(id);
    }
}

fn node_from_seed(seed: &SeedNode) -> Node {
    let mut node = Node::new(NodeAddress::new(seed.host.clone(), seed.port), seed.class);
    node.vram_total_bytes = seed.vram_total_bytes;
    node.ram_total_bytes = seed.ram_total_bytes;
    node.parallelism = seed.parallelism;
    node
}
