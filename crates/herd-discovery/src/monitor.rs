//! Health and resource monitor
//!
//! On an interval (default 2 minutes) every node is asked for its model
//! listing and its running models. Health flips false on a failed probe
//! and back to true on the next success. Free VRAM/RAM are derived from
//! the running-model report against the node's declared totals; a node
//! with no declared totals keeps them at 0, meaning unknown, and is never
//! excluded from placement on memory grounds alone.
//!
//! Per-node jitter of up to 10 % of the interval spreads the probes so a
//! large fleet is not hit in lockstep.

use futures::future::join_all;
use herd_core::{Backend, MonitorConfig, Node, NodeClass, RunningModel};
use herd_state::{NodePatch, NodeRegistry};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodically refreshes every node's health and resource state
pub struct HealthMonitor {
    config: MonitorConfig,
    backend: Arc<dyn Backend>,
    registry: Arc<NodeRegistry>,
}

impl HealthMonitor {
    pub fn new(
        config: MonitorConfig,
        backend: Arc<dyn Backend>,
        registry: Arc<NodeRegistry>,
    ) -> Self {
        Self {
            config,
            backend,
            registry,
        }
    }

    /// Run the refresh loop until canceled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("monitor stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            // A jittered sweep can sleep for a while; stay cancelable
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("monitor stopped");
                    return;
                }
                _ = self.refresh_all(true) => {}
            }
        }
    }

    /// Refresh every registered node, optionally spreading the probes with
    /// per-node jitter
    pub async fn refresh_all(&self, jittered: bool) {
        let max_jitter = self.config.interval().mul_f64(0.1);
        let probes = self.registry.nodes().into_iter().map(|node| {
            let jitter = if jittered {
                rand::thread_rng().gen_range(Duration::ZERO..=max_jitter)
            } else {
                Duration::ZERO
            };
            async move {
                if !jitter.is_zero() {
                    tokio::time::sleep(jitter).await;
                }
                self.refresh_node(&node).await;
            }
        });

        join_all(probes).await;
    }

    /// Refresh one node's health flag, loaded models, and free memory
    pub async fn refresh_node(&self, node: &Node) {
        let timeout = self.config.probe_timeout();

        if let Err(e) = self.backend.tags(node, timeout).await {
            if node.healthy {
                warn!(node_id = %node.id, error = %e, "node failed health probe");
            }
            self.registry.set_healthy(&node.id, false);
            return;
        }

        // tags answered; ps failures degrade to "healthy, resources stale"
        let running = match self.backend.running(node, timeout).await {
            Ok(running) => running,
            Err(e) => {
                debug!(node_id = %node.id, error = %e, "running-models probe failed");
                if !node.healthy {
                    info!(node_id = %node.id, "node recovered");
                }
                self.registry.set_healthy(&node.id, true);
                return;
            }
        };

        let mut patch = resource_patch(node, &running);
        patch.healthy = Some(true);

        if !node.healthy {
            info!(node_id = %node.id, "node recovered");
        }
        self.registry.update(&node.id, patch);
    }
}

/// Derive a live-state patch from a running-models report
///
/// Free memory is only computed against declared totals; totals of 0 stay
/// 0 ("unknown"). A node never declared as GPU but reporting VRAM-resident
/// models is upgraded to the GPU class.
fn resource_patch(node: &Node, running: &[RunningModel]) -> NodePatch {
    let mut patch = NodePatch::default();

    let vram_used: u64 = running.iter().map(|m| m.size_vram).sum();
    let ram_used: u64 = running
        .iter()
        .map(|m| m.size.saturating_sub(m.size_vram))
        .sum();

    if node.vram_total_bytes > 0 {
        patch.vram_free_bytes = Some(node.vram_total_bytes.saturating_sub(vram_used));
    }
    if node.ram_total_bytes > 0 {
        patch.ram_free_bytes = Some(node.ram_total_bytes.saturating_sub(ram_used));
    }

    if node.class == NodeClass::Unknown && vram_used > 0 {
        patch.class = Some(NodeClass::Gpu);
    }

    patch.loaded_models = Some(running.iter().cloned().map(Into::into).collect());
    patch
}
