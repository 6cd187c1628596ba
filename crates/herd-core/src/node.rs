//! Node data model
//!
//! A [`Node`] is one backend server in the fleet: its address, declared
//! hardware class, health flag, and the live resource state the monitor
//! keeps refreshed. Nodes are created by discovery, updated by the monitor,
//! and only ever removed after a grace window of missed probes.

use crate::types::{NodeClass, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Network address of a backend node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL for HTTP requests to this node
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Whether this address points at the local machine
    pub fn is_loopback(&self) -> bool {
        match self.host.as_str() {
            "localhost" => true,
            host => host
                .parse::<std::net::IpAddr>()
                .map(|ip| ip.is_loopback())
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A model currently resident on a node, as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedModel {
    pub name: String,

    /// Total model size in bytes
    pub size_bytes: u64,

    /// Portion of the model resident in VRAM, in bytes
    pub vram_bytes: u64,

    /// When the backend will evict the model, if it reported one
    pub expires_at: Option<DateTime<Utc>>,
}

/// One backend node and its live state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identifier, canonically `host:port`
    pub id: NodeId,

    /// Network address
    pub address: NodeAddress,

    /// Declared or inferred hardware class
    pub class: NodeClass,

    /// Whether the last probe succeeded
    pub healthy: bool,

    /// When the node was last probed (by discovery or the monitor)
    pub last_probe_at: Option<DateTime<Utc>>,

    /// When the node first became healthy in this process
    pub uptime_start_at: Option<DateTime<Utc>>,

    /// Models currently resident on the node
    pub loaded_models: Vec<LoadedModel>,

    /// Total VRAM in bytes; 0 means unknown
    pub vram_total_bytes: u64,

    /// Free VRAM in bytes; meaningful only when `vram_total_bytes > 0`
    pub vram_free_bytes: u64,

    /// Total system RAM in bytes; 0 means unknown
    pub ram_total_bytes: u64,

    /// Free system RAM in bytes; meaningful only when `ram_total_bytes > 0`
    pub ram_free_bytes: u64,

    /// Concurrency the node reports it can serve; used for the per-node cap
    pub parallelism: Option<u32>,
}

impl Node {
    /// Create a node with no observed state yet
    pub fn new(address: NodeAddress, class: NodeClass) -> Self {
        Self {
            id: NodeId::from_addr(&address.host, address.port),
            address,
            class,
            healthy: false,
            last_probe_at: None,
            uptime_start_at: None,
            loaded_models: Vec::new(),
            vram_total_bytes: 0,
            vram_free_bytes: 0,
            ram_total_bytes: 0,
            ram_free_bytes: 0,
            parallelism: None,
        }
    }

    pub fn is_gpu(&self) -> bool {
        self.class == NodeClass::Gpu
    }

    pub fn is_cpu(&self) -> bool {
        self.class == NodeClass::Cpu
    }

    /// Whether this node runs on the machine hosting the router
    pub fn is_local(&self) -> bool {
        self.address.is_loopback()
    }

    /// Whether a model is already resident on the node
    pub fn has_model_loaded(&self, model: &str) -> bool {
        self.loaded_models.iter().any(|m| m.name == model)
    }

    /// Fraction of VRAM free, or `None` when totals are unknown
    pub fn free_vram_ratio(&self) -> Option<f64> {
        if self.vram_total_bytes == 0 {
            return None;
        }
        Some(self.vram_free_bytes as f64 / self.vram_total_bytes as f64)
    }

    /// Seconds since the node first became healthy, 0 if it never has
    pub fn uptime_seconds(&self) -> i64 {
        self.uptime_start_at
            .map(|start| (Utc::now() - start).num_seconds().max(0))
            .unwrap_or(0)
    }

    /// Record a successful probe, flipping to healthy
    pub fn mark_healthy(&mut self) {
        if !self.healthy {
            self.uptime_start_at.get_or_insert_with(Utc::now);
        }
        self.healthy = true;
        self.last_probe_at = Some(Utc::now());
    }

    /// Record a failed probe, flipping to unhealthy
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
        self.last_probe_at = Some(Utc::now());
    }
}
