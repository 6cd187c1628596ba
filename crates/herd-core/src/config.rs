//! Configuration management for inferherd
//!
//! Provides a unified configuration system that supports YAML files,
//! environment variables, and programmatic overrides. The whole tree is
//! immutable after load and passed to components at construction.

use crate::types::{NodeClass, RoutingMode};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for inferherd
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HerdConfig {
    /// Node discovery configuration
    pub discovery: DiscoveryConfig,

    /// Health and resource monitor configuration
    pub monitor: MonitorConfig,

    /// Per-request timeout configuration
    pub request: RequestConfig,

    /// Admission control configuration
    pub scheduler: SchedulerConfig,

    /// Routing discipline configuration
    pub routing: RoutingConfig,

    /// Reliability tracking configuration
    pub reliability: ReliabilityConfig,

    /// Model catalog configuration
    pub catalog: CatalogConfig,
}

impl HerdConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables with the `INFERHERD_` prefix (highest)
    /// 2. Configuration file
    /// 3. Defaults (lowest)
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        if let Ok(config_path) = std::env::var("INFERHERD_CONFIG") {
            builder = builder.add_source(config::File::with_name(&config_path).required(false));
        } else {
            for path in &["./inferherd.yaml", "/etc/inferherd/config.yaml"] {
                builder = builder.add_source(config::File::with_name(path).required(false));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("INFERHERD")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path));

        let config = builder.build()?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.discovery.validate()?;
        self.scheduler.validate()?;
        self.routing.validate()?;
        self.reliability.validate()?;
        self.catalog.validate()?;

        Ok(())
    }
}

impl Default for HerdConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            monitor: MonitorConfig::default(),
            request: RequestConfig::default(),
            scheduler: SchedulerConfig::default(),
            routing: RoutingConfig::default(),
            reliability: ReliabilityConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

/// A statically configured backend node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedNode {
    /// Host name or IPv4 address
    pub host: String,

    /// Backend port
    #[serde(default = "default_backend_port")]
    pub port: u16,

    /// Declared hardware class; probing never downgrades a declaration
    #[serde(default)]
    pub class: NodeClass,

    /// Declared total VRAM in bytes; 0 means unknown
    #[serde(default)]
    pub vram_total_bytes: u64,

    /// Declared total RAM in bytes; 0 means unknown
    #[serde(default)]
    pub ram_total_bytes: u64,

    /// Declared request parallelism (per-node concurrency cap)
    #[serde(default)]
    pub parallelism: Option<u32>,
}

fn default_backend_port() -> u16 {
    11434
}

/// Node discovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Explicit initial node list; these entries are permanent
    pub seeds: Vec<SeedNode>,

    /// Probe the local IPv4 subnet for backends
    pub scan_local_subnet: bool,

    /// CIDR to scan (e.g. `192.168.1.0/24`); when unset and scanning is
    /// enabled, a /24 is derived from each non-loopback local address
    pub subnet: Option<String>,

    /// Per-probe timeout in milliseconds
    pub timeout_ms: u64,

    /// Consecutive missed probes before a discovered node is removed
    pub grace_failures: u32,

    /// Re-probe interval in milliseconds
    pub interval_ms: u64,
}

impl DiscoveryConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grace_failures == 0 {
            return Err(crate::Error::config("discovery.grace_failures must be > 0"));
        }
        if let Some(subnet) = &self.subnet {
            if !subnet.contains('/') {
                return Err(crate::Error::config(format!(
                    "discovery.subnet must be CIDR notation, got {}",
                    subnet
                )));
            }
        }
        Ok(())
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            scan_local_subnet: false,
            subnet: None,
            timeout_ms: 2_000,
            grace_failures: 3,
            interval_ms: 10_000,
        }
    }
}

/// Health and resource monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Health/resource refresh period in milliseconds
    pub interval_ms: u64,

    /// Timeout for monitor probes in milliseconds
    pub probe_timeout_ms: u64,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 120_000,
            probe_timeout_ms: 10_000,
        }
    }
}

/// Per-request timeout configuration
///
/// The generate timeout is deliberately enormous: a single inference on a
/// large model on CPU routinely takes many minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Per-attempt generate timeout in milliseconds
    pub timeout_ms: u64,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl RequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1_800_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Admission control configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Global in-flight request cap
    pub max_in_flight: u32,

    /// Per-node in-flight cap when the node does not report parallelism
    pub per_node_cap: u32,

    /// Waiting-queue length beyond which requests are rejected
    pub queue_soft_cap: usize,
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(crate::Error::config("scheduler.max_in_flight must be > 0"));
        }
        if self.per_node_cap == 0 {
            return Err(crate::Error::config("scheduler.per_node_cap must be > 0"));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            per_node_cap: 2,
            queue_soft_cap: 32,
        }
    }
}

/// Weights of the performance-first scoring function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastWeights {
    /// Weight of `1 / (1 + in_flight)`
    pub in_flight: f64,

    /// Bonus applied to GPU-class nodes
    pub gpu: f64,

    /// Weight of the free-VRAM ratio
    pub free_vram: f64,

    /// Bonus applied to nodes on the local machine
    pub local: f64,

    /// Weight of `1 / (1 + latency_mean_seconds)`
    pub latency: f64,

    /// Penalty weight for recently observed failures
    pub recent_failure: f64,
}

impl Default for FastWeights {
    fn default() -> Self {
        Self {
            in_flight: 1.0,
            gpu: 1.5,
            free_vram: 0.5,
            local: 0.4,
            latency: 0.6,
            recent_failure: 0.8,
        }
    }
}

/// Routing discipline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Mode used when a request does not specify one
    pub default_mode: RoutingMode,

    /// Scoring weights for FAST mode
    pub fast_weights: FastWeights,
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<()> {
        let w = &self.fast_weights;
        for (name, value) in [
            ("in_flight", w.in_flight),
            ("gpu", w.gpu),
            ("free_vram", w.free_vram),
            ("local", w.local),
            ("latency", w.latency),
            ("recent_failure", w.recent_failure),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(crate::Error::config(format!(
                    "routing.fast_weights.{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_mode: RoutingMode::Fast,
            fast_weights: FastWeights::default(),
        }
    }
}

/// Reliability tracking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Success-rate floor for RELIABLE mode
    pub min_success_rate: f64,

    /// Completed requests required before RELIABLE trusts a node's stats
    pub warm_requests: u64,

    /// Latency/outcome ring size per node
    pub latency_window: usize,
}

impl ReliabilityConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_success_rate) {
            return Err(crate::Error::config(
                "reliability.min_success_rate must be in [0, 1]",
            ));
        }
        if self.latency_window == 0 {
            return Err(crate::Error::config(
                "reliability.latency_window must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            min_success_rate: 0.95,
            warm_requests: 10,
            latency_window: 100,
        }
    }
}

/// Model catalog configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Size overrides/additions keyed by exact model name, in bytes
    pub model_sizes: HashMap<String, u64>,

    /// Fallback chains keyed by task kind, largest model first
    pub fallback_chains: HashMap<String, Vec<String>>,

    /// Regex patterns (case-insensitive) that indicate an OOM failure
    pub oom_patterns: Vec<String>,

    /// Fraction of free memory a model may occupy to be considered a fit
    pub headroom: f64,
}

impl CatalogConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.headroom) || self.headroom == 0.0 {
            return Err(crate::Error::config("catalog.headroom must be in (0, 1]"));
        }
        for (task, chain) in &self.fallback_chains {
            if chain.is_empty() {
                return Err(crate::Error::config(format!(
                    "catalog.fallback_chains.{} must not be empty",
                    task
                )));
            }
        }
        Ok(())
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            model_sizes: HashMap::new(),
            fallback_chains: HashMap::new(),
            oom_patterns: Vec::new(),
            headroom: 0.8,
        }
    }
}
