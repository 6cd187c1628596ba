//! Core type definitions for inferherd

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a backend node, typically `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new NodeId from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the canonical NodeId for an address
    pub fn from_addr(host: &str, port: u16) -> Self {
        Self(format!("{}:{}", host, port))
    }

    /// Get the string representation of the NodeId
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Hardware class a node advertises (or was declared with)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeClass {
    /// Node with usable GPU acceleration
    Gpu,
    /// CPU-only node
    Cpu,
    /// Class not yet determined
    Unknown,
}

impl Default for NodeClass {
    fn default() -> Self {
        NodeClass::Unknown
    }
}

impl std::str::FromStr for NodeClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gpu" => Ok(NodeClass::Gpu),
            "cpu" => Ok(NodeClass::Cpu),
            "unknown" => Ok(NodeClass::Unknown),
            _ => Err(format!("Unknown node class: {}", s)),
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeClass::Gpu => write!(f, "gpu"),
            NodeClass::Cpu => write!(f, "cpu"),
            NodeClass::Unknown => write!(f, "unknown"),
        }
    }
}

/// Routing discipline used to rank candidate nodes for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Performance-first: score nodes on load, hardware, and latency
    Fast,
    /// Stability-first: prefer nodes with proven success rates
    Reliable,
    /// Resource-efficient background work: prefer CPU nodes, queueing is fine
    Async,
}

impl Default for RoutingMode {
    fn default() -> Self {
        RoutingMode::Fast
    }
}

impl RoutingMode {
    /// Whether requests in this mode yield to interactive traffic of equal
    /// numeric priority in the scheduler queue
    pub fn is_background(&self) -> bool {
        matches!(self, RoutingMode::Async)
    }
}

impl std::str::FromStr for RoutingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(RoutingMode::Fast),
            "reliable" => Ok(RoutingMode::Reliable),
            "async" => Ok(RoutingMode::Async),
            _ => Err(format!("Unknown routing mode: {}", s)),
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingMode::Fast => write!(f, "fast"),
            RoutingMode::Reliable => write!(f, "reliable"),
            RoutingMode::Async => write!(f, "async"),
        }
    }
}

/// Request priority in `[0, 10]`; higher is dequeued first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const MAX: Priority = Priority(10);

    /// Create a priority, clamping into the valid range
    pub fn new(value: u8) -> Self {
        Self(value.min(10))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority(5)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a single failed backend attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The node could not be contacted at all
    Unreachable,
    /// The backend answered with a non-success HTTP status
    HttpStatus(u16),
    /// The attempt exceeded its per-attempt timeout
    Timeout,
    /// The backend answered with something that does not decode
    MalformedResponse,
    /// The caller canceled the request
    Canceled,
    /// The response text matched an out-of-memory pattern
    OomSuspected,
}

impl FailureKind {
    /// Whether the router should try the next candidate node after this
    /// failure. 4xx statuses and cancellation are terminal; everything else
    /// is recoverable by failover.
    pub fn is_failover(&self) -> bool {
        match self {
            FailureKind::Unreachable
            | FailureKind::Timeout
            | FailureKind::MalformedResponse
            | FailureKind::OomSuspected => true,
            FailureKind::HttpStatus(code) => *code >= 500,
            FailureKind::Canceled => false,
        }
    }

    /// Whether the failure suggests the node itself is down (as opposed to a
    /// bad response from a live node)
    pub fn marks_unhealthy(&self) -> bool {
        matches!(self, FailureKind::Unreachable)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Unreachable => write!(f, "unreachable"),
            FailureKind::HttpStatus(code) => write!(f, "http_{}", code),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::MalformedResponse => write!(f, "malformed_response"),
            FailureKind::Canceled => write!(f, "canceled"),
            FailureKind::OomSuspected => write!(f, "oom_suspected"),
        }
    }
}

/// Optional placement constraints attached to a request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteConstraints {
    /// Only consider nodes with at least this much free VRAM
    pub min_free_vram_bytes: Option<u64>,

    /// Route to exactly this node (no silent fallback)
    pub pin_node_id: Option<NodeId>,

    /// Prefer a node on the local machine when it qualifies
    pub prefer_local: bool,

    /// Override the configured RELIABLE success-rate floor
    pub min_success_rate: Option<f64>,

    /// Prefer CPU-class nodes even outside ASYNC mode
    pub prefer_cpu: bool,
}

/// A generation request as seen by the scheduler and router
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Opaque request identifier (for logs and route decisions)
    pub id: String,

    /// Model name the caller asked for
    pub model: String,

    /// Pass-through request body for the backend (prompt, parameters)
    pub payload: serde_json::Value,

    /// Whether the caller wants a chunk stream
    pub streaming: bool,

    /// Queue priority
    pub priority: Priority,

    /// Routing discipline
    pub mode: RoutingMode,

    /// Placement constraints
    pub constraints: RouteConstraints,

    /// Task tag used to look up a fallback chain; opaque to the router
    pub task_kind: Option<String>,

    /// Per-request override of the per-attempt timeout
    pub timeout: Option<Duration>,
}

impl GenerateRequest {
    /// Create a request for `model` with an empty payload and defaults
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            id: Uuid::new_v4().to_string(),
            payload: serde_json::json!({ "model": model.clone() }),
            model,
            streaming: false,
            priority: Priority::default(),
            mode: RoutingMode::default(),
            constraints: RouteConstraints::default(),
            task_kind: None,
            timeout: None,
        }
    }

    /// Set the prompt in the pass-through payload
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        if let serde_json::Value::Object(map) = &mut self.payload {
            map.insert("prompt".into(), serde_json::Value::String(prompt.into()));
        }
        self
    }

    pub fn with_mode(mut self, mode: RoutingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Priority::new(priority);
        self
    }

    pub fn with_task_kind(mut self, task_kind: impl Into<String>) -> Self {
        self.task_kind = Some(task_kind.into());
        self
    }

    pub fn with_constraints(mut self, constraints: RouteConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Swap the model on the request and in the payload (fallback chains)
    pub fn retarget_model(&mut self, model: &str) {
        self.model = model.to_string();
        if let serde_json::Value::Object(map) = &mut self.payload {
            map.insert("model".into(), serde_json::Value::String(model.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_from_addr() {
        let id = NodeId::from_addr("10.0.0.7", 11434);
        assert_eq!(id.as_str(), "10.0.0.7:11434");
        assert_eq!(id, NodeId::new("10.0.0.7:11434"));
    }

    #[test]
    fn test_node_class_parsing() {
        assert_eq!("gpu".parse::<NodeClass>().unwrap(), NodeClass::Gpu);
        assert_eq!("CPU".parse::<NodeClass>().unwrap(), NodeClass::Cpu);
        assert!("hybrid".parse::<NodeClass>().is_err());
    }

    #[test]
    fn test_routing_mode_parsing() {
        assert_eq!("fast".parse::<RoutingMode>().unwrap(), RoutingMode::Fast);
        assert_eq!(
            "reliable".parse::<RoutingMode>().unwrap(),
            RoutingMode::Reliable
        );
        assert_eq!("async".parse::<RoutingMode>().unwrap(), RoutingMode::Async);
        assert!("slow".parse::<RoutingMode>().is_err());

        assert!(RoutingMode::Async.is_background());
        assert!(!RoutingMode::Fast.is_background());
    }

    #[test]
    fn test_priority_clamps() {
        assert_eq!(Priority::new(3).value(), 3);
        assert_eq!(Priority::new(99).value(), 10);
        assert_eq!(Priority::default().value(), 5);
        assert!(Priority::new(9) > Priority::new(2));
    }

    #[test]
    fn test_failure_kind_classification() {
        assert!(FailureKind::Unreachable.is_failover());
        assert!(FailureKind::HttpStatus(503).is_failover());
        assert!(FailureKind::OomSuspected.is_failover());
        assert!(!FailureKind::HttpStatus(400).is_failover());
        assert!(!FailureKind::Canceled.is_failover());

        assert!(FailureKind::Unreachable.marks_unhealthy());
        assert!(!FailureKind::Timeout.marks_unhealthy());
    }

    #[test]
    fn test_request_retarget_model() {
        let mut req = GenerateRequest::new("big-70b").with_prompt("hello");
        assert_eq!(req.payload["model"], "big-70b");

        req.retarget_model("med-13b");
        assert_eq!(req.model, "med-13b");
        assert_eq!(req.payload["model"], "med-13b");
        assert_eq!(req.payload["prompt"], "hello");
    }
}
