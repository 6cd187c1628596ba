//! Error handling for inferherd
//!
//! Provides a unified error type and result type for use across all
//! inferherd components.

use crate::types::{FailureKind, NodeId};
use serde::{Deserialize, Serialize};

/// Result type alias for inferherd operations
pub type Result<T> = std::result::Result<T, Error>;

/// Record of one failed attempt against one candidate node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    /// Node the attempt ran against
    pub node_id: NodeId,

    /// How the attempt failed
    pub kind: FailureKind,

    /// How long the attempt ran before failing, in milliseconds
    pub latency_ms: u64,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} after {}ms", self.node_id, self.kind, self.latency_ms)
    }
}

/// Unified error type for inferherd
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No node could be contacted (or the registry is empty)
    #[error("No reachable node: {0}")]
    NodeUnreachable(String),

    /// The scheduler's waiting queue exceeded its soft cap
    #[error("Router overloaded: {0}")]
    Overloaded(String),

    /// The caller canceled the request
    #[error("Request canceled")]
    Canceled,

    /// The request deadline was reached before completion
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// A single attempt exceeded its per-attempt timeout
    #[error("Attempt timed out: {0}")]
    Timeout(String),

    /// Every candidate node failed; carries the per-attempt record
    #[error("All {} candidate(s) failed", .0.len())]
    AllCandidatesFailed(Vec<AttemptFailure>),

    /// Every candidate failed for every model on the fallback chain
    #[error("Fallback chain exhausted after models {models:?}")]
    FallbackExhausted {
        models: Vec<String>,
        attempts: Vec<AttemptFailure>,
    },

    /// The backend rejected the request (4xx); not retried
    #[error("Bad request (HTTP {status}): {detail}")]
    BadRequest { status: u16, detail: String },

    /// The backend produced undecodable output
    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    /// A single classified backend failure, surfaced by the client
    #[error("Backend request failed ({kind}): {detail}")]
    Backend { kind: FailureKind, detail: String },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// Internal invariant violations
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration parsing errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a no-reachable-node error
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::NodeUnreachable(msg.into())
    }

    /// Create an overloaded error
    pub fn overloaded(msg: impl Into<String>) -> Self {
        Self::Overloaded(msg.into())
    }

    /// Create a deadline-exceeded error
    pub fn deadline(msg: impl Into<String>) -> Self {
        Self::DeadlineExceeded(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a malformed-response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Create a classified backend error
    pub fn backend(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::Backend {
            kind,
            detail: detail.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The failure classification of this error, when it represents a
    /// single backend attempt
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Error::Backend { kind, .. } => Some(*kind),
            Error::Timeout(_) => Some(FailureKind::Timeout),
            Error::MalformedResponse(_) => Some(FailureKind::MalformedResponse),
            Error::Canceled => Some(FailureKind::Canceled),
            Error::BadRequest { status, .. } => Some(FailureKind::HttpStatus(*status)),
            _ => None,
        }
    }

    /// Whether the router may recover from this error by trying another node
    pub fn is_retryable(&self) -> bool {
        self.failure_kind().map(|k| k.is_failover()).unwrap_or(false)
    }

    /// Whether this error must be surfaced to the caller without failover
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Canceled
                | Error::DeadlineExceeded(_)
                | Error::BadRequest { .. }
                | Error::Overloaded(_)
        )
    }

    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::NodeUnreachable(_) => "node_unreachable",
            Error::Overloaded(_) => "overloaded",
            Error::Canceled => "canceled",
            Error::DeadlineExceeded(_) => "deadline_exceeded",
            Error::Timeout(_) => "timeout",
            Error::AllCandidatesFailed(_) => "all_candidates_failed",
            Error::FallbackExhausted { .. } => "fallback_exhausted",
            Error::BadRequest { .. } => "bad_request",
            Error::MalformedResponse(_) => "malformed_response",
            Error::Backend { .. } => "backend",
            Error::InvalidConfiguration(_) => "configuration",
            Error::Internal(_) => "internal",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config(_) => "config",
            Error::Other(_) => "other",
        }
    }
}
