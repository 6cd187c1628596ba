//! Route decisions and route-level errors
//!
//! Every response, success or failure, carries a [`RouteDecision`]: which
//! node served the request, which candidates were tried on the way, and
//! whether the fallback chain was walked. Failures wrap the underlying
//! error together with the decision so callers can reconstruct what was
//! attempted.

use herd_core::{Error, FailureKind, NodeId, RoutingMode};
use serde::Serialize;
use std::fmt;

/// Outcome of one attempt within a routed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttemptOutcome {
    Success,
    Failed(FailureKind),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Success => write!(f, "success"),
            AttemptOutcome::Failed(kind) => write!(f, "{}", kind),
        }
    }
}

/// One tried candidate and how the attempt went
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub node_id: NodeId,
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    pub fn success(node_id: NodeId) -> Self {
        Self {
            node_id,
            outcome: AttemptOutcome::Success,
        }
    }

    pub fn failure(node_id: NodeId, kind: FailureKind) -> Self {
        Self {
            node_id,
            outcome: AttemptOutcome::Failed(kind),
        }
    }
}

/// How a request was (or was not) placed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDecision {
    /// Node that served the request; `None` when no attempt succeeded
    pub selected_node_id: Option<NodeId>,

    /// Routing discipline the request ran under
    pub mode: RoutingMode,

    /// Human-readable explanation of the placement
    pub reason: String,

    /// Every candidate attempted, in order
    pub candidates_tried: Vec<AttemptRecord>,

    /// Model that actually ran (differs from the request on fallback)
    pub model_used: String,

    /// Whether the fallback chain replaced the requested model
    pub fallback_applied: bool,
}

impl RouteDecision {
    pub fn new(mode: RoutingMode, model: impl Into<String>) -> Self {
        Self {
            selected_node_id: None,
            mode,
            reason: String::new(),
            candidates_tried: Vec::new(),
            model_used: model.into(),
            fallback_applied: false,
        }
    }

    /// Number of failed attempts so far
    pub fn failures(&self) -> usize {
        self.candidates_tried
            .iter()
            .filter(|a| a.outcome != AttemptOutcome::Success)
            .count()
    }
}

impl fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tried: Vec<String> = self
            .candidates_tried
            .iter()
            .map(|a| format!("{}={}", a.node_id, a.outcome))
            .collect();
        write!(
            f,
            "mode={} model={} selected={} fallback={} tried=[{}]",
            self.mode,
            self.model_used,
            self.selected_node_id
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "none".into()),
            self.fallback_applied,
            tried.join(", ")
        )
    }
}

/// A routing failure together with the decision that led to it
#[derive(Debug)]
pub struct RouteError {
    pub error: Error,
    pub decision: RouteDecision,
}

impl RouteError {
    pub fn new(error: Error, decision: RouteDecision) -> Self {
        Self { error, decision }
    }
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.decision)
    }
}

impl std::error::Error for RouteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_display_lists_attempts() {
        let mut decision = RouteDecision::new(RoutingMode::Fast, "med-7b");
        decision
            .candidates_tried
            .push(AttemptRecord::failure("a:11434".into(), FailureKind::Timeout));
        decision
            .candidates_tried
            .push(AttemptRecord::success("b:11434".into()));
        decision.selected_node_id = Some("b:11434".into());

        let rendered = decision.to_string();
        assert!(rendered.contains("a:11434=timeout"));
        assert!(rendered.contains("b:11434=success"));
        assert!(rendered.contains("selected=b:11434"));
        assert_eq!(decision.failures(), 1);
    }

    #[test]
    fn test_route_error_carries_decision() {
        let decision = RouteDecision::new(RoutingMode::Reliable, "med-7b");
        let err = RouteError::new(Error::unreachable("no nodes"), decision);

        assert!(err.to_string().contains("No reachable node"));
        assert!(err.to_string().contains("mode=reliable"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
