//! Public router surface
//!
//! Composes the backend client, registry, reliability tracker, catalog,
//! and scheduler into the five public operations: unary generation,
//! streaming generation, model listing, cluster statistics, and node
//! resource views. The router walks the scheduler's candidate list for
//! failover, records reliability for every terminated attempt, and walks
//! the fallback chain when a model keeps failing.

use crate::decision::{AttemptRecord, RouteDecision, RouteError};
use crate::scheduler::{Scheduler, SchedulerPermit};
use async_trait::async_trait;
use herd_core::{
    AttemptFailure, Backend, ChunkStream, Error, FailureKind, GenerateChunk, GenerateRequest,
    HerdConfig, ModelCatalog, ModelInfo, NodeClass, NodeId, Result,
};
use herd_state::{InFlightGuard, NodeLoad, NodeRegistry, ReliabilityStats, ReliabilityTracker};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Aggregate view of the fleet
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStats {
    pub nodes_total: usize,
    pub nodes_healthy: usize,
    pub gpu_nodes: usize,
    pub cpu_nodes: usize,
    pub in_flight_total: u32,
    pub per_node: Vec<NodeSummary>,
}

/// Per-node line in the cluster statistics
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub class: NodeClass,
    pub healthy: bool,
    pub in_flight: u32,
    pub loaded_models: usize,
    pub reliability: ReliabilityStats,
}

/// Resource state of one node
#[derive(Debug, Clone, Serialize)]
pub struct NodeResourceView {
    pub id: NodeId,
    pub address: String,
    pub class: NodeClass,
    pub healthy: bool,
    pub vram_total_bytes: u64,
    pub vram_free_bytes: u64,
    pub ram_total_bytes: u64,
    pub ram_free_bytes: u64,
    pub loaded_models: Vec<String>,
    pub in_flight: u32,
}

/// The routing core; all dependencies are injected at construction
pub struct Router {
    config: HerdConfig,
    backend: Arc<dyn Backend>,
    registry: Arc<NodeRegistry>,
    reliability: Arc<ReliabilityTracker>,
    catalog: Arc<ModelCatalog>,
    scheduler: Arc<Scheduler>,
    load: Arc<NodeLoad>,
}

impl Router {
    pub fn new(
        config: HerdConfig,
        backend: Arc<dyn Backend>,
        registry: Arc<NodeRegistry>,
        reliability: Arc<ReliabilityTracker>,
        catalog: Arc<ModelCatalog>,
        scheduler: Arc<Scheduler>,
        load: Arc<NodeLoad>,
    ) -> Self {
        Self {
            config,
            backend,
            registry,
            reliability,
            catalog,
            scheduler,
            load,
        }
    }

    /// A request template carrying the configured default routing mode
    pub fn new_request(&self, model: impl Into<String>) -> GenerateRequest {
        GenerateRequest::new(model).with_mode(self.config.routing.default_mode)
    }

    /// Unary generation with failover and fallback chains
    pub async fn generate(
        &self,
        req: GenerateRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<(GenerateChunk, RouteDecision), RouteError> {
        let mut req = req;
        let mut decision = RouteDecision::new(req.mode, req.model.clone());

        if self.registry.is_empty() {
            decision.reason = "registry is empty".into();
            return Err(RouteError::new(Error::unreachable("no known nodes"), decision));
        }

        let per_attempt = req.timeout.unwrap_or(self.config.request.timeout());
        let deadline = Instant::now() + per_attempt;

        let permit = match self
            .scheduler
            .acquire(req.priority, req.mode, deadline, cancel)
            .await
        {
            Ok(permit) => permit,
            Err(error) => {
                decision.reason = "rejected at admission".into();
                return Err(RouteError::new(error, decision));
            }
        };
        let _permit = permit;

        let mut attempts: Vec<AttemptFailure> = Vec::new();
        let mut models_tried: Vec<String> = Vec::new();

        loop {
            models_tried.push(req.model.clone());
            decision.model_used = req.model.clone();

            let candidates = match self.candidates(&req) {
                Ok(candidates) => candidates,
                Err(error) => return Err(RouteError::new(error, decision)),
            };

            for node_id in candidates {
                if Instant::now() >= deadline {
                    return Err(RouteError::new(
                        Error::deadline("request deadline reached during failover"),
                        decision,
                    ));
                }
                let Some(node) = self.registry.get(&node_id) else {
                    continue;
                };

                let attempt_timeout = per_attempt.min(deadline.saturating_duration_since(Instant::now()));
                let Some(guard) = self.scheduler.begin_attempt(&node) else {
                    continue;
                };
                let started = Instant::now();
                let result = self
                    .backend
                    .generate(&node, &req.payload, attempt_timeout, cancel)
                    .await;
                drop(guard);
                let latency = started.elapsed();

                match result {
                    Ok(chunk) => {
                        self.reliability.record_success(&node_id, latency);
                        decision
                            .candidates_tried
                            .push(AttemptRecord::success(node_id.clone()));
                        decision.reason = self.success_reason(&decision, &node_id);
                        decision.selected_node_id = Some(node_id.clone());

                        info!(
                            request_id = %req.id,
                            node_id = %node_id,
                            model = %req.model,
                            latency_ms = latency.as_millis() as u64,
                            "generate completed"
                        );
                        return Ok((chunk, decision));
                    }
                    Err(error) => {
                        if let Some(terminal) = self.note_failure(
                            &mut decision,
                            &mut attempts,
                            &node_id,
                            error,
                            latency,
                        ) {
                            return Err(RouteError::new(terminal, decision));
                        }
                    }
                }
            }

            match self.next_fallback(&req) {
                Some(next) if !models_tried.contains(&next) => {
                    info!(request_id = %req.id, from = %req.model, to = %next, "walking fallback chain");
                    decision.fallback_applied = true;
                    req.retarget_model(&next);
                }
                _ => break,
            }
        }

        decision.reason = "every candidate failed".into();
        Err(RouteError::new(
            self.exhaustion_error(attempts, models_tried, &req.model),
            decision,
        ))
    }

    /// Streaming generation
    ///
    /// The decision is finalized when the first chunk arrives: failures
    /// before it fail over like request-start failures, failures after it
    /// are terminal for the stream. The returned stream records
    /// reliability when it finishes and holds the admission permit until
    /// dropped.
    pub async fn generate_stream(
        &self,
        req: GenerateRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<(RouteStream, RouteDecision), RouteError> {
        let mut req = req;
        let mut decision = RouteDecision::new(req.mode, req.model.clone());

        if self.registry.is_empty() {
            decision.reason = "registry is empty".into();
            return Err(RouteError::new(Error::unreachable("no known nodes"), decision));
        }

        let per_attempt = req.timeout.unwrap_or(self.config.request.timeout());
        let deadline = Instant::now() + per_attempt;

        let permit = match self
            .scheduler
            .acquire(req.priority, req.mode, deadline, cancel)
            .await
        {
            Ok(permit) => permit,
            Err(error) => {
                decision.reason = "rejected at admission".into();
                return Err(RouteError::new(error, decision));
            }
        };
        let mut permit = Some(permit);

        let mut attempts: Vec<AttemptFailure> = Vec::new();
        let mut models_tried: Vec<String> = Vec::new();

        loop {
            models_tried.push(req.model.clone());
            decision.model_used = req.model.clone();

            let candidates = match self.candidates(&req) {
                Ok(candidates) => candidates,
                Err(error) => return Err(RouteError::new(error, decision)),
            };

            for node_id in candidates {
                if Instant::now() >= deadline {
                    return Err(RouteError::new(
                        Error::deadline("request deadline reached during failover"),
                        decision,
                    ));
                }
                let Some(node) = self.registry.get(&node_id) else {
                    continue;
                };

                let attempt_timeout = per_attempt.min(deadline.saturating_duration_since(Instant::now()));
                let Some(guard) = self.scheduler.begin_attempt(&node) else {
                    continue;
                };
                let started = Instant::now();

                let first = match self
                    .backend
                    .generate_stream(&node, &req.payload, attempt_timeout, cancel)
                    .await
                {
                    Ok(mut stream) => match stream.next_chunk().await {
                        Ok(Some(first)) => Ok((stream, first)),
                        Ok(None) => Err(Error::backend(
                            FailureKind::MalformedResponse,
                            "stream closed before the first chunk",
                        )),
                        Err(error) => Err(error),
                    },
                    Err(error) => Err(error),
                };
                let latency = started.elapsed();

                match first {
                    Ok((stream, first)) => {
                        decision
                            .candidates_tried
                            .push(AttemptRecord::success(node_id.clone()));
                        decision.reason = self.success_reason(&decision, &node_id);
                        decision.selected_node_id = Some(node_id.clone());

                        debug!(request_id = %req.id, node_id = %node_id, model = %req.model, "stream committed on first chunk");

                        let stream = RouteStream::new(
                            stream,
                            first,
                            node_id,
                            Arc::clone(&self.reliability),
                            started,
                            permit.take().expect("permit held until first chunk"),
                            guard,
                        );
                        return Ok((stream, decision));
                    }
                    Err(error) => {
                        drop(guard);
                        if let Some(terminal) = self.note_failure(
                            &mut decision,
                            &mut attempts,
                            &node_id,
                            error,
                            latency,
                        ) {
                            return Err(RouteError::new(terminal, decision));
                        }
                    }
                }
            }

            match self.next_fallback(&req) {
                Some(next) if !models_tried.contains(&next) => {
                    info!(request_id = %req.id, from = %req.model, to = %next, "walking fallback chain");
                    decision.fallback_applied = true;
                    req.retarget_model(&next);
                }
                _ => break,
            }
        }

        decision.reason = "every candidate failed".into();
        Err(RouteError::new(
            self.exhaustion_error(attempts, models_tried, &req.model),
            decision,
        ))
    }

    /// Models served by every healthy node; side-effect-free
    pub async fn list_models(&self) -> HashMap<NodeId, Vec<ModelInfo>> {
        let timeout = self.config.monitor.probe_timeout();
        let nodes = self.registry.nodes();

        let listings = futures::future::join_all(nodes.iter().filter(|n| n.healthy).map(
            |node| async move {
                match self.backend.tags(node, timeout).await {
                    Ok(models) => Some((node.id.clone(), models)),
                    Err(e) => {
                        debug!(node_id = %node.id, error = %e, "tags listing failed");
                        None
                    }
                }
            },
        ))
        .await;

        listings.into_iter().flatten().collect()
    }

    /// Aggregate statistics over one registry snapshot
    pub fn cluster_stats(&self) -> ClusterStats {
        let nodes = self.registry.nodes();
        let loads = self.load.snapshot();

        let per_node: Vec<NodeSummary> = nodes
            .iter()
            .map(|node| NodeSummary {
                id: node.id.clone(),
                class: node.class,
                healthy: node.healthy,
                in_flight: loads.get(&node.id).copied().unwrap_or(0),
                loaded_models: node.loaded_models.len(),
                reliability: self.reliability.stats(&node.id),
            })
            .collect();

        ClusterStats {
            nodes_total: nodes.len(),
            nodes_healthy: nodes.iter().filter(|n| n.healthy).count(),
            gpu_nodes: nodes.iter().filter(|n| n.is_gpu()).count(),
            cpu_nodes: nodes.iter().filter(|n| n.is_cpu()).count(),
            in_flight_total: per_node.iter().map(|n| n.in_flight).sum(),
            per_node,
        }
    }

    /// Resource state of every node
    pub fn node_resources(&self) -> Vec<NodeResourceView> {
        let loads = self.load.snapshot();
        self.registry
            .nodes()
            .into_iter()
            .map(|node| NodeResourceView {
                address: node.address.to_string(),
                class: node.class,
                healthy: node.healthy,
                vram_total_bytes: node.vram_total_bytes,
                vram_free_bytes: node.vram_free_bytes,
                ram_total_bytes: node.ram_total_bytes,
                ram_free_bytes: node.ram_free_bytes,
                loaded_models: node.loaded_models.iter().map(|m| m.name.clone()).collect(),
                in_flight: loads.get(&node.id).copied().unwrap_or(0),
                id: node.id,
            })
            .collect()
    }

    /// Candidate list for the request's current model
    ///
    /// A pinned request gets exactly its pinned node; a pin that is
    /// missing, unhealthy, or too small is an error, never a silent
    /// fallback.
    fn candidates(&self, req: &GenerateRequest) -> Result<Vec<NodeId>> {
        let snapshot = self.registry.snapshot();

        if let Some(pin) = &req.constraints.pin_node_id {
            let node = snapshot.get(pin).ok_or_else(|| {
                Error::unreachable(format!("pinned node {} is not registered", pin))
            })?;
            if !node.healthy {
                return Err(Error::unreachable(format!("pinned node {} is unhealthy", pin)));
            }
            if !self.catalog.fits(&req.model, node).fits {
                return Err(Error::unreachable(format!(
                    "pinned node {} cannot fit model {}",
                    pin, req.model
                )));
            }
            return Ok(vec![pin.clone()]);
        }

        Ok(self.scheduler.select_candidates(
            &req.model,
            req.mode,
            &req.constraints,
            &snapshot,
            &self.reliability,
            &self.catalog,
        ))
    }

    /// Book-keep one failed attempt. Returns the terminal error when the
    /// failure must not fail over.
    fn note_failure(
        &self,
        decision: &mut RouteDecision,
        attempts: &mut Vec<AttemptFailure>,
        node_id: &NodeId,
        error: Error,
        latency: Duration,
    ) -> Option<Error> {
        let kind = error.failure_kind().unwrap_or(FailureKind::Unreachable);

        if kind != FailureKind::Canceled {
            self.reliability
                .record_failure(node_id, kind, Some(latency));
        }
        decision
            .candidates_tried
            .push(AttemptRecord::failure(node_id.clone(), kind));
        attempts.push(AttemptFailure {
            node_id: node_id.clone(),
            kind,
            latency_ms: latency.as_millis() as u64,
        });

        if kind.marks_unhealthy() {
            warn!(node_id = %node_id, "node unreachable, marking unhealthy");
            self.registry.set_healthy(node_id, false);
        }

        if kind == FailureKind::Canceled {
            return Some(Error::Canceled);
        }
        if !kind.is_failover() {
            return Some(match kind {
                FailureKind::HttpStatus(status) => Error::BadRequest {
                    status,
                    detail: error.to_string(),
                },
                _ => error,
            });
        }

        debug!(node_id = %node_id, kind = %kind, "attempt failed, trying next candidate");
        None
    }

    /// The next smaller model on the request's fallback chain, if any
    fn next_fallback(&self, req: &GenerateRequest) -> Option<String> {
        let task = req.task_kind.as_deref()?;
        self.catalog.fallback_after(&req.model, task)
    }

    fn success_reason(&self, decision: &RouteDecision, node_id: &NodeId) -> String {
        let failures = decision.failures();
        let mut reason = format!("{} routing selected {}", decision.mode, node_id);
        if failures > 0 {
            reason.push_str(&format!(" after {} failed attempt(s)", failures));
        }
        if decision.fallback_applied {
            reason.push_str(&format!(" on fallback model {}", decision.model_used));
        }
        reason
    }

    fn exhaustion_error(
        &self,
        attempts: Vec<AttemptFailure>,
        models_tried: Vec<String>,
        model: &str,
    ) -> Error {
        if attempts.is_empty() {
            Error::unreachable(format!("no healthy candidate fits model {}", model))
        } else if models_tried.len() > 1 {
            Error::FallbackExhausted {
                models: models_tried,
                attempts,
            }
        } else {
            Error::AllCandidatesFailed(attempts)
        }
    }
}

/// A committed generate stream
///
/// Yields the first chunk that committed the route, then delegates to the
/// backend stream. Terminal: a failure after the first chunk is surfaced
/// once and never retried on another node. Reliability is recorded exactly
/// once, when the stream completes or fails; the admission permit and the
/// per-node in-flight slot are held until the stream is dropped.
pub struct RouteStream {
    inner: Box<dyn ChunkStream>,
    pending_first: Option<GenerateChunk>,
    node_id: NodeId,
    reliability: Arc<ReliabilityTracker>,
    started: Instant,
    recorded: bool,
    _permit: SchedulerPermit,
    _guard: InFlightGuard,
}

impl std::fmt::Debug for RouteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteStream")
            .field("node_id", &self.node_id)
            .field("recorded", &self.recorded)
            .finish()
    }
}

impl RouteStream {
    fn new(
        inner: Box<dyn ChunkStream>,
        first: GenerateChunk,
        node_id: NodeId,
        reliability: Arc<ReliabilityTracker>,
        started: Instant,
        permit: SchedulerPermit,
        guard: InFlightGuard,
    ) -> Self {
        Self {
            inner,
            pending_first: Some(first),
            node_id,
            reliability,
            started,
            recorded: false,
            _permit: permit,
            _guard: guard,
        }
    }

    /// Node this stream is committed to
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn record_success(&mut self) {
        if !self.recorded {
            self.recorded = true;
            self.reliability
                .record_success(&self.node_id, self.started.elapsed());
        }
    }

    fn record_failure(&mut self, error: &Error) {
        if !self.recorded {
            self.recorded = true;
            let kind = error.failure_kind().unwrap_or(FailureKind::Unreachable);
            if kind != FailureKind::Canceled {
                self.reliability
                    .record_failure(&self.node_id, kind, Some(self.started.elapsed()));
            }
        }
    }
}

#[async_trait]
impl ChunkStream for RouteStream {
    async fn next_chunk(&mut self) -> Result<Option<GenerateChunk>> {
        if let Some(first) = self.pending_first.take() {
            if first.done {
                self.record_success();
            }
            return Ok(Some(first));
        }

        match self.inner.next_chunk().await {
            Ok(Some(chunk)) => {
                if chunk.done {
                    self.record_success();
                }
                Ok(Some(chunk))
            }
            Ok(None) => {
                self.record_success();
                Ok(None)
            }
            Err(error) => {
                warn!(node_id = %self.node_id, error = %error, "stream failed mid-flight");
                self.record_failure(&error);
                Err(error)
            }
        }
    }
}
