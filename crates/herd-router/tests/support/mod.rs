//! Scripted backend double and wiring helpers for router tests
#![allow(dead_code)]

use async_trait::async_trait;
use herd_core::{
    Backend, ChunkStream, Error, FailureKind, GenerateChunk, HerdConfig, ModelCatalog, ModelInfo,
    Node, NodeAddress, NodeClass, NodeId, Result, RunningModel,
};
use herd_router::{Router, Scheduler};
use herd_state::{NodeLoad, NodeRegistry, ReliabilityTracker};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const GIB: u64 = 1 << 30;

/// One scripted reaction to a generate call
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Unary success (or a single-chunk stream) with this text
    Reply(&'static str),

    /// Classified failure
    Fail(FailureKind, &'static str),

    /// Sleep, then reply; for occupying permits in concurrency tests
    Hang(Duration, &'static str),

    /// Scripted stream events
    Stream(Vec<StreamStep>),
}

#[derive(Debug, Clone)]
pub enum StreamStep {
    Chunk(&'static str),
    Done,
    Error(FailureKind),
}

/// Backend double: per-node outcome queues plus a call log
pub struct MockBackend {
    scripts: Mutex<HashMap<NodeId, VecDeque<Outcome>>>,
    tags: Mutex<HashMap<NodeId, Vec<ModelInfo>>>,

    /// `(node_id, model)` for every generate/generate_stream call
    pub calls: Mutex<Vec<(NodeId, String)>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            tags: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Queue the next outcome for a node
    pub fn script(&self, node: &str, outcome: Outcome) {
        self.scripts
            .lock()
            .entry(NodeId::from(node))
            .or_default()
            .push_back(outcome);
    }

    /// Set the node's tags listing
    pub fn set_tags(&self, node: &str, models: &[&str]) {
        self.tags.lock().insert(
            NodeId::from(node),
            models
                .iter()
                .map(|name| ModelInfo {
                    name: name.to_string(),
                    size: GIB,
                })
                .collect(),
        );
    }

    pub fn generate_calls(&self, node: &str) -> usize {
        let id = NodeId::from(node);
        self.calls.lock().iter().filter(|(n, _)| *n == id).count()
    }

    fn next_outcome(&self, node: &NodeId) -> Outcome {
        self.scripts
            .lock()
            .get_mut(node)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Outcome::Reply("ok"))
    }
}

fn reply_chunk(text: &str) -> GenerateChunk {
    GenerateChunk {
        response: text.to_string(),
        done: true,
        error: None,
        total_duration: Some(1_000_000),
        eval_count: Some(1),
    }
}

struct ScriptedStream {
    steps: VecDeque<StreamStep>,
    dead: bool,
}

#[async_trait]
impl ChunkStream for ScriptedStream {
    async fn next_chunk(&mut self) -> Result<Option<GenerateChunk>> {
        if self.dead {
            return Ok(None);
        }
        match self.steps.pop_front() {
            None => {
                self.dead = true;
                Ok(None)
            }
            Some(StreamStep::Chunk(text)) => Ok(Some(GenerateChunk {
                response: text.to_string(),
                done: false,
                error: None,
                total_duration: None,
                eval_count: None,
            })),
            Some(StreamStep::Done) => {
                self.dead = true;
                Ok(Some(reply_chunk("")))
            }
            Some(StreamStep::Error(kind)) => {
                self.dead = true;
                Err(Error::backend(kind, "scripted stream failure"))
            }
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn tags(&self, node: &Node, _timeout: Duration) -> Result<Vec<ModelInfo>> {
        Ok(self.tags.lock().get(&node.id).cloned().unwrap_or_default())
    }

    async fn running(&self, _node: &Node, _timeout: Duration) -> Result<Vec<RunningModel>> {
        Ok(Vec::new())
    }

    async fn generate(
        &self,
        node: &Node,
        payload: &serde_json::Value,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<GenerateChunk> {
        let model = payload["model"].as_str().unwrap_or_default().to_string();
        self.calls.lock().push((node.id.clone(), model));

        match self.next_outcome(&node.id) {
            Outcome::Reply(text) => Ok(reply_chunk(text)),
            Outcome::Fail(kind, detail) => Err(Error::backend(kind, detail)),
            Outcome::Hang(delay, text) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(Error::Canceled),
                    _ = tokio::time::sleep(delay) => Ok(reply_chunk(text)),
                }
            }
            Outcome::Stream(_) => panic!("stream outcome scripted for a unary call"),
        }
    }

    async fn generate_stream(
        &self,
        node: &Node,
        payload: &serde_json::Value,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<Box<dyn ChunkStream>> {
        let model = payload["model"].as_str().unwrap_or_default().to_string();
        self.calls.lock().push((node.id.clone(), model));

        match self.next_outcome(&node.id) {
            Outcome::Reply(text) => Ok(Box::new(ScriptedStream {
                steps: VecDeque::from(vec![StreamStep::Chunk(text), StreamStep::Done]),
                dead: false,
            })),
            Outcome::Fail(kind, detail) => Err(Error::backend(kind, detail)),
            Outcome::Hang(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(Box::new(ScriptedStream {
                    steps: VecDeque::from(vec![StreamStep::Chunk(text), StreamStep::Done]),
                    dead: false,
                }))
            }
            Outcome::Stream(steps) => Ok(Box::new(ScriptedStream {
                steps: VecDeque::from(steps),
                dead: false,
            })),
        }
    }
}

/// A router wired to the mock backend with direct registry access
pub struct Harness {
    pub router: Router,
    pub registry: Arc<NodeRegistry>,
    pub reliability: Arc<ReliabilityTracker>,
    pub load: Arc<NodeLoad>,
    pub scheduler: Arc<Scheduler>,
    pub backend: Arc<MockBackend>,
}

pub fn harness(config: HerdConfig) -> Harness {
    let backend = MockBackend::new();
    let catalog = Arc::new(ModelCatalog::new(&config.catalog).unwrap());
    let registry = Arc::new(NodeRegistry::new());
    let load = Arc::new(NodeLoad::new());
    let reliability = Arc::new(ReliabilityTracker::new(
        config.reliability.latency_window,
        config.reliability.warm_requests,
    ));
    let scheduler = Arc::new(Scheduler::new(
        config.scheduler.clone(),
        config.routing.clone(),
        config.reliability.clone(),
        Arc::clone(&load),
    ));

    let backend_dyn: Arc<dyn Backend> = backend.clone();
    let router = Router::new(
        config,
        backend_dyn,
        Arc::clone(&registry),
        Arc::clone(&reliability),
        catalog,
        Arc::clone(&scheduler),
        Arc::clone(&load),
    );

    Harness {
        router,
        registry,
        reliability,
        load,
        scheduler,
        backend,
    }
}

pub fn default_harness() -> Harness {
    harness(HerdConfig::default())
}

/// Register a healthy node of the given class and declared memory
pub fn add_node(
    registry: &NodeRegistry,
    host: &str,
    class: NodeClass,
    vram_total: u64,
    vram_free: u64,
    ram_total: u64,
    ram_free: u64,
) -> NodeId {
    let mut node = Node::new(NodeAddress::new(host, 11434), class);
    node.vram_total_bytes = vram_total;
    node.vram_free_bytes = vram_free;
    node.ram_total_bytes = ram_total;
    node.ram_free_bytes = ram_free;
    let id = node.id.clone();
    registry.upsert(node);
    registry.set_healthy(&id, true);
    id
}

pub fn add_gpu(registry: &NodeRegistry, host: &str, vram_free_gib: u64) -> NodeId {
    add_node(
        registry,
        host,
        NodeClass::Gpu,
        16 * GIB,
        vram_free_gib * GIB,
        32 * GIB,
        24 * GIB,
    )
}

pub fn add_cpu(registry: &NodeRegistry, host: &str, ram_free_gib: u64) -> NodeId {
    add_node(
        registry,
        host,
        NodeClass::Cpu,
        0,
        0,
        32 * GIB,
        ram_free_gib * GIB,
    )
}
