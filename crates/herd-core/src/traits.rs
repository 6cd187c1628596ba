//! Core traits for inferherd components
//!
//! The router composes a small set of interfaces rather than concrete
//! types: the backend client implements [`Backend`] over HTTP, and tests
//! substitute scripted doubles.

use crate::node::Node;
use crate::protocol::{GenerateChunk, ModelInfo, RunningModel};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A lazy, finite, non-restartable stream of generate chunks
///
/// `next_chunk` returns `Ok(Some(chunk))` for each decoded chunk in backend
/// order, `Ok(None)` after the terminal `done = true` chunk (or a clean
/// close), and `Err` once on I/O failure. After an error or the end of the
/// stream every subsequent pull returns `Ok(None)`; the stream cannot be
/// restarted.
#[async_trait]
pub trait ChunkStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<GenerateChunk>>;
}

/// Low-level client for one backend's HTTP+JSON protocol
///
/// Implementations perform the network call and nothing else: no registry
/// access, no reliability bookkeeping. Failures are classified through
/// [`crate::Error::Backend`] so the router can decide on failover.
#[async_trait]
pub trait Backend: Send + Sync {
    /// List the models a node can serve (`GET /api/tags`, short timeout)
    async fn tags(&self, node: &Node, timeout: Duration) -> Result<Vec<ModelInfo>>;

    /// List the models currently resident on a node (`GET /api/ps`)
    async fn running(&self, node: &Node, timeout: Duration) -> Result<Vec<RunningModel>>;

    /// Unary generation (`POST /api/generate` with `stream = false`)
    async fn generate(
        &self,
        node: &Node,
        payload: &serde_json::Value,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<GenerateChunk>;

    /// Streaming generation; the returned stream observes the same timeout
    /// as an inter-chunk read deadline and closes on cancellation
    async fn generate_stream(
        &self,
        node: &Node,
        payload: &serde_json::Value,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ChunkStream>>;
}
