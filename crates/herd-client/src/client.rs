//! Backend HTTP client
//!
//! One `BackendClient` serves the whole fleet; per-call timeouts carry the
//! node-specific deadlines. Generate timeouts default to 30 minutes: a
//! single inference on a large model on CPU routinely takes that long, so
//! the client never installs a global read timeout.

use crate::stream::NdjsonStream;
use async_trait::async_trait;
use futures::StreamExt;
use herd_core::{
    Backend, ChunkStream, Error, FailureKind, GenerateChunk, ModelCatalog, ModelInfo, Node,
    RequestConfig, Result, RunningModel,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Wrapper around the `tags` listing
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// Wrapper around the running-models (`ps`) listing
#[derive(Debug, Deserialize)]
struct PsResponse {
    #[serde(default)]
    models: Vec<RunningModel>,
}

/// Concrete [`Backend`] speaking HTTP+JSON via reqwest
pub struct BackendClient {
    client: reqwest::Client,
    catalog: Arc<ModelCatalog>,
}

impl BackendClient {
    /// Create a client with the configured connect timeout and no global
    /// read timeout (per-call timeouts are passed to each operation)
    pub fn new(config: &RequestConfig, catalog: Arc<ModelCatalog>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, catalog })
    }

    /// Map a reqwest error onto a failure classification
    fn classify(err: &reqwest::Error) -> FailureKind {
        if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_decode() {
            FailureKind::MalformedResponse
        } else {
            FailureKind::Unreachable
        }
    }

    /// Turn a non-success response into a classified error, sniffing the
    /// body for OOM indicators first
    async fn status_error(&self, node: &Node, response: reqwest::Response) -> Error {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if self.catalog.looks_like_oom(&body) {
            warn!(node_id = %node.id, status, "backend response looks like OOM");
            return Error::backend(FailureKind::OomSuspected, body);
        }

        Error::backend(
            FailureKind::HttpStatus(status),
            if body.is_empty() {
                format!("HTTP {}", status)
            } else {
                body
            },
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        node: &Node,
        path: &str,
        timeout: Duration,
    ) -> Result<T> {
        let url = format!("{}{}", node.address.base_url(), path);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::backend(Self::classify(&e), e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.status_error(node, response).await);
        }

        response.json::<T>().await.map_err(|e| {
            Error::backend(
                FailureKind::MalformedResponse,
                format!("undecodable {} response: {}", path, e),
            )
        })
    }

    /// Force the `stream` flag in a pass-through payload
    fn with_stream_flag(payload: &serde_json::Value, stream: bool) -> serde_json::Value {
        let mut payload = payload.clone();
        if let serde_json::Value::Object(map) = &mut payload {
            map.insert("stream".into(), serde_json::Value::Bool(stream));
        }
        payload
    }
}

#[async_trait]
impl Backend for BackendClient {
    async fn tags(&self, node: &Node, timeout: Duration) -> Result<Vec<ModelInfo>> {
        let response: TagsResponse = self.get_json(node, "/api/tags", timeout).await?;
        Ok(response.models)
    }

    async fn running(&self, node: &Node, timeout: Duration) -> Result<Vec<RunningModel>> {
        let response: PsResponse = self.get_json(node, "/api/ps", timeout).await?;
        Ok(response.models)
    }

    async fn generate(
        &self,
        node: &Node,
        payload: &serde_json::Value,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<GenerateChunk> {
        let url = format!("{}/api/generate", node.address.base_url());
        let body = Self::with_stream_flag(payload, false);

        debug!(node_id = %node.id, "unary generate");

        let request = self.client.post(&url).timeout(timeout).json(&body).send();

        // Dropping the in-flight future on cancellation closes the
        // underlying connection.
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Canceled),
            response = request => {
                response.map_err(|e| Error::backend(Self::classify(&e), e.to_string()))?
            }
        };

        if !response.status().is_success() {
            return Err(self.status_error(node, response).await);
        }

        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Canceled),
            body = response.json::<GenerateChunk>() => {
                body.map_err(|e| {
                    Error::backend(
                        FailureKind::MalformedResponse,
                        format!("undecodable generate response: {}", e),
                    )
                })?
            }
        };

        if let Some(error) = &chunk.error {
            let kind = if self.catalog.looks_like_oom(error) {
                FailureKind::OomSuspected
            } else {
                FailureKind::MalformedResponse
            };
            return Err(Error::backend(kind, error.clone()));
        }

        Ok(chunk)
    }

    async fn generate_stream(
        &self,
        node: &Node,
        payload: &serde_json::Value,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ChunkStream>> {
        let url = format!("{}/api/generate", node.address.base_url());
        let body = Self::with_stream_flag(payload, true);

        debug!(node_id = %node.id, "streaming generate");

        // No request-level timeout here: it would cover the whole body and
        // kill long streams. The wait for headers is bounded below, and the
        // body is bounded chunk-by-chunk by the stream's idle deadline.
        let request = tokio::time::timeout(timeout, self.client.post(&url).json(&body).send());

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Canceled),
            response = request => match response {
                Err(_) => {
                    return Err(Error::backend(
                        FailureKind::Timeout,
                        format!("no response headers within {:?}", timeout),
                    ))
                }
                Ok(response) => {
                    response.map_err(|e| Error::backend(Self::classify(&e), e.to_string()))?
                }
            },
        };

        if !response.status().is_success() {
            return Err(self.status_error(node, response).await);
        }

        let bytes = response
            .bytes_stream()
            .map(|item| item.map_err(|e| Error::backend(Self::classify(&e), e.to_string())))
            .boxed();

        Ok(Box::new(NdjsonStream::new(
            bytes,
            timeout,
            cancel.clone(),
            Arc::clone(&self.catalog),
        )))
    }
}
