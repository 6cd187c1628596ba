//! Newline-delimited JSON chunk stream
//!
//! A generate stream is a sequence of JSON objects separated by newlines,
//! terminated by a `done = true` chunk or a clean connection close. The
//! stream here is lazy (bytes are pulled on demand), finite, and not
//! restartable: after the terminal chunk or the first error, every further
//! pull returns `Ok(None)`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use herd_core::{ChunkStream, Error, FailureKind, GenerateChunk, ModelCatalog, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Decoder state machine over a raw byte stream
pub struct NdjsonStream {
    inner: BoxStream<'static, Result<Bytes>>,

    /// Bytes received but not yet consumed as a full line
    buffer: Vec<u8>,

    /// Inter-chunk read deadline; exceeding it fails the stream
    idle_timeout: Duration,

    /// Caller cancellation; dropping the inner stream closes the connection
    cancel: CancellationToken,

    /// Used to classify backend-reported error text
    catalog: Arc<ModelCatalog>,

    /// Terminal `done = true` chunk observed
    finished: bool,

    /// An error was already surfaced; the stream is dead
    failed: bool,
}

impl NdjsonStream {
    pub fn new(
        inner: BoxStream<'static, Result<Bytes>>,
        idle_timeout: Duration,
        cancel: CancellationToken,
        catalog: Arc<ModelCatalog>,
    ) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            idle_timeout,
            cancel,
            catalog,
            finished: false,
            failed: false,
        }
    }

    /// Take one complete line out of the buffer, skipping blank lines
    fn take_line(&mut self) -> Option<Vec<u8>> {
        loop {
            let pos = self.buffer.iter().position(|b| *b == b'\n')?;
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    fn decode_line(&mut self, line: &[u8]) -> Result<GenerateChunk> {
        let chunk: GenerateChunk = serde_json::from_slice(line).map_err(|e| {
            self.failed = true;
            Error::backend(
                FailureKind::MalformedResponse,
                format!("undecodable stream line: {}", e),
            )
        })?;

        if let Some(error) = &chunk.error {
            self.failed = true;
            let kind = if self.catalog.looks_like_oom(error) {
                FailureKind::OomSuspected
            } else {
                FailureKind::MalformedResponse
            };
            return Err(Error::backend(kind, error.clone()));
        }

        if chunk.done {
            self.finished = true;
        }
        Ok(chunk)
    }

    /// Pull more bytes, bounded by the idle deadline and cancellation
    async fn fill(&mut self) -> Result<bool> {
        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.failed = true;
                return Err(Error::Canceled);
            }
            next = tokio::time::timeout(self.idle_timeout, self.inner.next()) => next,
        };

        match next {
            Err(_) => {
                self.failed = true;
                Err(Error::backend(
                    FailureKind::Timeout,
                    format!("no chunk within {:?}", self.idle_timeout),
                ))
            }
            Ok(None) => Ok(false),
            Ok(Some(Err(e))) => {
                self.failed = true;
                Err(e)
            }
            Ok(Some(Ok(bytes))) => {
                self.buffer.extend_from_slice(&bytes);
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl ChunkStream for NdjsonStream {
    async fn next_chunk(&mut self) -> Result<Option<GenerateChunk>> {
        if self.failed || self.finished {
            return Ok(None);
        }

        loop {
            if let Some(line) = self.take_line() {
                return self.decode_line(&line).map(Some);
            }

            if !self.fill().await? {
                // Clean close; a trailing unterminated line is still a chunk
                if !self.buffer.is_empty() {
                    let line: Vec<u8> = std::mem::take(&mut self.buffer);
                    self.finished = true;
                    return self.decode_line(&line).map(Some);
                }
                debug!("stream closed without terminal chunk");
                self.finished = true;
                return Ok(None);
            }
        }
    }
}
