//! Decoded backend wire records
//!
//! The backends speak an HTTP+JSON protocol: `GET /api/tags` lists the
//! models a node can serve, `GET /api/ps` lists the models currently
//! resident, and `POST /api/generate` produces either a single JSON object
//! or a sequence of newline-delimited JSON chunks. These records decode
//! strictly: required fields are enforced, unknown fields are ignored.

use crate::node::LoadedModel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry from a node's `tags` listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model name, e.g. `qwen2.5-coder:7b`
    pub name: String,

    /// Model size on disk, in bytes
    #[serde(default)]
    pub size: u64,
}

/// One entry from a node's running-models (`ps`) listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningModel {
    pub name: String,

    /// Total resident size in bytes
    #[serde(default)]
    pub size: u64,

    /// Portion resident in VRAM, in bytes
    #[serde(default)]
    pub size_vram: u64,

    /// When the backend will evict the model
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<RunningModel> for LoadedModel {
    fn from(m: RunningModel) -> Self {
        LoadedModel {
            name: m.name,
            size_bytes: m.size,
            vram_bytes: m.size_vram,
            expires_at: m.expires_at,
        }
    }
}

/// One decoded generate result: the whole response for unary calls, one
/// chunk of the sequence for streaming calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateChunk {
    /// Generated text fragment (may be empty on the terminal chunk)
    #[serde(default)]
    pub response: String,

    /// Terminal marker; `true` ends a stream
    pub done: bool,

    /// Backend-reported error text, if any
    #[serde(default)]
    pub error: Option<String>,

    /// Total wall time of the generation in nanoseconds (terminal chunk)
    #[serde(default)]
    pub total_duration: Option<u64>,

    /// Number of tokens evaluated (terminal chunk)
    #[serde(default)]
    pub eval_count: Option<u64>,
}

impl GenerateChunk {
    /// Whether this chunk carries a backend-reported error
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
