//! # herd-core
//!
//! Core types, traits, and utilities for inferherd - a resource-aware
//! inference router for fleets of locally-hosted LLM backends.
//!
//! This crate provides the foundational data structures and interfaces that
//! are shared across all other inferherd components. It includes:
//!
//! - Node and model data structures used for routing decisions
//! - The backend protocol records (tags, running models, generate chunks)
//! - Traits implemented by the concrete backend client and its test doubles
//! - The model catalog: size estimates, fallback chains, OOM detection
//! - Configuration schema and parsing utilities
//! - Error handling types and utilities

pub mod catalog;
pub mod config;
pub mod error;
pub mod node;
pub mod protocol;
pub mod traits;
pub mod types;

// Re-export commonly used types at the crate root
pub use catalog::{FitCheck, ModelCatalog};
pub use config::{
    CatalogConfig, DiscoveryConfig, HerdConfig, MonitorConfig, ReliabilityConfig, RequestConfig,
    RoutingConfig, SchedulerConfig, SeedNode,
};
pub use error::{AttemptFailure, Error, Result};
pub use node::{LoadedModel, Node, NodeAddress};
pub use protocol::{GenerateChunk, ModelInfo, RunningModel};
pub use traits::{Backend, ChunkStream};
pub use types::{
    FailureKind, GenerateRequest, NodeClass, NodeId, Priority, RouteConstraints, RoutingMode,
};
