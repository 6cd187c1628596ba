//! # herd-client
//!
//! Low-level HTTP+JSON client for one inferherd backend node. Speaks the
//! backend protocol (`/api/tags`, `/api/ps`, `/api/generate`) and nothing
//! more: no registry access, no reliability bookkeeping. Failures come back
//! classified so the router can decide on failover.

pub mod client;
pub mod stream;

pub use client::BackendClient;
pub use stream::NdjsonStream;
