//! # herd-router
//!
//! The routing core of inferherd. Admission control and node selection
//! live in [`scheduler`], the public surface in [`router`], and the
//! one-call composition of every component in [`cluster`].

pub mod cluster;
pub mod decision;
pub mod router;
pub mod scheduler;

pub use cluster::Cluster;
pub use decision::{AttemptOutcome, AttemptRecord, RouteDecision, RouteError};
pub use router::{ClusterStats, NodeResourceView, NodeSummary, RouteStream, Router};
pub use scheduler::{Scheduler, SchedulerPermit};
