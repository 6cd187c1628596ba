//! Cluster composition
//!
//! Wires the concrete components together: catalog and HTTP client from
//! configuration, registry, load and reliability state, scheduler, router,
//! and the discovery and monitor background loops. Everything is injected
//! explicitly; tests swap the backend for a scripted double.

use crate::router::Router;
use crate::scheduler::Scheduler;
use herd_client::BackendClient;
use herd_core::{Backend, HerdConfig, ModelCatalog, Result};
use herd_discovery::{Discovery, HealthMonitor};
use herd_state::{NodeLoad, NodeRegistry, ReliabilityTracker};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A running inferherd instance: the router plus its background loops
pub struct Cluster {
    router: Arc<Router>,
    registry: Arc<NodeRegistry>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Cluster {
    /// Start a cluster against real HTTP backends
    ///
    /// Must be called from within a tokio runtime; discovery and the
    /// monitor are spawned as background tasks.
    pub fn start(config: HerdConfig) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(ModelCatalog::new(&config.catalog)?);
        let backend: Arc<dyn Backend> =
            Arc::new(BackendClient::new(&config.request, Arc::clone(&catalog))?);
        Self::start_with_backend(config, backend, catalog)
    }

    /// Start a cluster with an injected backend implementation
    pub fn start_with_backend(
        config: HerdConfig,
        backend: Arc<dyn Backend>,
        catalog: Arc<ModelCatalog>,
    ) -> Result<Self> {
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

        let router = Arc::new(Router::new(
            config.clone(),
            Arc::clone(&backend),
            Arc::clone(&registry),
            reliability,
            catalog,
            scheduler,
            Arc::clone(&load),
        ));

        let cancel = CancellationToken::new();
        let discovery = Arc::new(Discovery::new(
            config.discovery.clone(),
            Arc::clone(&backend),
            Arc::clone(&registry),
            Arc::clone(&load),
        ));
        let monitor = Arc::new(HealthMonitor::new(
            config.monitor.clone(),
            backend,
            Arc::clone(&registry),
        ));

        let tasks = vec![
            tokio::spawn(discovery.run(cancel.child_token())),
            tokio::spawn(monitor.run(cancel.child_token())),
        ];

        info!("cluster started");
        Ok(Self {
            router,
            registry,
            cancel,
            tasks,
        })
    }

    /// The public routing surface
    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.router)
    }

    /// The shared node registry (discovery and the monitor write to it)
    pub fn registry(&self) -> Arc<NodeRegistry> {
        Arc::clone(&self.registry)
    }

    /// Stop the background loops and wait for them to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("cluster stopped");
    }
}
