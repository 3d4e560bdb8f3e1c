// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for ampere.
//!
//! [`AmpereRuntime`] wires persistence, the cache actors, the connection pool
//! and the supervisor into an existing tokio application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ampere_core::Config;
//! use ampere_node::runtime::AmpereRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = AmpereRuntime::builder()
//!         .config(Config::from_env()?)
//!         .connector(Arc::new(MyGrpcConnector::default()))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... serve the operator surface with runtime.context() ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use ampere_core::scheduler::{LogExecutor, SchedulerConfig, TriggerExecutor};
use ampere_core::{Caches, Config, Persistence};
use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::Connector;
use crate::context::{ServiceContext, Timeouts, WorkerConfig};
use crate::resolver::{MempoolResolver, ShortChannelIdResolver};
use crate::supervisor::{ServiceRegistry, Supervisor, request_node_services};

/// Builder for creating an [`AmpereRuntime`].
#[derive(Default)]
pub struct AmpereRuntimeBuilder {
    config: Option<Config>,
    persistence: Option<Arc<dyn Persistence>>,
    connector: Option<Arc<dyn Connector>>,
    resolver: Option<Arc<dyn ShortChannelIdResolver>>,
    executor: Option<Arc<dyn TriggerExecutor>>,
    registry: Option<ServiceRegistry>,
    scheduler: SchedulerConfig,
    workers: WorkerConfig,
    timeouts: Timeouts,
}

impl AmpereRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    ///
    /// Default: [`Config::from_env`] at build time.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use an already connected persistence layer instead of connecting to
    /// the configured database URL.
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the daemon connector (required).
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the short channel id resolver.
    ///
    /// Default: [`MempoolResolver`] against the configured mempool URL.
    pub fn resolver(mut self, resolver: Arc<dyn ShortChannelIdResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the workflow executor used by the event trigger service.
    ///
    /// Default: [`LogExecutor`]
    pub fn executor(mut self, executor: Arc<dyn TriggerExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replace the service registry. The executor and scheduler settings are
    /// ignored when a registry is supplied.
    pub fn registry(mut self, registry: ServiceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the trigger scheduler timing.
    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Set the worker pacing.
    pub fn workers(mut self, workers: WorkerConfig) -> Self {
        self.workers = workers;
        self
    }

    /// Set the daemon request deadlines.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<AmpereRuntimeConfig> {
        let connector = self
            .connector
            .ok_or_else(|| anyhow::anyhow!("connector is required"))?;
        let config = match self.config {
            Some(config) => config,
            None => Config::from_env()?,
        };
        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(MempoolResolver::new(
                &config.mempool_url,
                config.resolve_off_mainnet,
            )?),
        };
        let registry = match self.registry {
            Some(registry) => registry,
            None => ServiceRegistry::with_defaults(
                self.executor.unwrap_or_else(|| Arc::new(LogExecutor)),
                self.scheduler,
            ),
        };

        Ok(AmpereRuntimeConfig {
            config,
            persistence: self.persistence,
            connector,
            resolver,
            registry,
            workers: self.workers,
            timeouts: self.timeouts,
        })
    }
}

/// Configuration for an [`AmpereRuntime`].
pub struct AmpereRuntimeConfig {
    config: Config,
    persistence: Option<Arc<dyn Persistence>>,
    connector: Arc<dyn Connector>,
    resolver: Arc<dyn ShortChannelIdResolver>,
    registry: ServiceRegistry,
    workers: WorkerConfig,
    timeouts: Timeouts,
}

impl AmpereRuntimeConfig {
    /// Connect persistence, load the caches, request the services of every
    /// managed node and start the supervisor.
    pub async fn start(self) -> Result<AmpereRuntime> {
        let persistence = match self.persistence {
            Some(persistence) => persistence,
            None => ampere_core::persistence::connect(&self.config.database_url).await?,
        };

        let cache_cancel = CancellationToken::new();
        let (caches, cache_tasks) = Caches::spawn(&cache_cancel);
        let summary = caches.bootstrap(persistence.as_ref()).await?;
        caches.services.init_states().await;

        let mut ctx = ServiceContext::new(
            persistence,
            caches,
            self.connector,
            self.resolver,
            self.config,
        );
        ctx.workers = self.workers;
        ctx.timeouts = self.timeouts;

        let mut requested = 0;
        for details in ctx.caches.services.list_node_connection_details().await {
            requested += request_node_services(&ctx.caches.services, &details).await;
        }

        let service_cancel = CancellationToken::new();
        let supervisor = Supervisor::new(ctx.clone(), self.registry);
        let supervisor_handle = tokio::spawn(supervisor.run(service_cancel.clone()));

        info!(
            managed_nodes = summary.managed_nodes,
            channels = summary.channels,
            channel_peers = summary.channel_peers,
            requested_services = requested,
            "AmpereRuntime started"
        );

        Ok(AmpereRuntime {
            ctx,
            service_cancel,
            cache_cancel,
            supervisor_handle,
            cache_tasks,
        })
    }
}

/// A running ampere instance embedded in an application.
///
/// The runtime manages:
/// - the cache actors, loaded from persistence at start
/// - the supervisor and every service it starts
/// - the daemon connection pool
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct AmpereRuntime {
    ctx: ServiceContext,
    service_cancel: CancellationToken,
    cache_cancel: CancellationToken,
    supervisor_handle: JoinHandle<()>,
    cache_tasks: Vec<JoinHandle<()>>,
}

impl AmpereRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> AmpereRuntimeBuilder {
        AmpereRuntimeBuilder::new()
    }

    /// Shared context for control verbs, registration and cache reads.
    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    /// Gracefully shut down the runtime.
    ///
    /// Services are stopped first so their final status writes still reach
    /// the caches; the caches and the pooled transports go last.
    pub async fn shutdown(self) -> Result<()> {
        info!("AmpereRuntime shutting down...");

        self.service_cancel.cancel();
        if let Err(e) = self.supervisor_handle.await {
            error!(error = %e, "Supervisor task failed");
        }

        self.ctx.pool.close_all().await;

        self.cache_cancel.cancel();
        for task in self.cache_tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Cache actor task failed");
            }
        }

        info!("AmpereRuntime shutdown complete");
        Ok(())
    }
}
