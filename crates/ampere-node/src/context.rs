// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared handles passed to every worker, importer and control verb.

use std::sync::Arc;
use std::time::Duration;

use ampere_core::domain::{NodeConnectionDetails, NodeId, NodeSettings};
use ampere_core::{Caches, Config, Persistence};

use crate::client::{Connector, NodeClient};
use crate::error::{Error, Result, with_timeout};
use crate::pool::ConnectionPool;
use crate::resolver::ShortChannelIdResolver;

/// Request deadlines.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Info, policy and status updates, signing.
    pub quick: Duration,
    /// Peer connect and disconnect.
    pub disconnect: Duration,
    /// Bulk imports, list-peers and opening a transport.
    pub bulk: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            quick: Duration::from_secs(2),
            disconnect: Duration::from_secs(10),
            bulk: Duration::from_secs(60),
        }
    }
}

/// Pacing of the pollers and the channel-balance cache.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Forwarding-history poll tick.
    pub forwards_tick: Duration,
    /// Forwards requested per page.
    pub forwards_page_size: u32,
    /// Minimum spacing of consecutive paged requests.
    pub request_interval: Duration,
    /// Payments poll tick.
    pub payments_tick: Duration,
    /// Payments requested per page.
    pub payments_page_size: u64,
    /// Full channel-balance resync interval.
    pub balance_resync: Duration,
    /// Channel-balance readiness check interval.
    pub balance_flag_tick: Duration,
    /// Maintenance import interval.
    pub maintenance_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            forwards_tick: Duration::from_secs(10),
            forwards_page_size: 50_000,
            request_interval: Duration::from_secs(1),
            payments_tick: Duration::from_secs(10),
            payments_page_size: 1_000,
            balance_resync: Duration::from_secs(150),
            balance_flag_tick: Duration::from_secs(10),
            maintenance_interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Process-scoped state every task works against.
#[derive(Clone)]
pub struct ServiceContext {
    /// Relational store.
    pub persistence: Arc<dyn Persistence>,
    /// Cache actors.
    pub caches: Caches,
    /// Daemon transports.
    pub pool: Arc<ConnectionPool>,
    /// Short channel id lookup.
    pub resolver: Arc<dyn ShortChannelIdResolver>,
    /// Static configuration.
    pub config: Arc<Config>,
    /// Worker pacing.
    pub workers: WorkerConfig,
    /// Request deadlines.
    pub timeouts: Timeouts,
}

impl ServiceContext {
    /// Context with default pacing and deadlines.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        caches: Caches,
        connector: Arc<dyn Connector>,
        resolver: Arc<dyn ShortChannelIdResolver>,
        config: Config,
    ) -> Self {
        Self {
            persistence,
            caches,
            pool: Arc::new(ConnectionPool::new(connector)),
            resolver,
            config: Arc::new(config),
            workers: WorkerConfig::default(),
            timeouts: Timeouts::default(),
        }
    }

    /// Connection details of a managed node.
    pub async fn connection_details(&self, node_id: NodeId) -> Result<NodeConnectionDetails> {
        self.caches
            .services
            .get_node_connection_details(node_id)
            .await
            .ok_or(Error::MissingConnectionDetails(node_id))
    }

    /// Pooled transport of a managed node.
    pub async fn client(&self, node_id: NodeId) -> Result<Arc<dyn NodeClient>> {
        let details = self.connection_details(node_id).await?;
        with_timeout(
            "connect",
            self.timeouts.bulk,
            self.pool
                .get(node_id, details.implementation, &details.credentials),
        )
        .await
    }

    /// Cached settings of a node.
    pub async fn node_settings(&self, node_id: NodeId) -> Result<NodeSettings> {
        self.caches
            .nodes
            .get_node_settings(node_id)
            .await
            .ok_or(Error::UnknownNode(node_id))
    }
}
