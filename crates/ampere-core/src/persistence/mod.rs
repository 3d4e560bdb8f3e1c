// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for ampere-core.
//!
//! Workers, importers and the cache bootstrap reach the relational store only
//! through the [`Persistence`] trait. Two backends implement it: PostgreSQL for
//! production deployments and SQLite for embedded use and tests.

pub mod postgres;
mod rows;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use crate::domain::{
    Channel, ChannelEventRecord, ChannelEventType, ChannelId, ChannelPoint, ConnectionStatus,
    ForwardRecord, HtlcEventRecord, InvoiceRecord, Node, NodeConnectionDetails,
    NodeConnectionHistoryRecord, NodeEventRecord, NodeId, NodeKey, PaymentRecord,
    RoutingPolicyRecord, TagId, TransactionRecord,
};
use crate::error::CoreError;

/// Association of a tag with either a node or a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagBinding {
    /// Tag attached to a node.
    Node {
        /// Tag.
        tag_id: TagId,
        /// Tagged node.
        node_id: NodeId,
    },
    /// Tag attached to a channel.
    Channel {
        /// Tag.
        tag_id: TagId,
        /// Tagged channel.
        channel_id: ChannelId,
    },
}

impl TagBinding {
    /// The bound tag.
    pub fn tag_id(&self) -> TagId {
        match self {
            Self::Node { tag_id, .. } | Self::Channel { tag_id, .. } => *tag_id,
        }
    }
}

/// Resume indexes of the invoice subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InvoiceIndexes {
    /// Highest stored add index.
    pub add_index: u64,
    /// Highest stored settle index.
    pub settle_index: u64,
}

/// Persistence interface used by workers, importers and the cache bootstrap.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    // Nodes

    /// Insert the node if its (chain, network, public key) is new and return its id.
    async fn add_node(&self, key: &NodeKey) -> Result<NodeId, CoreError>;

    async fn get_node_id(&self, key: &NodeKey) -> Result<Option<NodeId>, CoreError>;

    async fn get_node(&self, node_id: NodeId) -> Result<Option<Node>, CoreError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, CoreError>;

    // Connection details of managed nodes

    /// Insert or replace the connection details of a managed node.
    async fn set_node_connection_details(
        &self,
        details: &NodeConnectionDetails,
    ) -> Result<(), CoreError>;

    async fn get_node_connection_details(
        &self,
        node_id: NodeId,
    ) -> Result<Option<NodeConnectionDetails>, CoreError>;

    async fn list_node_connection_details(&self) -> Result<Vec<NodeConnectionDetails>, CoreError>;

    /// Remove the connection details. Returns whether a row was deleted.
    async fn remove_node_connection_details(&self, node_id: NodeId) -> Result<bool, CoreError>;

    // Channels

    /// Insert a channel, or return the id of the channel already stored for
    /// the same funding point.
    async fn add_channel(&self, channel: &Channel) -> Result<ChannelId, CoreError>;

    /// Overwrite every column of an existing channel.
    async fn update_channel(&self, channel: &Channel) -> Result<(), CoreError>;

    async fn get_channel(&self, channel_id: ChannelId) -> Result<Option<Channel>, CoreError>;

    async fn get_channel_by_point(&self, point: &ChannelPoint)
    -> Result<Option<Channel>, CoreError>;

    async fn list_channels(&self) -> Result<Vec<Channel>, CoreError>;

    // Event time series

    async fn insert_channel_event(&self, event: &ChannelEventRecord) -> Result<(), CoreError>;

    async fn channel_event_exists(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        event_type: ChannelEventType,
    ) -> Result<bool, CoreError>;

    /// Number of stored channel events of one type for a channel.
    async fn count_channel_events(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        event_type: ChannelEventType,
    ) -> Result<i64, CoreError>;

    async fn insert_node_event(&self, event: &NodeEventRecord) -> Result<(), CoreError>;

    /// Most recent node announcement of `event_node_id` seen by `node_id`.
    async fn latest_node_event(
        &self,
        event_node_id: NodeId,
        node_id: NodeId,
    ) -> Result<Option<NodeEventRecord>, CoreError>;

    async fn insert_routing_policy(&self, policy: &RoutingPolicyRecord) -> Result<(), CoreError>;

    /// Most recent policy announced by `announcing_node_id` for the channel
    /// direction towards `connecting_node_id`.
    async fn latest_routing_policy(
        &self,
        channel_id: ChannelId,
        announcing_node_id: NodeId,
        connecting_node_id: NodeId,
    ) -> Result<Option<RoutingPolicyRecord>, CoreError>;

    async fn insert_node_connection_history(
        &self,
        record: &NodeConnectionHistoryRecord,
    ) -> Result<(), CoreError>;

    async fn latest_node_connection_status(
        &self,
        event_node_id: NodeId,
        node_id: NodeId,
    ) -> Result<Option<ConnectionStatus>, CoreError>;

    /// Connection statuses recorded for a peer, oldest first.
    async fn node_connection_history(
        &self,
        event_node_id: NodeId,
        node_id: NodeId,
    ) -> Result<Vec<ConnectionStatus>, CoreError>;

    /// Insert forwards, silently skipping rows that were stored before.
    /// Returns the number of new rows.
    async fn insert_forwards(&self, forwards: &[ForwardRecord]) -> Result<u64, CoreError>;

    async fn last_forward_time(&self, node_id: NodeId) -> Result<Option<DateTime<Utc>>, CoreError>;

    async fn insert_htlc_event(&self, event: &HtlcEventRecord) -> Result<(), CoreError>;

    /// HTLC events of a managed node, oldest first.
    async fn list_htlc_events(&self, node_id: NodeId) -> Result<Vec<HtlcEventRecord>, CoreError>;

    async fn upsert_invoice(&self, invoice: &InvoiceRecord) -> Result<(), CoreError>;

    async fn last_invoice_indexes(&self, node_id: NodeId) -> Result<InvoiceIndexes, CoreError>;

    async fn upsert_payment(&self, payment: &PaymentRecord) -> Result<(), CoreError>;

    async fn last_payment_index(&self, node_id: NodeId) -> Result<u64, CoreError>;

    /// Returns whether the transaction was new.
    async fn insert_transaction(&self, transaction: &TransactionRecord) -> Result<bool, CoreError>;

    async fn last_transaction_block_height(&self, node_id: NodeId) -> Result<u32, CoreError>;

    // Tags

    async fn list_tag_bindings(&self) -> Result<Vec<TagBinding>, CoreError>;

    async fn add_tag_binding(&self, binding: &TagBinding) -> Result<(), CoreError>;

    async fn remove_tag_binding(&self, binding: &TagBinding) -> Result<(), CoreError>;

    // Settings

    async fn get_setting(&self, key: &str) -> Result<Option<String>, CoreError>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), CoreError>;
}

/// Connect to the database named by `database_url` and run its migrations.
///
/// URLs starting with `sqlite:` select the SQLite backend, anything else is
/// handed to PostgreSQL.
pub async fn connect(database_url: &str) -> Result<Arc<dyn Persistence>, CoreError> {
    if database_url.starts_with("sqlite:") {
        let persistence = SqlitePersistence::connect(database_url).await?;
        return Ok(Arc::new(persistence));
    }

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| CoreError::database("connect", e))?;
    crate::migrations::run_postgres(&pool).await?;
    Ok(Arc::new(PostgresPersistence::new(pool)))
}
