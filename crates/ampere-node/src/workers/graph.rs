// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Channel graph updates for tracked nodes and channels.

use ampere_core::cache::NodeRole;
use ampere_core::domain::{
    NodeEventRecord, NodeId, NodeKey, NodeServiceKey, NodeSettings, RoutingPolicyRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{ChannelEdgeUpdate, GraphUpdate, NodeAnnouncement};
use crate::context::ServiceContext;
use crate::error::Result;
use crate::ingest::{store_node_event_if_changed, store_routing_policy_if_changed};

use super::{StreamHandler, consume};

/// Worker for [`ampere_core::domain::NodeServiceType::GraphEventStream`].
pub struct GraphWorker {
    ctx: ServiceContext,
    key: NodeServiceKey,
}

impl GraphWorker {
    /// Worker for one node.
    pub fn new(ctx: ServiceContext, key: NodeServiceKey) -> Self {
        Self { ctx, key }
    }

    /// Subscribe and process graph updates until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let managed = self.ctx.node_settings(self.key.node_id).await?;
        let client = self.ctx.client(self.key.node_id).await?;
        let stream = client.subscribe_channel_graph().await?;
        let mut handler = GraphHandler {
            ctx: self.ctx.clone(),
            managed,
        };
        consume(&self.ctx, self.key, &cancel, stream, &mut handler).await
    }
}

struct GraphHandler {
    ctx: ServiceContext,
    managed: NodeSettings,
}

#[async_trait]
impl StreamHandler<GraphUpdate> for GraphHandler {
    async fn handle(&mut self, update: GraphUpdate) -> Result<()> {
        for announcement in update.node_updates {
            self.node_update(announcement).await?;
        }
        for edge in update.channel_updates {
            self.edge_update(edge).await?;
        }
        Ok(())
    }
}

impl GraphHandler {
    /// Tracked node id of a public key, 0 when the node is neither managed nor a channel peer.
    async fn tracked(&self, public_key: &str) -> NodeId {
        if public_key.is_empty() {
            return 0;
        }
        if public_key == self.managed.public_key {
            return self.managed.node_id;
        }
        let key = NodeKey::new(self.managed.chain, self.managed.network, public_key);
        let nodes = &self.ctx.caches.nodes;
        match nodes.get_node_id(NodeRole::AllChannelPeer, &key).await {
            0 => nodes.get_node_id(NodeRole::AllManaged, &key).await,
            node_id => node_id,
        }
    }

    async fn node_update(&self, announcement: NodeAnnouncement) -> Result<()> {
        let event_node_id = self.tracked(&announcement.public_key).await;
        if event_node_id == 0 {
            return Ok(());
        }
        let stored = store_node_event_if_changed(
            &self.ctx,
            &NodeEventRecord {
                time: Utc::now(),
                event_node_id,
                node_id: self.managed.node_id,
                alias: announcement.alias,
                color: announcement.color,
                addresses: announcement.addresses,
                features: announcement.features,
            },
        )
        .await?;
        if stored {
            debug!(node_id = self.managed.node_id, event_node_id, "Node announcement stored");
        }
        Ok(())
    }

    async fn edge_update(&self, edge: ChannelEdgeUpdate) -> Result<()> {
        let channels = &self.ctx.caches.channels;
        let mut channel_id = channels
            .get_channel_id_by_lnd_short_channel_id(edge.short_channel_id)
            .await;
        if channel_id == 0 {
            channel_id = channels.get_channel_id_by_point(&edge.channel_point).await;
        }
        let Some(channel) = channels.get_channel_settings(channel_id).await else {
            return Ok(());
        };

        let mut announcing = self.tracked(&edge.advertising_node).await;
        let mut connecting = self.tracked(&edge.connecting_node).await;
        match (announcing, connecting) {
            (0, 0) => {
                debug!(channel_id, "Edge update without endpoints");
                return Ok(());
            }
            (0, known) => announcing = channel.remote_node_id(known),
            (known, 0) => connecting = channel.remote_node_id(known),
            _ => {}
        }
        if !channel.involves(announcing) || !channel.involves(connecting) {
            debug!(channel_id, announcing, connecting, "Edge update endpoints do not match channel");
            return Ok(());
        }

        store_routing_policy_if_changed(
            &self.ctx,
            &RoutingPolicyRecord {
                time: Utc::now(),
                channel_id,
                announcing_node_id: announcing,
                connecting_node_id: connecting,
                node_id: self.managed.node_id,
                policy: edge.policy,
            },
        )
        .await?;
        if channel.involves(self.managed.node_id) {
            self.ctx
                .caches
                .channel_states
                .set_routing_policy(
                    self.managed.node_id,
                    channel_id,
                    announcing == self.managed.node_id,
                    edge.policy,
                )
                .await;
        }
        Ok(())
    }
}
