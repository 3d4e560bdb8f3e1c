// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One-shot imports of daemon state.
//!
//! Every import is guarded by the node's last success time: a non-forced
//! request within the skip window returns [`ImportOutcome::Skipped`] without
//! touching the daemon.

use std::collections::BTreeMap;

use ampere_core::cache::NodeRole;
use ampere_core::domain::{
    Channel, ChannelEventType, ChannelStatus, ConnectionStatus, ImportType, Initiator,
    NodeConnectionHistoryRecord, NodeEventRecord, NodeId, NodeKey, NodeSettings,
    RoutingPolicyRecord, ServiceStatus,
};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::client::{ChannelInfo, ClosedChannelInfo, NodeClient, PendingChannel};
use crate::context::ServiceContext;
use crate::error::{Result, with_timeout};
use crate::ingest::{
    add_channel_or_update_status, ensure_peer, initiator_node_id, peer_settings,
    record_channel_event, refresh_channel_peer, store_node_event_if_changed,
    store_routing_policy_if_changed,
};

/// Result of an import request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The last success is within the skip window.
    Skipped,
    /// The import ran; carries the number of rows it looked at.
    Completed(usize),
}

/// Runs imports for managed nodes.
#[derive(Clone)]
pub struct Importer {
    ctx: ServiceContext,
}

impl Importer {
    /// Importer over the shared context.
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Run `import_type` for `node_id` unless it succeeded recently and `force` is off.
    pub async fn run(
        &self,
        import_type: ImportType,
        node_id: NodeId,
        force: bool,
    ) -> Result<ImportOutcome> {
        let services = &self.ctx.caches.services;
        if !force
            && let Some(last) = services.get_success_time(node_id, import_type).await
        {
            let age = Utc::now().signed_duration_since(last);
            if age.to_std().is_ok_and(|age| age < self.ctx.config.import_skip_window) {
                debug!(node_id, ?import_type, "Import skipped, recent success");
                return Ok(ImportOutcome::Skipped);
            }
        }

        let managed = self.ctx.node_settings(node_id).await?;
        let client = self.ctx.client(node_id).await?;
        let rows = match import_type {
            ImportType::AllChannels => self.import_all_channels(&managed, client.as_ref()).await?,
            ImportType::PendingChannels => {
                self.import_pending_channels(&managed, client.as_ref()).await?
            }
            ImportType::ChannelRoutingPolicies => {
                self.import_routing_policies(&managed, client.as_ref()).await?
            }
            ImportType::NodeInformation => {
                self.import_node_information(&managed, client.as_ref()).await?
            }
            ImportType::PeerStatus => self.import_peer_status(&managed, client.as_ref()).await?,
        };

        services
            .set_success_time(node_id, import_type, Utc::now())
            .await;
        info!(node_id, ?import_type, rows, "Import completed");
        Ok(ImportOutcome::Completed(rows))
    }

    async fn import_all_channels(
        &self,
        managed: &NodeSettings,
        client: &dyn NodeClient,
    ) -> Result<usize> {
        let bulk = self.ctx.timeouts.bulk;
        let open = with_timeout("list_channels", bulk, client.list_channels()).await?;
        let closed = with_timeout("closed_channels", bulk, client.closed_channels()).await?;

        let mut peers = BTreeMap::new();
        for info in &open {
            let remote = ensure_peer(&self.ctx, managed, &info.remote_public_key).await?;
            let channel = self.store_open_channel(managed, remote, info).await?;
            record_channel_event(
                &self.ctx,
                managed.node_id,
                channel.channel_id,
                ChannelEventType::Open,
                true,
                info,
            )
            .await?;
            peers.insert(remote, info.remote_public_key.clone());
        }
        for info in &closed {
            let remote = ensure_peer(&self.ctx, managed, &info.remote_public_key).await?;
            let channel = self.store_closed_channel(managed, remote, info).await?;
            record_channel_event(
                &self.ctx,
                managed.node_id,
                channel.channel_id,
                ChannelEventType::Closed,
                true,
                info,
            )
            .await?;
            peers.insert(remote, info.remote_public_key.clone());
        }
        for (peer_id, public_key) in &peers {
            refresh_channel_peer(&self.ctx, managed, *peer_id, public_key).await;
        }
        Ok(open.len() + closed.len())
    }

    async fn store_open_channel(
        &self,
        managed: &NodeSettings,
        remote: NodeId,
        info: &ChannelInfo,
    ) -> Result<Channel> {
        let mut channel = Channel::new(
            &info.channel_point,
            info.capacity,
            managed.node_id,
            remote,
            ChannelStatus::Open,
        );
        channel.private = info.private;
        if info.short_channel_id != 0 {
            channel.lnd_short_channel_id = Some(info.short_channel_id);
        }
        let (initiating, accepting) = if info.initiator {
            (managed.node_id, remote)
        } else {
            (remote, managed.node_id)
        };
        channel.initiating_node_id = Some(initiating);
        channel.accepting_node_id = Some(accepting);
        add_channel_or_update_status(&self.ctx, managed, channel).await
    }

    async fn store_closed_channel(
        &self,
        managed: &NodeSettings,
        remote: NodeId,
        info: &ClosedChannelInfo,
    ) -> Result<Channel> {
        let mut channel = Channel::new(
            &info.channel_point,
            info.capacity,
            managed.node_id,
            remote,
            info.close_type.into(),
        );
        if info.short_channel_id != 0 {
            channel.lnd_short_channel_id = Some(info.short_channel_id);
        }
        channel.initiating_node_id = initiator_node_id(info.open_initiator, managed.node_id, remote);
        channel.closing_node_id = initiator_node_id(info.close_initiator, managed.node_id, remote);
        if !info.closing_tx_hash.is_empty() {
            channel.closing_transaction_hash = Some(info.closing_tx_hash.clone());
        }
        if info.close_height != 0 {
            channel.closing_block_height = Some(info.close_height);
        }
        let channel = add_channel_or_update_status(&self.ctx, managed, channel).await?;
        self.ctx
            .caches
            .channel_states
            .set_status(
                managed.node_id,
                channel.channel_id,
                ServiceStatus::Deleted,
            )
            .await;
        Ok(channel)
    }

    async fn import_pending_channels(
        &self,
        managed: &NodeSettings,
        client: &dyn NodeClient,
    ) -> Result<usize> {
        let pending =
            with_timeout("pending_channels", self.ctx.timeouts.bulk, client.pending_channels())
                .await?;
        let lists = [
            (&pending.waiting_close, ChannelStatus::Closing),
            (&pending.pending_open, ChannelStatus::Opening),
            (&pending.pending_force_close, ChannelStatus::Closing),
        ];
        let mut rows = 0;
        for (list, status) in lists {
            for entry in list {
                self.store_pending_channel(managed, entry, status).await?;
                rows += 1;
            }
        }
        Ok(rows)
    }

    async fn store_pending_channel(
        &self,
        managed: &NodeSettings,
        entry: &PendingChannel,
        status: ChannelStatus,
    ) -> Result<()> {
        let remote = ensure_peer(&self.ctx, managed, &entry.remote_public_key).await?;
        let mut channel = Channel::new(
            &entry.channel_point,
            entry.capacity,
            managed.node_id,
            remote,
            status,
        );
        channel.initiating_node_id = initiator_node_id(entry.initiator, managed.node_id, remote);
        channel.accepting_node_id = match entry.initiator {
            Initiator::Local => Some(remote),
            Initiator::Remote => Some(managed.node_id),
            Initiator::Both | Initiator::Unknown => None,
        };
        if status == ChannelStatus::Closing {
            channel.closing_transaction_hash = entry.closing_tx_hash.clone();
        }
        add_channel_or_update_status(&self.ctx, managed, channel).await?;
        refresh_channel_peer(&self.ctx, managed, remote, &entry.remote_public_key).await;
        Ok(())
    }

    async fn import_routing_policies(
        &self,
        managed: &NodeSettings,
        client: &dyn NodeClient,
    ) -> Result<usize> {
        let channels = self
            .ctx
            .caches
            .channels
            .get_channel_settings_by_node_id(managed.node_id)
            .await;
        let mut rows = 0;
        for channel in channels.iter().filter(|c| !c.status.is_terminal()) {
            let Some(short_channel_id) = channel.lnd_short_channel_id else {
                continue;
            };
            let info = match with_timeout(
                "get_chan_info",
                self.ctx.timeouts.quick,
                client.get_chan_info(short_channel_id),
            )
            .await
            {
                Ok(info) => info,
                Err(e) => {
                    // Private or unannounced channels are not in the graph
                    debug!(channel_id = channel.channel_id, error = %e, "No graph edge");
                    continue;
                }
            };

            let node1 = self.lookup(managed, &info.node1_public_key).await;
            let node2 = self.lookup(managed, &info.node2_public_key).await;
            let directions = [
                (node1, node2, info.node1_policy),
                (node2, node1, info.node2_policy),
            ];
            for (announcing, connecting, policy) in directions {
                let Some(policy) = policy else { continue };
                if announcing == 0 || connecting == 0 {
                    continue;
                }
                store_routing_policy_if_changed(
                    &self.ctx,
                    &RoutingPolicyRecord {
                        time: Utc::now(),
                        channel_id: channel.channel_id,
                        announcing_node_id: announcing,
                        connecting_node_id: connecting,
                        node_id: managed.node_id,
                        policy,
                    },
                )
                .await?;
                self.ctx
                    .caches
                    .channel_states
                    .set_routing_policy(
                        managed.node_id,
                        channel.channel_id,
                        announcing == managed.node_id,
                        policy,
                    )
                    .await;
                rows += 1;
            }
        }
        Ok(rows)
    }

    async fn lookup(&self, managed: &NodeSettings, public_key: &str) -> NodeId {
        if public_key == managed.public_key {
            return managed.node_id;
        }
        let key = NodeKey::new(managed.chain, managed.network, public_key);
        let nodes = &self.ctx.caches.nodes;
        match nodes.get_node_id(NodeRole::AllChannelPeer, &key).await {
            0 => nodes.get_node_id(NodeRole::AllManaged, &key).await,
            node_id => node_id,
        }
    }

    async fn import_node_information(
        &self,
        managed: &NodeSettings,
        client: &dyn NodeClient,
    ) -> Result<usize> {
        let channels = self
            .ctx
            .caches
            .channels
            .get_channel_settings_by_node_id(managed.node_id)
            .await;
        let mut peers: Vec<NodeId> = channels
            .iter()
            .map(|channel| channel.remote_node_id(managed.node_id))
            .collect();
        peers.sort_unstable();
        peers.dedup();

        let mut rows = 0;
        for peer_id in peers {
            let Some(peer) = self.ctx.caches.nodes.get_node_settings(peer_id).await else {
                warn!(node_id = peer_id, "Channel peer missing from node cache");
                continue;
            };
            let info = match with_timeout(
                "get_node_info",
                self.ctx.timeouts.quick,
                client.get_node_info(&peer.public_key),
            )
            .await
            {
                Ok(info) => info,
                Err(e) => {
                    debug!(node_id = peer_id, error = %e, "No node announcement");
                    continue;
                }
            };
            let announcement = info.announcement;
            let stored = store_node_event_if_changed(
                &self.ctx,
                &NodeEventRecord {
                    time: Utc::now(),
                    event_node_id: peer_id,
                    node_id: managed.node_id,
                    alias: announcement.alias,
                    color: announcement.color,
                    addresses: announcement.addresses,
                    features: announcement.features,
                },
            )
            .await?;
            if stored {
                rows += 1;
            }
        }
        Ok(rows)
    }

    async fn import_peer_status(
        &self,
        managed: &NodeSettings,
        client: &dyn NodeClient,
    ) -> Result<usize> {
        let peers = with_timeout("list_peers", self.ctx.timeouts.bulk, client.list_peers()).await?;
        for peer in &peers {
            let peer_id = ensure_peer(&self.ctx, managed, &peer.public_key).await?;
            self.ctx
                .caches
                .nodes
                .set_connected_peer(peer_settings(managed, peer_id, &peer.public_key))
                .await;
            let latest = self
                .ctx
                .persistence
                .latest_node_connection_status(peer_id, managed.node_id)
                .await?;
            if latest != Some(ConnectionStatus::Connected) {
                self.ctx
                    .persistence
                    .insert_node_connection_history(&NodeConnectionHistoryRecord {
                        time: Utc::now(),
                        event_node_id: peer_id,
                        node_id: managed.node_id,
                        status: ConnectionStatus::Connected,
                        address: Some(peer.address.clone()).filter(|a| !a.is_empty()),
                    })
                    .await?;
            }
        }
        Ok(peers.len())
    }
}
