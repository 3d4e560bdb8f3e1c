// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Write-through helpers shared by stream workers and importers.
//!
//! Every helper stores first, then updates the caches. Publishing to the
//! trigger scheduler is left to the caller so it happens last.

use ampere_core::domain::{
    AutomationEvent, Channel, ChannelEventRecord, ChannelEventType, ChannelId,
    ChannelLifecycleEvent, ChannelPeerStatus, ChannelStatus, ConnectionStatus, Initiator,
    NodeConnectionHistoryRecord, NodeEventRecord, NodeId, NodeKey, NodeSettings,
    RoutingPolicyRecord,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::ServiceContext;
use crate::error::Result;

/// A node id and whether the node row was created by the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsuredNode {
    /// Node id.
    pub node_id: NodeId,
    /// The node was stored for the first time.
    pub created: bool,
}

/// Id of the node with `key`, storing it when new.
pub async fn ensure_node(ctx: &ServiceContext, key: &NodeKey) -> Result<EnsuredNode> {
    if let Some(node_id) = ctx.persistence.get_node_id(key).await? {
        return Ok(EnsuredNode {
            node_id,
            created: false,
        });
    }
    let node_id = ctx.persistence.add_node(key).await?;
    debug!(node_id, public_key = %key.public_key, "Stored new node");
    Ok(EnsuredNode {
        node_id,
        created: true,
    })
}

/// Node id of `public_key` on the network of `managed`. Nodes seen for the
/// first time are stored and recorded as connected.
pub async fn ensure_peer(
    ctx: &ServiceContext,
    managed: &NodeSettings,
    public_key: &str,
) -> Result<NodeId> {
    let key = NodeKey::new(managed.chain, managed.network, public_key);
    let ensured = ensure_node(ctx, &key).await?;
    if ensured.created {
        ctx.persistence
            .insert_node_connection_history(&NodeConnectionHistoryRecord {
                time: Utc::now(),
                event_node_id: ensured.node_id,
                node_id: managed.node_id,
                status: ConnectionStatus::Connected,
                address: None,
            })
            .await?;
    }
    Ok(ensured.node_id)
}

/// Settings of a peer node keyed on the managed node's network.
pub fn peer_settings(managed: &NodeSettings, node_id: NodeId, public_key: &str) -> NodeSettings {
    NodeSettings {
        node_id,
        chain: managed.chain,
        network: managed.network,
        public_key: public_key.to_string(),
        name: None,
        channel_status: None,
    }
}

/// Node id on one side of an open or close.
pub fn initiator_node_id(initiator: Initiator, local: NodeId, remote: NodeId) -> Option<NodeId> {
    match initiator {
        Initiator::Local => Some(local),
        Initiator::Remote => Some(remote),
        Initiator::Both | Initiator::Unknown => None,
    }
}

/// Store `channel` or merge it into the row stored for the same funding point,
/// then cache the result. Returns the stored channel.
///
/// A short channel id missing from both the update and the stored row is
/// looked up through the block resolver; a failed lookup leaves it empty.
pub async fn add_channel_or_update_status(
    ctx: &ServiceContext,
    managed: &NodeSettings,
    mut channel: Channel,
) -> Result<Channel> {
    channel.fill_short_channel_ids();
    let existing = ctx
        .persistence
        .get_channel_by_point(&channel.channel_point())
        .await?;
    let known = existing
        .as_ref()
        .is_some_and(|stored| stored.lnd_short_channel_id.is_some());
    if channel.lnd_short_channel_id.is_none()
        && !known
        && channel.status != ChannelStatus::Opening
    {
        resolve_short_channel_id(ctx, managed, &mut channel).await;
    }

    let stored = match existing {
        Some(mut existing) => {
            merge_channel(&mut existing, channel);
            ctx.persistence.update_channel(&existing).await?;
            existing
        }
        None => {
            channel.channel_id = ctx.persistence.add_channel(&channel).await?;
            channel
        }
    };
    ctx.caches.channels.set_channel(stored.clone()).await;
    Ok(stored)
}

async fn resolve_short_channel_id(
    ctx: &ServiceContext,
    managed: &NodeSettings,
    channel: &mut Channel,
) {
    match ctx
        .resolver
        .resolve(managed.network, &channel.channel_point())
        .await
    {
        Ok(Some(packed)) => {
            channel.lnd_short_channel_id = Some(packed);
            channel.fill_short_channel_ids();
        }
        Ok(None) => {}
        Err(e) => warn!(
            channel_point = %channel.channel_point(),
            error = %e,
            "Short channel id lookup failed"
        ),
    }
}

/// Overlay the known fields of `update` on a stored channel.
fn merge_channel(existing: &mut Channel, update: Channel) {
    // A closed channel never reopens
    if !existing.status.is_terminal() || update.status.is_terminal() {
        existing.status = update.status;
    }
    existing.capacity = update.capacity;
    existing.private = update.private;
    if update.lnd_short_channel_id.is_some() {
        existing.lnd_short_channel_id = update.lnd_short_channel_id;
        existing.short_channel_id = update.short_channel_id;
    }
    if update.funding_block_height.is_some() {
        existing.funding_block_height = update.funding_block_height;
    }
    if update.funded_on.is_some() {
        existing.funded_on = update.funded_on;
    }
    if update.initiating_node_id.is_some() {
        existing.initiating_node_id = update.initiating_node_id;
    }
    if update.accepting_node_id.is_some() {
        existing.accepting_node_id = update.accepting_node_id;
    }
    if update.closing_node_id.is_some() {
        existing.closing_node_id = update.closing_node_id;
    }
    if update.closing_transaction_hash.is_some() {
        existing.closing_transaction_hash = update.closing_transaction_hash;
    }
    if update.closing_block_height.is_some() {
        existing.closing_block_height = update.closing_block_height;
    }
    if update.closed_on.is_some() {
        existing.closed_on = update.closed_on;
    }
}

/// Re-register `peer_id` as a channel peer, active while any of its channels is open.
pub async fn refresh_channel_peer(
    ctx: &ServiceContext,
    managed: &NodeSettings,
    peer_id: NodeId,
    public_key: &str,
) {
    let open = ctx
        .caches
        .channels
        .get_channel_settings_by_node_id(peer_id)
        .await
        .iter()
        .any(|channel| !channel.status.is_terminal());
    let mut settings = peer_settings(managed, peer_id, public_key);
    settings.channel_status = Some(if open {
        ChannelPeerStatus::Active
    } else {
        ChannelPeerStatus::Inactive
    });
    ctx.caches.nodes.set_channel_peer(settings, open).await;
}

/// Store a channel event row. Imported rows are skipped when the node already
/// has a row of the same type for the channel.
pub async fn record_channel_event<P: Serialize>(
    ctx: &ServiceContext,
    node_id: NodeId,
    channel_id: ChannelId,
    event_type: ChannelEventType,
    imported: bool,
    payload: &P,
) -> Result<bool> {
    if imported
        && ctx
            .persistence
            .channel_event_exists(node_id, channel_id, event_type)
            .await?
    {
        return Ok(false);
    }
    let payload = serde_json::to_value(payload).map_err(ampere_core::CoreError::from)?;
    ctx.persistence
        .insert_channel_event(&ChannelEventRecord {
            time: Utc::now(),
            node_id,
            channel_id,
            event_type,
            imported,
            payload,
        })
        .await?;
    Ok(true)
}

/// Publish a channel lifecycle change to the trigger scheduler.
pub async fn publish_channel_event(
    ctx: &ServiceContext,
    node_id: NodeId,
    channel: &Channel,
    event_type: ChannelEventType,
) {
    ctx.caches
        .triggers
        .publish_event(AutomationEvent::Channel(ChannelLifecycleEvent {
            node_id,
            channel_id: channel.channel_id,
            event_type,
            status: channel.status,
            time: Utc::now(),
        }))
        .await;
}

/// Store a routing policy row unless it equals the latest one for the same direction.
pub async fn store_routing_policy_if_changed(
    ctx: &ServiceContext,
    record: &RoutingPolicyRecord,
) -> Result<bool> {
    let latest = ctx
        .persistence
        .latest_routing_policy(
            record.channel_id,
            record.announcing_node_id,
            record.connecting_node_id,
        )
        .await?;
    if latest.is_some_and(|latest| latest.policy == record.policy) {
        return Ok(false);
    }
    ctx.persistence.insert_routing_policy(record).await?;
    Ok(true)
}

/// Store a node announcement unless it repeats the latest one.
pub async fn store_node_event_if_changed(
    ctx: &ServiceContext,
    record: &NodeEventRecord,
) -> Result<bool> {
    let latest = ctx
        .persistence
        .latest_node_event(record.event_node_id, record.node_id)
        .await?;
    if latest.is_some_and(|latest| !record.differs_from(&latest)) {
        return Ok(false);
    }
    ctx.persistence.insert_node_event(record).await?;
    Ok(true)
}
