// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Peer online and offline events.

use ampere_core::domain::{
    AutomationEvent, ConnectionStatus, NodeConnectionHistoryRecord, NodeKey, NodeServiceKey,
    NodeSettings, PeerConnectionEvent,
};
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::PeerEvent;
use crate::context::ServiceContext;
use crate::error::Result;
use crate::ingest::{ensure_node, peer_settings};

use super::{StreamHandler, consume};

/// Worker for [`ampere_core::domain::NodeServiceType::PeerEventStream`].
pub struct PeerWorker {
    ctx: ServiceContext,
    key: NodeServiceKey,
}

impl PeerWorker {
    /// Worker for one node.
    pub fn new(ctx: ServiceContext, key: NodeServiceKey) -> Self {
        Self { ctx, key }
    }

    /// Subscribe and process peer events until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let managed = self.ctx.node_settings(self.key.node_id).await?;
        let client = self.ctx.client(self.key.node_id).await?;
        let stream = client.subscribe_peer_events().await?;
        let mut handler = PeerHandler {
            ctx: self.ctx.clone(),
            managed,
        };
        consume(&self.ctx, self.key, &cancel, stream, &mut handler).await
    }
}

struct PeerHandler {
    ctx: ServiceContext,
    managed: NodeSettings,
}

#[async_trait]
impl StreamHandler<PeerEvent> for PeerHandler {
    async fn handle(&mut self, event: PeerEvent) -> Result<()> {
        let node_id = self.managed.node_id;
        // The history row below is the only one written for a new peer.
        let key = NodeKey::new(self.managed.chain, self.managed.network, &event.public_key);
        let peer_id = ensure_node(&self.ctx, &key).await?.node_id;
        let status = if event.online {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        };
        let now = Utc::now();

        self.ctx
            .persistence
            .insert_node_connection_history(&NodeConnectionHistoryRecord {
                time: now,
                event_node_id: peer_id,
                node_id,
                status,
                address: None,
            })
            .await?;

        let nodes = &self.ctx.caches.nodes;
        if event.online {
            nodes
                .set_connected_peer(peer_settings(&self.managed, peer_id, &event.public_key))
                .await;
        } else {
            nodes.remove_connected_peer(peer_id).await;
        }
        self.ctx
            .caches
            .channel_states
            .set_link_status_for_peer(node_id, peer_id, event.online)
            .await;
        debug!(node_id, peer_id, ?status, "Peer connection changed");

        self.ctx
            .caches
            .triggers
            .publish_event(AutomationEvent::Peer(PeerConnectionEvent {
                node_id,
                peer_node_id: peer_id,
                status,
                time: now,
            }))
            .await;
        Ok(())
    }
}
