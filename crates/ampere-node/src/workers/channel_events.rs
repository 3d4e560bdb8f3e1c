// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Channel open, close and link activity.

use ampere_core::domain::{
    Channel, ChannelEventType, ChannelPoint, ChannelStatus, ImportType, NodeServiceKey,
    NodeSettings, ServiceStatus,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ChannelEventUpdate, ClosedChannelInfo, OpenChannelInfo};
use crate::context::ServiceContext;
use crate::error::Result;
use crate::importers::Importer;
use crate::ingest::{
    add_channel_or_update_status, ensure_peer, initiator_node_id, publish_channel_event,
    record_channel_event, refresh_channel_peer,
};

use super::{StreamHandler, consume};

/// Worker for [`ampere_core::domain::NodeServiceType::ChannelEventStream`].
pub struct ChannelEventWorker {
    ctx: ServiceContext,
    key: NodeServiceKey,
}

impl ChannelEventWorker {
    /// Worker for one node.
    pub fn new(ctx: ServiceContext, key: NodeServiceKey) -> Self {
        Self { ctx, key }
    }

    /// Subscribe and process events until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let managed = self.ctx.node_settings(self.key.node_id).await?;
        let client = self.ctx.client(self.key.node_id).await?;
        let stream = client.subscribe_channel_events().await?;
        let mut handler = ChannelEventHandler {
            importer: Importer::new(self.ctx.clone()),
            ctx: self.ctx.clone(),
            managed,
        };
        consume(&self.ctx, self.key, &cancel, stream, &mut handler).await
    }
}

struct ChannelEventHandler {
    ctx: ServiceContext,
    importer: Importer,
    managed: NodeSettings,
}

#[async_trait]
impl StreamHandler<ChannelEventUpdate> for ChannelEventHandler {
    async fn handle(&mut self, update: ChannelEventUpdate) -> Result<()> {
        match &update {
            ChannelEventUpdate::Open(info) => self.open(info, &update).await,
            ChannelEventUpdate::Closed(info) => self.closed(info, &update).await,
            ChannelEventUpdate::Active(point) => {
                self.activity(point, ChannelEventType::Active, &update).await
            }
            ChannelEventUpdate::Inactive(point) => {
                self.activity(point, ChannelEventType::Inactive, &update)
                    .await
            }
            ChannelEventUpdate::PendingOpen(point) => {
                self.activity(point, ChannelEventType::PendingOpen, &update)
                    .await
            }
            ChannelEventUpdate::FullyResolved(point) => {
                self.activity(point, ChannelEventType::FullyResolved, &update)
                    .await
            }
        }
    }
}

impl ChannelEventHandler {
    async fn open(&self, info: &OpenChannelInfo, update: &ChannelEventUpdate) -> Result<()> {
        let node_id = self.managed.node_id;
        let remote = ensure_peer(&self.ctx, &self.managed, &info.remote_public_key).await?;

        let mut channel = Channel::new(
            &info.channel_point,
            info.capacity,
            node_id,
            remote,
            ChannelStatus::Open,
        );
        channel.private = info.private;
        if info.short_channel_id != 0 {
            channel.lnd_short_channel_id = Some(info.short_channel_id);
        }
        if info.initiator {
            channel.initiating_node_id = Some(node_id);
            channel.accepting_node_id = Some(remote);
        } else {
            channel.initiating_node_id = Some(remote);
            channel.accepting_node_id = Some(node_id);
        }
        let channel = add_channel_or_update_status(&self.ctx, &self.managed, channel).await?;
        refresh_channel_peer(&self.ctx, &self.managed, remote, &info.remote_public_key).await;

        record_channel_event(
            &self.ctx,
            node_id,
            channel.channel_id,
            ChannelEventType::Open,
            false,
            update,
        )
        .await?;
        info!(
            node_id,
            channel_id = channel.channel_id,
            channel_point = %info.channel_point,
            "Channel opened"
        );
        publish_channel_event(&self.ctx, node_id, &channel, ChannelEventType::Open).await;
        Ok(())
    }

    async fn closed(&self, info: &ClosedChannelInfo, update: &ChannelEventUpdate) -> Result<()> {
        let node_id = self.managed.node_id;
        let remote = ensure_peer(&self.ctx, &self.managed, &info.remote_public_key).await?;

        let mut channel = Channel::new(
            &info.channel_point,
            info.capacity,
            node_id,
            remote,
            info.close_type.into(),
        );
        if info.short_channel_id != 0 {
            channel.lnd_short_channel_id = Some(info.short_channel_id);
        }
        channel.initiating_node_id = initiator_node_id(info.open_initiator, node_id, remote);
        channel.closing_node_id = initiator_node_id(info.close_initiator, node_id, remote);
        if !info.closing_tx_hash.is_empty() {
            channel.closing_transaction_hash = Some(info.closing_tx_hash.clone());
        }
        if info.close_height != 0 {
            channel.closing_block_height = Some(info.close_height);
        }
        let channel = add_channel_or_update_status(&self.ctx, &self.managed, channel).await?;

        record_channel_event(
            &self.ctx,
            node_id,
            channel.channel_id,
            ChannelEventType::Closed,
            false,
            update,
        )
        .await?;
        refresh_channel_peer(&self.ctx, &self.managed, remote, &info.remote_public_key).await;
        self.ctx
            .caches
            .channel_states
            .set_status(node_id, channel.channel_id, ServiceStatus::Deleted)
            .await;
        info!(
            node_id,
            channel_id = channel.channel_id,
            status = ?channel.status,
            "Channel closed"
        );
        publish_channel_event(&self.ctx, node_id, &channel, ChannelEventType::Closed).await;
        Ok(())
    }

    async fn activity(
        &self,
        point: &ChannelPoint,
        event_type: ChannelEventType,
        update: &ChannelEventUpdate,
    ) -> Result<()> {
        let node_id = self.managed.node_id;
        if let Err(e) = self
            .importer
            .run(ImportType::PendingChannels, node_id, true)
            .await
        {
            warn!(node_id, error = %e, "Pending channel import failed");
        }

        let channel_id = self.ctx.caches.channels.get_channel_id_by_point(point).await;
        if channel_id == 0 {
            debug!(node_id, channel_point = %point, ?event_type, "Event for unknown channel");
            return Ok(());
        }
        match event_type {
            ChannelEventType::Active => {
                self.ctx
                    .caches
                    .channel_states
                    .set_status(node_id, channel_id, ServiceStatus::Active)
                    .await
            }
            ChannelEventType::Inactive => {
                self.ctx
                    .caches
                    .channel_states
                    .set_status(node_id, channel_id, ServiceStatus::Inactive)
                    .await
            }
            _ => {}
        }
        record_channel_event(&self.ctx, node_id, channel_id, event_type, false, update).await?;
        Ok(())
    }
}
