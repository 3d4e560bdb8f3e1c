// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Channel-balance cache maintenance.
//!
//! The worker rebuilds every snapshot of the node from the daemon's channel
//! list on a fixed interval. Between resyncs the invoice and payment streams
//! apply deltas. The unit is Active only while every stream it depends on is
//! Active, and a full resync runs whenever it becomes ready again.

use std::time::Duration;

use ampere_core::cache::{ChannelSnapshot, PendingHtlc, StaleChannelFields};
use ampere_core::domain::{
    ChannelId, NodeServiceKey, NodeSettings, RoutingPolicy, ServiceStatus, StateWorld,
};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{ChannelInfo, NodeClient};
use crate::context::ServiceContext;
use crate::error::{Result, with_timeout};

/// Worker for [`ampere_core::domain::NodeServiceType::ChannelBalanceCacheStream`].
pub struct ChannelBalanceWorker {
    ctx: ServiceContext,
    key: NodeServiceKey,
}

impl ChannelBalanceWorker {
    /// Worker for one node.
    pub fn new(ctx: ServiceContext, key: NodeServiceKey) -> Self {
        Self { ctx, key }
    }

    /// Resync and track readiness until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let managed = self.ctx.node_settings(self.key.node_id).await?;
        let mut ready = false;
        self.set_status(ServiceStatus::Initializing).await;

        let mut resync = tokio::time::interval(self.ctx.workers.balance_resync);
        let mut flag = tokio::time::interval_at(
            tokio::time::Instant::now() + Duration::from_millis(1),
            self.ctx.workers.balance_flag_tick,
        );
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Ok(()),

                _ = resync.tick() => {
                    self.resync(&managed).await?;
                }

                _ = flag.tick() => {
                    let active = self
                        .ctx
                        .caches
                        .services
                        .is_channel_balance_stream_active(managed.node_id)
                        .await;
                    if active != ready {
                        ready = active;
                        if active {
                            self.resync(&managed).await?;
                            self.set_status(ServiceStatus::Active).await;
                        } else {
                            self.set_status(ServiceStatus::Initializing).await;
                        }
                    }
                }
            }
        }
    }

    async fn set_status(&self, status: ServiceStatus) {
        self.ctx
            .caches
            .services
            .set_node_status(StateWorld::Current, self.key, status, None)
            .await;
    }

    /// Replace every snapshot of the node with the daemon's current view.
    async fn resync(&self, managed: &NodeSettings) -> Result<()> {
        let node_id = managed.node_id;
        let client = self.ctx.client(node_id).await?;
        let channels = with_timeout(
            "list_channels",
            self.ctx.timeouts.bulk,
            client.list_channels(),
        )
        .await?;

        let mut snapshots = Vec::with_capacity(channels.len());
        for info in &channels {
            let channel_id = self
                .ctx
                .caches
                .channels
                .get_channel_id_by_lnd_short_channel_id(info.short_channel_id)
                .await;
            if channel_id == 0 {
                debug!(node_id, channel_point = %info.channel_point, "Skipping untracked channel");
                continue;
            }
            snapshots.push(
                self.snapshot(managed, client.as_ref(), channel_id, info)
                    .await,
            );
        }

        let count = snapshots.len();
        for e in self
            .ctx
            .caches
            .channel_states
            .set_states_for_node(node_id, snapshots)
            .await
        {
            warn!(node_id, error = %e, "Channel snapshot rejected");
        }
        debug!(node_id, count, "Channel balances resynced");
        Ok(())
    }

    async fn snapshot(
        &self,
        managed: &NodeSettings,
        client: &dyn NodeClient,
        channel_id: ChannelId,
        info: &ChannelInfo,
    ) -> ChannelSnapshot {
        let remote_node_id = self
            .ctx
            .caches
            .channels
            .get_channel_settings(channel_id)
            .await
            .map(|channel| channel.remote_node_id(managed.node_id))
            .unwrap_or_default();
        let (local_routing_policy, remote_routing_policy) =
            self.policies(managed, client, info).await;

        let mut pending_htlcs = Vec::with_capacity(info.pending_htlcs.len());
        for htlc in &info.pending_htlcs {
            pending_htlcs.push(PendingHtlc {
                incoming: htlc.incoming,
                amount: htlc.amount,
                hash_lock: htlc.hash_lock.clone(),
                expiration_height: htlc.expiration_height,
                forwarding_channel_id: self
                    .ctx
                    .caches
                    .channels
                    .get_channel_id_by_lnd_short_channel_id(htlc.forwarding_channel)
                    .await,
            });
        }

        ChannelSnapshot {
            node_id: managed.node_id,
            channel_id,
            remote_node_id,
            status: ServiceStatus::Active,
            link_active: info.active,
            capacity: info.capacity,
            local_balance: info.local_balance,
            remote_balance: info.remote_balance,
            local_channel_reserve: info.local_channel_reserve,
            remote_channel_reserve: info.remote_channel_reserve,
            local_dust_limit: info.local_dust_limit,
            remote_dust_limit: info.remote_dust_limit,
            commit_fee: info.commit_fee,
            pending_htlcs,
            local_routing_policy,
            remote_routing_policy,
            stale: Some(StaleChannelFields {
                unsettled_balance: info.unsettled_balance,
                total_satoshis_sent: info.total_satoshis_sent,
                total_satoshis_received: info.total_satoshis_received,
                num_updates: info.num_updates,
                commit_weight: info.commit_weight,
                fee_per_kw: info.fee_per_kw,
            }),
            updated_on: Utc::now(),
        }
    }

    /// Local and remote policy from the graph; defaults when the lookup fails.
    async fn policies(
        &self,
        managed: &NodeSettings,
        client: &dyn NodeClient,
        info: &ChannelInfo,
    ) -> (RoutingPolicy, RoutingPolicy) {
        let chan_info = match with_timeout(
            "get_chan_info",
            self.ctx.timeouts.quick,
            client.get_chan_info(info.short_channel_id),
        )
        .await
        {
            Ok(chan_info) => chan_info,
            Err(e) => {
                warn!(
                    node_id = managed.node_id,
                    channel_point = %info.channel_point,
                    error = %e,
                    "Routing policy lookup failed"
                );
                return Default::default();
            }
        };
        let first = chan_info.node1_policy.unwrap_or_default();
        let second = chan_info.node2_policy.unwrap_or_default();
        if chan_info.node1_public_key == managed.public_key {
            (first, second)
        } else {
            (second, first)
        }
    }
}
