// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Channel settings and lookup indexes.
//!
//! Short channel ids and funding points are indexed twice: once for channels
//! that are not closed ("active") and once for every channel ever seen ("all").
//! A channel entering a terminal status leaves the active indexes but stays in
//! the all-time ones.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::domain::short_channel_id::packed_to_text;
use crate::domain::{Channel, ChannelId, ChannelPoint, ChannelStatus, NodeId};

use super::{Actor, ask, spawn_actor, tell};

const NAME: &str = "channels";

pub(crate) enum ChannelCommand {
    IdByShortChannelId {
        short_channel_id: String,
        include_closed: bool,
        reply: oneshot::Sender<ChannelId>,
    },
    IdByChannelPoint {
        channel_point: String,
        include_closed: bool,
        reply: oneshot::Sender<ChannelId>,
    },
    IdsByNodeId {
        node_id: NodeId,
        reply: oneshot::Sender<Vec<ChannelId>>,
    },
    Status {
        channel_id: ChannelId,
        reply: oneshot::Sender<Option<ChannelStatus>>,
    },
    Settings {
        channel_id: ChannelId,
        reply: oneshot::Sender<Option<Channel>>,
    },
    SettingsByNodeId {
        node_id: NodeId,
        reply: oneshot::Sender<Vec<Channel>>,
    },
    SetChannel(Box<Channel>),
    SetStatus {
        channel_id: ChannelId,
        status: ChannelStatus,
    },
}

#[derive(Default)]
struct ChannelActor {
    settings: HashMap<ChannelId, Channel>,
    open_by_short_channel_id: HashMap<String, ChannelId>,
    all_by_short_channel_id: HashMap<String, ChannelId>,
    open_by_channel_point: HashMap<String, ChannelId>,
    all_by_channel_point: HashMap<String, ChannelId>,
    status: HashMap<ChannelId, ChannelStatus>,
}

impl ChannelActor {
    fn set_channel(&mut self, mut channel: Channel) {
        if channel.channel_id == 0 {
            error!(
                channel_point = %channel.channel_point(),
                "Refusing to cache a channel without a channel id"
            );
            return;
        }
        channel.fill_short_channel_ids();

        let channel_id = channel.channel_id;
        let channel_point = channel.channel_point().to_string();
        let short_channel_id = channel
            .short_channel_id
            .clone()
            .filter(|scid| !scid.is_empty());

        if let Some(scid) = &short_channel_id {
            self.all_by_short_channel_id.insert(scid.clone(), channel_id);
        }
        self.all_by_channel_point
            .insert(channel_point.clone(), channel_id);

        if channel.status.is_terminal() {
            if let Some(scid) = &short_channel_id {
                self.open_by_short_channel_id.remove(scid);
            }
            self.open_by_channel_point.remove(&channel_point);
        } else {
            if let Some(scid) = short_channel_id {
                self.open_by_short_channel_id.insert(scid, channel_id);
            }
            self.open_by_channel_point.insert(channel_point, channel_id);
        }

        self.status.insert(channel_id, channel.status);
        self.settings.insert(channel_id, channel);
    }

    fn set_status(&mut self, channel_id: ChannelId, status: ChannelStatus) {
        if channel_id == 0 {
            error!("Refusing to update the status of channel id 0");
            return;
        }
        self.status.insert(channel_id, status);

        let Some(settings) = self.settings.get_mut(&channel_id) else {
            return;
        };
        if status.is_terminal() {
            // Channels without a short channel id only have a funding point to remove
            if let Some(scid) = settings.short_channel_id.as_deref().filter(|s| !s.is_empty()) {
                self.open_by_short_channel_id.remove(scid);
            }
            self.open_by_channel_point
                .remove(&settings.channel_point().to_string());
        }
        settings.status = status;
    }
}

impl Actor for ChannelActor {
    type Command = ChannelCommand;
    const NAME: &'static str = NAME;

    fn handle(&mut self, command: ChannelCommand) {
        match command {
            ChannelCommand::IdByShortChannelId {
                short_channel_id,
                include_closed,
                reply,
            } => {
                let index = if include_closed {
                    &self.all_by_short_channel_id
                } else {
                    &self.open_by_short_channel_id
                };
                let _ = reply.send(index.get(&short_channel_id).copied().unwrap_or_default());
            }
            ChannelCommand::IdByChannelPoint {
                channel_point,
                include_closed,
                reply,
            } => {
                let index = if include_closed {
                    &self.all_by_channel_point
                } else {
                    &self.open_by_channel_point
                };
                let _ = reply.send(index.get(&channel_point).copied().unwrap_or_default());
            }
            ChannelCommand::IdsByNodeId { node_id, reply } => {
                let ids = self
                    .settings
                    .values()
                    .filter(|channel| channel.involves(node_id))
                    .map(|channel| channel.channel_id)
                    .collect();
                let _ = reply.send(ids);
            }
            ChannelCommand::Status { channel_id, reply } => {
                let _ = reply.send(self.status.get(&channel_id).copied());
            }
            ChannelCommand::Settings { channel_id, reply } => {
                let _ = reply.send(self.settings.get(&channel_id).cloned());
            }
            ChannelCommand::SettingsByNodeId { node_id, reply } => {
                let channels = self
                    .settings
                    .values()
                    .filter(|channel| channel.involves(node_id))
                    .cloned()
                    .collect();
                let _ = reply.send(channels);
            }
            ChannelCommand::SetChannel(channel) => self.set_channel(*channel),
            ChannelCommand::SetStatus { channel_id, status } => {
                self.set_status(channel_id, status)
            }
        }
    }
}

/// Handle to the channels cache actor.
#[derive(Clone)]
pub struct ChannelCache {
    tx: mpsc::Sender<ChannelCommand>,
}

impl ChannelCache {
    /// Spawn the actor.
    pub fn spawn(cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, task) = spawn_actor(ChannelActor::default(), cancel);
        (Self { tx }, task)
    }

    /// Id of the non-closed channel with this short channel id, 0 when unknown.
    pub async fn get_active_channel_id_by_short_channel_id(&self, short_channel_id: &str) -> ChannelId {
        self.id_by_short_channel_id(short_channel_id, false).await
    }

    /// Id of any channel ever seen with this short channel id, 0 when unknown.
    pub async fn get_channel_id_by_short_channel_id(&self, short_channel_id: &str) -> ChannelId {
        self.id_by_short_channel_id(short_channel_id, true).await
    }

    /// Same as [`Self::get_channel_id_by_short_channel_id`] for the packed form.
    pub async fn get_channel_id_by_lnd_short_channel_id(&self, packed: u64) -> ChannelId {
        if packed == 0 {
            return 0;
        }
        self.id_by_short_channel_id(&packed_to_text(packed), true)
            .await
    }

    async fn id_by_short_channel_id(&self, short_channel_id: &str, include_closed: bool) -> ChannelId {
        if short_channel_id.is_empty() {
            return 0;
        }
        let short_channel_id = short_channel_id.to_string();
        ask(&self.tx, NAME, |reply| ChannelCommand::IdByShortChannelId {
            short_channel_id,
            include_closed,
            reply,
        })
        .await
    }

    /// Id of the non-closed channel funded by `channel_point` (`txid:vout`), 0 when unknown.
    pub async fn get_active_channel_id_by_channel_point(&self, channel_point: &str) -> ChannelId {
        self.id_by_channel_point(channel_point, false).await
    }

    /// Id of any channel ever funded by `channel_point` (`txid:vout`), 0 when unknown.
    pub async fn get_channel_id_by_channel_point(&self, channel_point: &str) -> ChannelId {
        self.id_by_channel_point(channel_point, true).await
    }

    async fn id_by_channel_point(&self, channel_point: &str, include_closed: bool) -> ChannelId {
        if channel_point.is_empty() {
            return 0;
        }
        let channel_point = channel_point.to_string();
        ask(&self.tx, NAME, |reply| ChannelCommand::IdByChannelPoint {
            channel_point,
            include_closed,
            reply,
        })
        .await
    }

    /// Convenience wrapper over [`Self::get_channel_id_by_channel_point`].
    pub async fn get_channel_id_by_point(&self, point: &ChannelPoint) -> ChannelId {
        self.get_channel_id_by_channel_point(&point.to_string()).await
    }

    /// Ids of every channel where `node_id` is one of the endpoints, in no particular order.
    pub async fn get_channel_ids_by_node_id(&self, node_id: NodeId) -> Vec<ChannelId> {
        if node_id == 0 {
            error!("Channel lookup by node id 0");
            return Vec::new();
        }
        ask(&self.tx, NAME, |reply| ChannelCommand::IdsByNodeId { node_id, reply }).await
    }

    /// Cached status of the channel.
    pub async fn get_channel_status(&self, channel_id: ChannelId) -> Option<ChannelStatus> {
        if channel_id == 0 {
            return None;
        }
        ask(&self.tx, NAME, |reply| ChannelCommand::Status { channel_id, reply }).await
    }

    /// Cached settings of the channel.
    pub async fn get_channel_settings(&self, channel_id: ChannelId) -> Option<Channel> {
        if channel_id == 0 {
            return None;
        }
        ask(&self.tx, NAME, |reply| ChannelCommand::Settings { channel_id, reply }).await
    }

    /// Settings of every channel of `node_id`, open or closed.
    pub async fn get_channel_settings_by_node_id(&self, node_id: NodeId) -> Vec<Channel> {
        if node_id == 0 {
            error!("Channel settings lookup by node id 0");
            return Vec::new();
        }
        ask(&self.tx, NAME, |reply| ChannelCommand::SettingsByNodeId { node_id, reply }).await
    }

    /// Cache a channel, replacing its previous settings.
    pub async fn set_channel(&self, channel: Channel) {
        tell(&self.tx, NAME, ChannelCommand::SetChannel(Box::new(channel))).await
    }

    /// Update the status of a cached channel.
    pub async fn set_channel_status(&self, channel_id: ChannelId, status: ChannelStatus) {
        tell(&self.tx, NAME, ChannelCommand::SetStatus { channel_id, status }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXID: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SCID: &str = "772125x1829x3";

    fn channel(channel_id: ChannelId, vout: u32, status: ChannelStatus) -> Channel {
        let mut channel = Channel::new(&ChannelPoint::new(TXID, vout), 1_000_000, 1, 2, status);
        channel.channel_id = channel_id;
        channel
    }

    fn spawn() -> ChannelCache {
        ChannelCache::spawn(CancellationToken::new()).0
    }

    #[tokio::test]
    async fn test_open_channel_is_in_both_indexes() {
        let cache = spawn();
        let mut open = channel(7, 0, ChannelStatus::Open);
        open.short_channel_id = Some(SCID.to_string());
        cache.set_channel(open).await;

        let point = format!("{}:0", TXID);
        assert_eq!(cache.get_active_channel_id_by_channel_point(&point).await, 7);
        assert_eq!(cache.get_channel_id_by_channel_point(&point).await, 7);
        assert_eq!(cache.get_active_channel_id_by_short_channel_id(SCID).await, 7);
        assert_eq!(cache.get_channel_id_by_short_channel_id(SCID).await, 7);
        assert_eq!(
            cache
                .get_channel_id_by_lnd_short_channel_id(848_960_415_716_409_347)
                .await,
            7
        );
        assert_eq!(cache.get_channel_status(7).await, Some(ChannelStatus::Open));
    }

    #[tokio::test]
    async fn test_write_terminal_channel_keeps_only_all_indexes() {
        let cache = spawn();
        let mut closed = channel(8, 1, ChannelStatus::CooperativeClosed);
        closed.lnd_short_channel_id = Some(848_960_415_716_409_347);
        cache.set_channel(closed).await;

        let point = format!("{}:1", TXID);
        assert_eq!(cache.get_active_channel_id_by_channel_point(&point).await, 0);
        assert_eq!(cache.get_channel_id_by_channel_point(&point).await, 8);
        assert_eq!(cache.get_active_channel_id_by_short_channel_id(SCID).await, 0);
        assert_eq!(cache.get_channel_id_by_short_channel_id(SCID).await, 8);

        let settings = cache.get_channel_settings(8).await.unwrap();
        assert_eq!(settings.short_channel_id.as_deref(), Some(SCID));
    }

    #[tokio::test]
    async fn test_terminal_status_removes_active_indexes() {
        let cache = spawn();
        let mut open = channel(9, 2, ChannelStatus::Open);
        open.short_channel_id = Some(SCID.to_string());
        cache.set_channel(open).await;

        cache
            .set_channel_status(9, ChannelStatus::RemoteForceClosed)
            .await;

        let point = format!("{}:2", TXID);
        assert_eq!(cache.get_active_channel_id_by_channel_point(&point).await, 0);
        assert_eq!(cache.get_channel_id_by_channel_point(&point).await, 9);
        assert_eq!(cache.get_active_channel_id_by_short_channel_id(SCID).await, 0);
        assert_eq!(cache.get_channel_id_by_short_channel_id(SCID).await, 9);
        assert_eq!(
            cache.get_channel_settings(9).await.unwrap().status,
            ChannelStatus::RemoteForceClosed
        );
    }

    #[tokio::test]
    async fn test_terminal_status_without_short_channel_id() {
        let cache = spawn();
        cache.set_channel(channel(10, 3, ChannelStatus::Opening)).await;

        cache
            .set_channel_status(10, ChannelStatus::FundingCancelledClosed)
            .await;

        let point = format!("{}:3", TXID);
        assert_eq!(cache.get_active_channel_id_by_channel_point(&point).await, 0);
        assert_eq!(cache.get_channel_id_by_channel_point(&point).await, 10);
    }

    #[tokio::test]
    async fn test_bad_input_yields_zero_values() {
        let cache = spawn();
        cache.set_channel(channel(0, 4, ChannelStatus::Open)).await;

        assert_eq!(
            cache
                .get_channel_id_by_channel_point(&format!("{}:4", TXID))
                .await,
            0
        );
        assert_eq!(cache.get_channel_id_by_short_channel_id("").await, 0);
        assert_eq!(cache.get_channel_id_by_lnd_short_channel_id(0).await, 0);
        assert_eq!(cache.get_channel_status(0).await, None);
        assert!(cache.get_channel_ids_by_node_id(0).await.is_empty());
    }

    #[tokio::test]
    async fn test_channels_by_node_id() {
        let cache = spawn();
        cache.set_channel(channel(11, 5, ChannelStatus::Open)).await;
        let mut other = channel(12, 6, ChannelStatus::Open);
        other.first_node_id = 3;
        other.second_node_id = 4;
        cache.set_channel(other).await;

        let mut ids = cache.get_channel_ids_by_node_id(2).await;
        ids.sort();
        assert_eq!(ids, vec![11]);
        assert_eq!(cache.get_channel_settings_by_node_id(4).await.len(), 1);
        assert!(cache.get_channel_ids_by_node_id(99).await.is_empty());
    }
}
