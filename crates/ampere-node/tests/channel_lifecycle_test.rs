// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Channel open and close through the channel event stream.

mod common;

use ampere_core::cache::NodeRole;
use ampere_core::domain::{
    Chain, ChannelEventType, ChannelStatus, CloseType, Implementation, Initiator, Network, NodeCustomSettings,
    NodeKey, NodeServiceKey, NodeServiceType, ServiceStatus, StateWorld,
};
use ampere_node::client::{
    ChannelEventUpdate, ClosedChannelInfo, OpenChannelInfo, PendingChannel, PendingChannels,
};
use ampere_node::workers::ChannelEventWorker;
use common::*;

#[tokio::test]
async fn test_channel_open_then_cooperative_close() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    let key = NodeServiceKey::new(
        Implementation::Lnd,
        node_id,
        NodeServiceType::ChannelEventStream,
    );

    let worker = ChannelEventWorker::new(tc.ctx.clone(), key);
    let handle = tokio::spawn(worker.run(tc.cancel.child_token()));

    let services = tc.ctx.caches.services.clone();
    assert!(
        wait_until(|| {
            let services = services.clone();
            async move { services.get_node_status(StateWorld::Current, key).await == ServiceStatus::Active }
        })
        .await,
        "worker never became active"
    );

    let point = funding_point(0);
    let receivers = tc
        .client
        .push_channel_event(ChannelEventUpdate::Open(OpenChannelInfo {
            channel_point: point.clone(),
            short_channel_id: 0,
            remote_public_key: REMOTE_KEY.to_string(),
            capacity: 1_000_000,
            initiator: true,
            private: false,
        }))
        .await;
    assert_eq!(receivers, 1);

    let channels = tc.ctx.caches.channels.clone();
    let point_text = point.to_string();
    assert!(
        wait_until(|| {
            let channels = channels.clone();
            let point_text = point_text.clone();
            async move { channels.get_channel_id_by_channel_point(&point_text).await != 0 }
        })
        .await,
        "channel never cached"
    );

    let channel_id = channels.get_channel_id_by_channel_point(&point_text).await;
    assert_eq!(
        channels.get_channel_status(channel_id).await,
        Some(ChannelStatus::Open)
    );
    let settings = channels.get_channel_settings(channel_id).await.unwrap();
    assert_eq!(settings.capacity, 1_000_000);
    assert_eq!(settings.initiating_node_id, Some(node_id));

    let remote_key = NodeKey::new(Chain::Bitcoin, Network::MainNet, REMOTE_KEY);
    let nodes = tc.ctx.caches.nodes.clone();
    let remote_id = nodes.get_node_id(NodeRole::AllChannelPeer, &remote_key).await;
    assert_ne!(remote_id, 0);
    assert_eq!(
        nodes.get_node_id(NodeRole::ActiveChannelPeer, &remote_key).await,
        remote_id
    );

    tc.client
        .push_channel_event(ChannelEventUpdate::Closed(ClosedChannelInfo {
            channel_point: point.clone(),
            short_channel_id: 0,
            remote_public_key: REMOTE_KEY.to_string(),
            capacity: 1_000_000,
            close_type: CloseType::CooperativeClose,
            open_initiator: Initiator::Local,
            close_initiator: Initiator::Remote,
            closing_tx_hash: "bb".repeat(32),
            close_height: 800_000,
            settled_balance: 400_000,
        }))
        .await;

    assert!(
        wait_until(|| {
            let channels = channels.clone();
            async move {
                channels.get_channel_status(channel_id).await
                    == Some(ChannelStatus::CooperativeClosed)
            }
        })
        .await,
        "channel never closed"
    );

    // Same channel row, no longer addressable as active.
    assert_eq!(
        channels.get_channel_id_by_channel_point(&point_text).await,
        channel_id
    );
    assert_eq!(
        channels.get_active_channel_id_by_channel_point(&point_text).await,
        0
    );
    let settings = channels.get_channel_settings(channel_id).await.unwrap();
    assert_eq!(settings.closing_node_id, Some(remote_id));
    assert_eq!(settings.closing_block_height, Some(800_000));

    assert!(
        wait_until(|| {
            let nodes = nodes.clone();
            let remote_key = remote_key.clone();
            async move { nodes.get_node_id(NodeRole::ActiveChannelPeer, &remote_key).await == 0 }
        })
        .await,
        "peer still active without open channels"
    );
    assert_eq!(
        nodes.get_node_id(NodeRole::AllChannelPeer, &remote_key).await,
        remote_id
    );

    tc.cancel.cancel();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_broken_stream_ends_worker_with_error() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    let key = NodeServiceKey::new(
        Implementation::Lnd,
        node_id,
        NodeServiceType::ChannelEventStream,
    );

    let handle = tokio::spawn(ChannelEventWorker::new(tc.ctx.clone(), key).run(tc.cancel.child_token()));
    let services = tc.ctx.caches.services.clone();
    assert!(
        wait_until(|| {
            let services = services.clone();
            async move { services.get_node_status(StateWorld::Current, key).await == ServiceStatus::Active }
        })
        .await
    );

    tc.client
        .fail_streams(ampere_node::client::ClientError::StreamClosed)
        .await;
    let result = handle.await.unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_active_event_forces_pending_reimport() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    let point = funding_point(1);
    tc.client
        .set_pending_channels(PendingChannels {
            pending_open: vec![PendingChannel {
                channel_point: point.clone(),
                remote_public_key: REMOTE_KEY.to_string(),
                capacity: 3_000_000,
                initiator: Initiator::Remote,
                closing_tx_hash: None,
            }],
            waiting_close: Vec::new(),
            pending_force_close: Vec::new(),
        })
        .await;
    let key = NodeServiceKey::new(
        Implementation::Lnd,
        node_id,
        NodeServiceType::ChannelEventStream,
    );
    let worker = ChannelEventWorker::new(tc.ctx.clone(), key);
    let handle = tokio::spawn(worker.run(tc.cancel.child_token()));

    let services = tc.ctx.caches.services.clone();
    assert!(
        wait_until(|| {
            let services = services.clone();
            async move { services.get_node_status(StateWorld::Current, key).await == ServiceStatus::Active }
        })
        .await,
        "worker never became active"
    );
    let baseline = tc.client.call_count("pending_channels");

    tc.client
        .push_channel_event(ChannelEventUpdate::Active(point.clone()))
        .await;
    let ctx = tc.ctx.clone();
    let event_point = point.clone();
    assert!(
        wait_until(|| {
            let ctx = ctx.clone();
            let event_point = event_point.clone();
            async move {
                let channel_id = ctx.caches.channels.get_channel_id_by_point(&event_point).await;
                channel_id != 0
                    && ctx
                        .persistence
                        .count_channel_events(node_id, channel_id, ChannelEventType::Active)
                        .await
                        .is_ok_and(|count| count == 1)
            }
        })
        .await,
        "active event never recorded"
    );
    assert_eq!(tc.client.call_count("pending_channels"), baseline + 1);
    let channel_id = tc.ctx.caches.channels.get_channel_id_by_point(&point).await;
    assert_eq!(
        tc.ctx.caches.channels.get_channel_status(channel_id).await,
        Some(ChannelStatus::Opening)
    );

    // INACTIVE inside the skip window still re-imports.
    tc.client
        .push_channel_event(ChannelEventUpdate::Inactive(point.clone()))
        .await;
    let client = tc.client.clone();
    assert!(
        wait_until(|| {
            let client = client.clone();
            async move { client.call_count("pending_channels") == baseline + 2 }
        })
        .await,
        "inactive event skipped the pending import"
    );

    tc.cancel.cancel();
    handle.await.unwrap().unwrap();
}
