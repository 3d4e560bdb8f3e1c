// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registration, imports and control verbs.

mod common;

use ampere_core::cache::NodeRole;
use ampere_core::domain::{
    Chain, ChannelEventType, ChannelStatus, CloseType, ImportType, Implementation, Initiator,
    Network, NodeCustomSettings, NodeKey, NodeServiceType, ServiceStatus,
};
use ampere_node::client::{ClosedChannelInfo, PendingChannel, PendingChannels};
use ampere_node::control::{NodeControl, RoutingPolicyChange};
use ampere_node::error::Error;
use ampere_node::importers::{ImportOutcome, Importer};
use ampere_node::registration::{
    NodeRegistration, remove_node_connection_details, set_node_connection_details,
};
use common::*;

fn managed_key() -> NodeKey {
    NodeKey::new(Chain::Bitcoin, Network::MainNet, MANAGED_KEY)
}

#[tokio::test]
async fn test_registration_requests_enabled_services() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::all()).await;
    assert_ne!(node_id, 0);

    let nodes = &tc.ctx.caches.nodes;
    assert_eq!(
        nodes.get_node_id(NodeRole::ActiveManaged, &managed_key()).await,
        node_id
    );

    let services = &tc.ctx.caches.services;
    let snapshots = services.list_node_snapshots(node_id).await;
    assert_eq!(snapshots.len(), NodeServiceType::ALL.len());
    assert!(
        snapshots
            .iter()
            .all(|snapshot| snapshot.desired.status == ServiceStatus::Active)
    );

    let details = services.get_node_connection_details(node_id).await.unwrap();
    assert_eq!(details.name, "alpha");
    assert_eq!(details.implementation, Implementation::Lnd);
}

#[tokio::test]
async fn test_registration_without_flags_requests_core_streams_only() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;

    let mut requested: Vec<NodeServiceType> = tc
        .ctx
        .caches
        .services
        .list_node_snapshots(node_id)
        .await
        .into_iter()
        .filter(|snapshot| snapshot.desired.status == ServiceStatus::Active)
        .filter_map(|snapshot| match snapshot.unit {
            ampere_core::cache::ServiceUnit::Node(key) => Some(key.service_type),
            ampere_core::cache::ServiceUnit::Core(_) => None,
        })
        .collect();
    requested.sort();
    assert_eq!(
        requested,
        vec![
            NodeServiceType::ChannelEventStream,
            NodeServiceType::GraphEventStream,
            NodeServiceType::ChannelBalanceCacheStream,
        ]
    );
}

#[tokio::test]
async fn test_credential_change_replaces_transport() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    let created_on = tc
        .ctx
        .connection_details(node_id)
        .await
        .unwrap()
        .created_on;

    // Identical credentials reuse the pooled transport.
    tc.ctx.client(node_id).await.unwrap();
    assert_eq!(tc.connector.open_count(), 1);

    let again = set_node_connection_details(
        &tc.ctx,
        NodeRegistration {
            name: "alpha".to_string(),
            implementation: Implementation::Lnd,
            credentials: credentials(b"mac-2"),
            custom_settings: NodeCustomSettings::default(),
        },
    )
    .await
    .unwrap();
    assert_eq!(again, node_id);
    assert_eq!(tc.connector.open_count(), 2);
    assert_eq!(tc.connector.opened_with()[1].macaroon, b"mac-2".to_vec());

    // The adopted transport matches the new credentials, so nothing reconnects.
    tc.ctx.client(node_id).await.unwrap();
    assert_eq!(tc.connector.open_count(), 2);

    let details = tc.ctx.connection_details(node_id).await.unwrap();
    assert_eq!(details.created_on, created_on);
    assert_eq!(details.credentials.macaroon, b"mac-2".to_vec());
}

#[tokio::test]
async fn test_unreachable_daemon_is_not_registered() {
    let tc = TestContext::new().await;
    tc.connector
        .fail
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let result = set_node_connection_details(
        &tc.ctx,
        NodeRegistration {
            name: "alpha".to_string(),
            implementation: Implementation::Lnd,
            credentials: credentials(b"mac-1"),
            custom_settings: NodeCustomSettings::all(),
        },
    )
    .await;
    assert!(result.is_err());
    assert!(
        tc.ctx
            .caches
            .services
            .list_node_connection_details()
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn test_remove_node_stops_services() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::all()).await;

    assert!(remove_node_connection_details(&tc.ctx, node_id).await.unwrap());

    let services = &tc.ctx.caches.services;
    assert!(services.get_node_connection_details(node_id).await.is_none());
    assert!(services.list_node_snapshots(node_id).await.is_empty());
    assert_eq!(
        tc.ctx
            .caches
            .nodes
            .get_node_id(NodeRole::ActiveManaged, &managed_key())
            .await,
        0
    );
    assert!(matches!(
        tc.ctx.client(node_id).await,
        Err(Error::MissingConnectionDetails(id)) if id == node_id
    ));
    assert!(tc.ctx.pool.is_empty().await);
}

#[tokio::test]
async fn test_import_skipped_within_window() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    tc.client
        .set_channels(vec![channel_info(0, 1 << 40, 500_000, 496_000)])
        .await;

    let importer = Importer::new(tc.ctx.clone());
    let first = importer
        .run(ImportType::AllChannels, node_id, false)
        .await
        .unwrap();
    assert_eq!(first, ImportOutcome::Completed(1));

    let second = importer
        .run(ImportType::AllChannels, node_id, false)
        .await
        .unwrap();
    assert_eq!(second, ImportOutcome::Skipped);
    assert_eq!(tc.client.call_count("list_channels"), 1);

    // Forced imports ignore the window and do not duplicate the channel.
    importer
        .run(ImportType::AllChannels, node_id, true)
        .await
        .unwrap();
    assert_eq!(tc.client.call_count("list_channels"), 2);
    let channels = tc
        .ctx
        .caches
        .channels
        .get_channel_settings_by_node_id(node_id)
        .await;
    assert_eq!(channels.len(), 1);
    assert!(
        tc.ctx
            .caches
            .services
            .get_success_time(node_id, ImportType::AllChannels)
            .await
            .is_some()
    );
}

fn pending(output_index: u32, initiator: Initiator, closing_tx_hash: Option<&str>) -> PendingChannel {
    PendingChannel {
        channel_point: funding_point(output_index),
        remote_public_key: REMOTE_KEY.to_string(),
        capacity: 2_000_000,
        initiator,
        closing_tx_hash: closing_tx_hash.map(str::to_string),
    }
}

#[tokio::test]
async fn test_pending_import_walks_all_three_lists() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    tc.client
        .set_pending_channels(PendingChannels {
            pending_open: vec![pending(1, Initiator::Local, None)],
            waiting_close: vec![pending(2, Initiator::Remote, Some(&"cc".repeat(32)))],
            pending_force_close: vec![pending(3, Initiator::Local, Some(&"dd".repeat(32)))],
        })
        .await;

    let outcome = Importer::new(tc.ctx.clone())
        .run(ImportType::PendingChannels, node_id, true)
        .await
        .unwrap();
    assert_eq!(outcome, ImportOutcome::Completed(3));

    let channels = &tc.ctx.caches.channels;
    let opening = channels.get_channel_id_by_point(&funding_point(1)).await;
    let settings = channels.get_channel_settings(opening).await.unwrap();
    let remote_id = if settings.first_node_id == node_id {
        settings.second_node_id
    } else {
        settings.first_node_id
    };
    assert_ne!(remote_id, node_id);

    assert_eq!(settings.status, ChannelStatus::Opening);
    assert_eq!(settings.initiating_node_id, Some(node_id));
    assert_eq!(settings.accepting_node_id, Some(remote_id));

    let waiting = channels.get_channel_id_by_point(&funding_point(2)).await;
    let settings = channels.get_channel_settings(waiting).await.unwrap();
    assert_eq!(settings.status, ChannelStatus::Closing);
    assert_eq!(settings.initiating_node_id, Some(remote_id));
    assert_eq!(settings.closing_transaction_hash, Some("cc".repeat(32)));

    let forced = channels.get_channel_id_by_point(&funding_point(3)).await;
    let settings = channels.get_channel_settings(forced).await.unwrap();
    assert_eq!(settings.status, ChannelStatus::Closing);
    assert_eq!(settings.closing_transaction_hash, Some("dd".repeat(32)));
}

#[tokio::test]
async fn test_reimported_closed_channel_keeps_one_event() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    tc.client
        .set_closed_channels(vec![ClosedChannelInfo {
            channel_point: funding_point(4),
            short_channel_id: (790_000 << 40) | (3 << 16),
            remote_public_key: REMOTE_KEY.to_string(),
            capacity: 1_000_000,
            close_type: CloseType::CooperativeClose,
            open_initiator: Initiator::Local,
            close_initiator: Initiator::Remote,
            closing_tx_hash: "ee".repeat(32),
            close_height: 800_100,
            settled_balance: 500_000,
        }])
        .await;

    let importer = Importer::new(tc.ctx.clone());
    for _ in 0..2 {
        importer
            .run(ImportType::AllChannels, node_id, true)
            .await
            .unwrap();
    }
    assert_eq!(tc.client.call_count("closed_channels"), 2);

    let channel_id = tc
        .ctx
        .caches
        .channels
        .get_channel_id_by_point(&funding_point(4))
        .await;
    assert_ne!(channel_id, 0);
    assert_eq!(
        tc.ctx
            .caches
            .channels
            .get_channel_status(channel_id)
            .await,
        Some(ChannelStatus::CooperativeClosed)
    );
    assert_eq!(
        tc.ctx
            .persistence
            .count_channel_events(node_id, channel_id, ChannelEventType::Closed)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_channel_status_updates_are_rate_limited() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    tc.client
        .set_channels(vec![channel_info(0, 1 << 40, 500_000, 496_000)])
        .await;
    Importer::new(tc.ctx.clone())
        .run(ImportType::AllChannels, node_id, true)
        .await
        .unwrap();
    let channel_id = tc
        .ctx
        .caches
        .channels
        .get_channel_id_by_point(&funding_point(0))
        .await;
    assert_ne!(channel_id, 0);

    let control = NodeControl::new(tc.ctx.clone());
    let first = control
        .update_channel_status(node_id, channel_id, false)
        .await
        .unwrap();
    assert_eq!(first.status, ServiceStatus::Active);
    let second = control
        .update_channel_status(node_id, channel_id, true)
        .await
        .unwrap();
    assert_eq!(second.status, ServiceStatus::Active);

    let third = control
        .update_routing_policy(RoutingPolicyChange {
            node_id,
            channel_id,
            fee_rate_ppm: Some(250),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(third.status, ServiceStatus::Inactive);
    assert!(third.message.unwrap().contains("rate limited"));

    assert_eq!(
        tc.client.status_updates().await,
        vec![(funding_point(0), false), (funding_point(0), true)]
    );
    assert!(tc.client.policy_updates().await.is_empty());
}

#[tokio::test]
async fn test_routing_policy_change_keeps_unset_fields() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    tc.client
        .set_channels(vec![channel_info(0, 1 << 40, 500_000, 496_000)])
        .await;
    Importer::new(tc.ctx.clone())
        .run(ImportType::AllChannels, node_id, true)
        .await
        .unwrap();
    let channel_id = tc
        .ctx
        .caches
        .channels
        .get_channel_id_by_point(&funding_point(0))
        .await;

    let control = NodeControl::new(tc.ctx.clone());
    let response = control
        .update_routing_policy(RoutingPolicyChange {
            node_id,
            channel_id,
            fee_rate_ppm: Some(250),
            time_lock_delta: Some(80),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(response.status, ServiceStatus::Active);

    let updates = tc.client.policy_updates().await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].channel_point, funding_point(0));
    assert_eq!(updates[0].fee_rate_ppm, 250);
    assert_eq!(updates[0].time_lock_delta, 80);
    assert_eq!(updates[0].fee_base_msat, 0);
    assert_eq!(updates[0].min_htlc_msat, None);
}

#[tokio::test]
async fn test_control_rejects_foreign_and_unknown_channels() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    let control = NodeControl::new(tc.ctx.clone());

    assert!(matches!(
        control.update_channel_status(node_id, 4242, false).await,
        Err(Error::UnknownChannel(4242))
    ));
    assert!(matches!(
        control.disconnect_peer(node_id, "").await,
        Err(Error::InvalidRequest(_))
    ));

    // Disconnecting a peer that is not connected surfaces the daemon error.
    assert!(control.disconnect_peer(node_id, REMOTE_KEY).await.is_err());
    control
        .connect_peer(node_id, REMOTE_KEY, "10.0.0.2:9735")
        .await
        .unwrap();
    control.disconnect_peer(node_id, REMOTE_KEY).await.unwrap();
}

#[tokio::test]
async fn test_sign_and_verify_round_trip() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    let control = NodeControl::new(tc.ctx.clone());

    let signature = control.sign_message(node_id, b"hello").await.unwrap();
    let verified = control
        .verify_message(node_id, b"hello", &signature)
        .await
        .unwrap();
    assert!(verified.valid);
    assert_eq!(verified.public_key, MANAGED_KEY);

    let info = control.get_info(node_id).await.unwrap();
    assert_eq!(info.public_key, MANAGED_KEY);
}
