// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pollers and balance-moving streams against the mock daemon.

mod common;

use std::time::Duration;

use ampere_core::cache::NodeRole;
use ampere_core::domain::{
    Chain, ChannelId, HtlcEventKind, ImportType, Implementation, InvoiceState, Network,
    NodeCustomSettings, NodeId, NodeKey, NodeServiceKey, NodeServiceType, PaymentStatus,
    RoutingPolicy, ServiceStatus, StateWorld,
};
use ampere_node::ServiceContext;
use ampere_node::client::{
    ChannelEdgeUpdate, ForwardingEvent, GraphUpdate, HtlcEvent, HtlcEventDetail, Invoice,
    InvoiceHtlcInfo, NodeAnnouncement, Payment,
};
use ampere_node::importers::Importer;
use ampere_node::workers::{
    ChannelBalanceWorker, ForwardsWorker, GraphWorker, HtlcWorker, InvoiceWorker, PaymentsWorker,
};
use chrono::{DateTime, Utc};
use common::*;

const SHORT_ID: u64 = (800_000 << 40) | (1 << 16);

fn key(node_id: NodeId, service_type: NodeServiceType) -> NodeServiceKey {
    NodeServiceKey::new(Implementation::Lnd, node_id, service_type)
}

async fn wait_for_status(ctx: &ServiceContext, key: NodeServiceKey, status: ServiceStatus) -> bool {
    let services = ctx.caches.services.clone();
    wait_until(|| {
        let services = services.clone();
        async move { services.get_node_status(StateWorld::Current, key).await == status }
    })
    .await
}

/// Import one open channel and let the balance worker build its snapshot.
async fn tracked_channel(tc: &TestContext, node_id: NodeId) -> ChannelId {
    tc.client
        .set_channels(vec![channel_info(0, SHORT_ID, 600_000, 396_000)])
        .await;
    Importer::new(tc.ctx.clone())
        .run(ImportType::AllChannels, node_id, true)
        .await
        .expect("channel import failed");
    let channel_id = tc
        .ctx
        .caches
        .channels
        .get_channel_id_by_lnd_short_channel_id(SHORT_ID)
        .await;
    assert_ne!(channel_id, 0);

    let worker = ChannelBalanceWorker::new(
        tc.ctx.clone(),
        key(node_id, NodeServiceType::ChannelBalanceCacheStream),
    );
    tokio::spawn(worker.run(tc.cancel.child_token()));
    let channel_states = tc.ctx.caches.channel_states.clone();
    assert!(
        wait_until(|| {
            let channel_states = channel_states.clone();
            async move { channel_states.get_state(node_id, channel_id).await.is_some() }
        })
        .await,
        "snapshot never built"
    );
    channel_id
}

async fn local_balance(tc: &TestContext, node_id: NodeId, channel_id: ChannelId) -> i64 {
    tc.ctx
        .caches
        .channel_states
        .get_state(node_id, channel_id)
        .await
        .map(|snapshot| snapshot.local_balance)
        .unwrap_or_default()
}

fn invoice(add_index: u64, settle_index: u64, state: InvoiceState, amount_msat: i64) -> Invoice {
    Invoice {
        r_hash: format!("{add_index:064x}"),
        memo: "coffee".to_string(),
        value_msat: amount_msat,
        amount_paid_msat: if state == InvoiceState::Settled { amount_msat } else { 0 },
        state,
        add_index,
        settle_index,
        creation_date: Utc::now(),
        settle_date: (state == InvoiceState::Settled).then(Utc::now),
        htlcs: if state == InvoiceState::Settled {
            vec![InvoiceHtlcInfo {
                channel_id: SHORT_ID,
                amount_msat,
            }]
        } else {
            Vec::new()
        },
    }
}

#[tokio::test]
async fn test_settled_invoice_credits_channel_once() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::all()).await;
    let channel_id = tracked_channel(&tc, node_id).await;
    let tc_ref = &tc;
    assert_eq!(local_balance(&tc, node_id, channel_id).await, 600_000);

    let invoice_key = key(node_id, NodeServiceType::InvoiceStream);
    tokio::spawn(InvoiceWorker::new(tc.ctx.clone(), invoice_key).run(tc.cancel.child_token()));
    assert!(wait_for_status(&tc.ctx, invoice_key, ServiceStatus::Active).await);
    assert_eq!(tc.client.invoice_subscriptions().await, vec![(0, 0)]);

    tc.client
        .push_invoice(invoice(1, 1, InvoiceState::Settled, 5_000_000))
        .await;
    assert!(
        wait_until(|| async move { local_balance(tc_ref, node_id, channel_id).await == 605_000 }).await,
        "settled invoice never credited"
    );
    let snapshot = tc
        .ctx
        .caches
        .channel_states
        .get_state(node_id, channel_id)
        .await
        .unwrap();
    assert_eq!(snapshot.remote_balance, 391_000);

    // Replaying the settle index moves nothing; a later open invoice marks
    // the point where the replay has been processed.
    tc.client
        .push_invoice(invoice(1, 1, InvoiceState::Settled, 5_000_000))
        .await;
    tc.client
        .push_invoice(invoice(2, 0, InvoiceState::Open, 1_000))
        .await;
    let persistence = tc.ctx.persistence.clone();
    assert!(
        wait_until(|| {
            let persistence = persistence.clone();
            async move {
                persistence
                    .last_invoice_indexes(node_id)
                    .await
                    .is_ok_and(|indexes| indexes.add_index == 2)
            }
        })
        .await
    );
    assert_eq!(local_balance(&tc, node_id, channel_id).await, 605_000);
    let indexes = tc.ctx.persistence.last_invoice_indexes(node_id).await.unwrap();
    assert_eq!(indexes.settle_index, 1);
}

fn payment(payment_index: u64, status: PaymentStatus) -> Payment {
    Payment {
        payment_hash: format!("{payment_index:064x}"),
        payment_index,
        value_msat: 100_000,
        fee_msat: 1_000,
        status,
        creation_date: Utc::now(),
        first_hop_channel_id: (status == PaymentStatus::Succeeded).then_some(SHORT_ID),
        failure_reason: (status == PaymentStatus::Failed).then(|| "no route".to_string()),
    }
}

#[tokio::test]
async fn test_payments_stop_at_first_in_flight() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    let channel_id = tracked_channel(&tc, node_id).await;
    let tc_ref = &tc;

    tc.client
        .set_payments(vec![
            payment(1, PaymentStatus::Succeeded),
            payment(2, PaymentStatus::Failed),
            payment(3, PaymentStatus::InFlight),
            payment(4, PaymentStatus::Succeeded),
        ])
        .await;

    let payments_key = key(node_id, NodeServiceType::PaymentStream);
    tokio::spawn(PaymentsWorker::new(tc.ctx.clone(), payments_key).run(tc.cancel.child_token()));

    // Only the first payment is settled before the in-flight one.
    assert!(
        wait_until(|| async move { local_balance(tc_ref, node_id, channel_id).await == 599_899 }).await,
        "succeeded payment never debited"
    );
    assert_eq!(tc.client.call_count("list_payments"), 1);
    assert_eq!(
        tc.ctx.persistence.last_payment_index(node_id).await.unwrap(),
        1
    );
    assert_eq!(
        tc.ctx
            .caches
            .services
            .get_node_status(StateWorld::Current, payments_key)
            .await,
        ServiceStatus::Active
    );
}

fn forward(time: DateTime<Utc>, fee_msat: i64) -> ForwardingEvent {
    ForwardingEvent {
        timestamp_ns: time.timestamp_nanos_opt().unwrap(),
        incoming_channel_id: SHORT_ID,
        outgoing_channel_id: 0,
        incoming_amount_msat: 1_000_000 + fee_msat,
        outgoing_amount_msat: 1_000_000,
        fee_msat,
    }
}

#[tokio::test]
async fn test_forwards_are_paged_until_short_page() {
    let tc = TestContext::new().await;
    let node_id = tc
        .register(NodeCustomSettings(
            NodeCustomSettings::IMPORT_FORWARDS | NodeCustomSettings::IMPORT_HISTORIC_FORWARDS,
        ))
        .await;

    let start = Utc::now() - chrono::Duration::hours(1);
    let forwards: Vec<ForwardingEvent> = (0..5)
        .map(|i| forward(start + chrono::Duration::seconds(i), 1_000 + i))
        .collect();
    let latest = start + chrono::Duration::seconds(4);
    tc.client.set_forwards(forwards).await;

    let mut ctx = tc.ctx.clone();
    ctx.workers.forwards_page_size = 2;
    ctx.workers.request_interval = Duration::from_millis(5);
    let forwards_key = key(node_id, NodeServiceType::ForwardsStream);
    tokio::spawn(ForwardsWorker::new(ctx, forwards_key).run(tc.cancel.child_token()));

    assert!(wait_for_status(&tc.ctx, forwards_key, ServiceStatus::Active).await);
    // Pages of 2, 2 and 1.
    assert_eq!(tc.client.call_count("forwarding_history"), 3);
    let last = tc
        .ctx
        .persistence
        .last_forward_time(node_id)
        .await
        .unwrap()
        .expect("no forward stored");
    assert_eq!(last.timestamp(), latest.timestamp());
}

#[tokio::test]
async fn test_forwards_skip_history_before_registration() {
    let tc = TestContext::new().await;
    let node_id = tc
        .register(NodeCustomSettings(NodeCustomSettings::IMPORT_FORWARDS))
        .await;
    tc.client
        .set_forwards(vec![forward(Utc::now() - chrono::Duration::days(30), 1_000)])
        .await;

    let forwards_key = key(node_id, NodeServiceType::ForwardsStream);
    tokio::spawn(ForwardsWorker::new(tc.ctx.clone(), forwards_key).run(tc.cancel.child_token()));

    assert!(wait_for_status(&tc.ctx, forwards_key, ServiceStatus::Active).await);
    assert!(
        tc.ctx
            .persistence
            .last_forward_time(node_id)
            .await
            .unwrap()
            .is_none()
    );
}

fn edge(advertising_node: &str, connecting_node: &str, fee_rate_ppm: i64) -> GraphUpdate {
    GraphUpdate {
        node_updates: Vec::new(),
        channel_updates: vec![ChannelEdgeUpdate {
            short_channel_id: SHORT_ID,
            channel_point: funding_point(0),
            capacity: 1_000_000,
            advertising_node: advertising_node.to_string(),
            connecting_node: connecting_node.to_string(),
            policy: RoutingPolicy {
                disabled: false,
                fee_base_msat: 1_000,
                fee_rate_ppm,
                min_htlc_msat: 1_000,
                max_htlc_msat: 990_000_000,
                time_lock_delta: 40,
            },
        }],
    }
}

#[tokio::test]
async fn test_graph_policy_stored_once_with_inferred_endpoint() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    tc.client
        .set_channels(vec![channel_info(0, SHORT_ID, 600_000, 396_000)])
        .await;
    Importer::new(tc.ctx.clone())
        .run(ImportType::AllChannels, node_id, true)
        .await
        .unwrap();
    let channel_id = tc
        .ctx
        .caches
        .channels
        .get_channel_id_by_lnd_short_channel_id(SHORT_ID)
        .await;
    let remote_key = NodeKey::new(Chain::Bitcoin, Network::MainNet, REMOTE_KEY);
    let remote_id = tc
        .ctx
        .caches
        .nodes
        .get_node_id(NodeRole::AllChannelPeer, &remote_key)
        .await;
    assert_ne!(remote_id, 0);

    let graph_key = key(node_id, NodeServiceType::GraphEventStream);
    tokio::spawn(GraphWorker::new(tc.ctx.clone(), graph_key).run(tc.cancel.child_token()));
    assert!(wait_for_status(&tc.ctx, graph_key, ServiceStatus::Active).await);

    // The connecting node is missing; it is the other end of the channel.
    tc.client.push_graph_update(edge(REMOTE_KEY, "", 100)).await;
    let persistence = tc.ctx.persistence.clone();
    assert!(
        wait_until(|| {
            let persistence = persistence.clone();
            async move {
                persistence
                    .latest_routing_policy(channel_id, remote_id, node_id)
                    .await
                    .is_ok_and(|latest| latest.is_some())
            }
        })
        .await,
        "policy never stored"
    );
    let first = tc
        .ctx
        .persistence
        .latest_routing_policy(channel_id, remote_id, node_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.policy.fee_rate_ppm, 100);

    // An identical announcement stores nothing. The node announcement after it
    // marks the point where it has been handled.
    tc.client.push_graph_update(edge(REMOTE_KEY, "", 100)).await;
    tc.client
        .push_graph_update(GraphUpdate {
            node_updates: vec![NodeAnnouncement {
                public_key: REMOTE_KEY.to_string(),
                alias: "bob".to_string(),
                color: "#3399ff".to_string(),
                addresses: vec!["10.0.0.2:9735".to_string()],
                features: vec![1, 5],
            }],
            channel_updates: Vec::new(),
        })
        .await;
    assert!(
        wait_until(|| {
            let persistence = persistence.clone();
            async move {
                persistence
                    .latest_node_event(remote_id, node_id)
                    .await
                    .is_ok_and(|latest| latest.is_some())
            }
        })
        .await,
        "node announcement never stored"
    );
    let unchanged = tc
        .ctx
        .persistence
        .latest_routing_policy(channel_id, remote_id, node_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.time, first.time);

    tc.client.push_graph_update(edge(REMOTE_KEY, "", 250)).await;
    assert!(
        wait_until(|| {
            let persistence = persistence.clone();
            async move {
                persistence
                    .latest_routing_policy(channel_id, remote_id, node_id)
                    .await
                    .is_ok_and(|latest| latest.is_some_and(|l| l.policy.fee_rate_ppm == 250))
            }
        })
        .await,
        "changed policy never stored"
    );
}

#[tokio::test]
async fn test_htlc_link_failure_is_stored_with_details() {
    let tc = TestContext::new().await;
    let node_id = tc
        .register(NodeCustomSettings(NodeCustomSettings::IMPORT_HTLC_EVENTS))
        .await;
    let channel_id = tracked_channel(&tc, node_id).await;

    let htlc_key = key(node_id, NodeServiceType::HtlcEventStream);
    tokio::spawn(HtlcWorker::new(tc.ctx.clone(), htlc_key).run(tc.cancel.child_token()));
    assert!(wait_for_status(&tc.ctx, htlc_key, ServiceStatus::Active).await);

    tc.client
        .push_htlc_event(HtlcEvent {
            incoming_channel_id: SHORT_ID,
            outgoing_channel_id: 0,
            incoming_htlc_id: 12,
            outgoing_htlc_id: 0,
            timestamp_ns: Utc::now().timestamp_nanos_opt().unwrap(),
            event_origin: "forward".to_string(),
            detail: HtlcEventDetail::LinkFail {
                incoming_amount_msat: 2_000_000,
                outgoing_amount_msat: 1_999_000,
                wire_failure: 15,
                failure_detail: 6,
                failure_string: "insufficient balance".to_string(),
            },
        })
        .await;

    let persistence = tc.ctx.persistence.clone();
    assert!(
        wait_until(|| {
            let persistence = persistence.clone();
            async move {
                persistence
                    .list_htlc_events(node_id)
                    .await
                    .is_ok_and(|events| !events.is_empty())
            }
        })
        .await,
        "htlc event never stored"
    );
    let events = tc.ctx.persistence.list_htlc_events(node_id).await.unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.kind, HtlcEventKind::LinkFail);
    assert_eq!(event.incoming_channel_id, channel_id);
    assert_eq!(event.outgoing_channel_id, 0);
    assert_eq!(event.incoming_htlc_id, 12);
    assert_eq!(event.incoming_amount_msat, Some(2_000_000));
    assert_eq!(event.wire_failure, Some(15));
    assert_eq!(event.failure_detail, Some(6));
    assert_eq!(event.failure_string.as_deref(), Some("insufficient balance"));
}
