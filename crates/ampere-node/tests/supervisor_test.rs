// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Supervisor reconciliation against custom service factories.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ampere_core::domain::{
    Implementation, NodeCustomSettings, NodeServiceKey, NodeServiceType, ServiceStatus, StateWorld,
};
use ampere_node::error::Error;
use ampere_node::supervisor::{
    ServiceRegistry, Supervisor, activate_node_service, inactivate_node_service,
};
use common::*;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

/// Registry whose channel event factory marks itself Active, waits for its
/// token and counts starts and observed cancellations.
fn counting_registry(starts: Arc<AtomicUsize>, cancellations: Arc<AtomicUsize>) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry.register_node(NodeServiceType::ChannelEventStream, move |ctx, key, cancel| {
        starts.fetch_add(1, Ordering::SeqCst);
        let cancellations = cancellations.clone();
        async move {
            ctx.caches
                .services
                .set_node_status(StateWorld::Current, key, ServiceStatus::Active, None)
                .await;
            cancel.cancelled().await;
            cancellations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    });
    registry
}

#[tokio::test]
async fn test_operator_deactivation_cancels_worker_once() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    let key = NodeServiceKey::new(
        Implementation::Lnd,
        node_id,
        NodeServiceType::ChannelEventStream,
    );

    let starts = Arc::new(AtomicUsize::new(0));
    let cancellations = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(starts.clone(), cancellations.clone());
    let supervisor_cancel = CancellationToken::new();
    let supervisor = tokio::spawn(Supervisor::new(tc.ctx.clone(), registry).run(supervisor_cancel.clone()));

    let services = tc.ctx.caches.services.clone();
    assert!(
        wait_until(|| {
            let services = services.clone();
            async move { services.get_node_status(StateWorld::Current, key).await == ServiceStatus::Active }
        })
        .await,
        "registered worker never became active"
    );
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    assert!(inactivate_node_service(&services, key, &CancellationToken::new()).await);
    assert_eq!(
        services.get_node_status(StateWorld::Desired, key).await,
        ServiceStatus::Inactive
    );
    assert!(
        wait_until(|| {
            let cancellations = cancellations.clone();
            async move { cancellations.load(Ordering::SeqCst) == 1 }
        })
        .await,
        "worker never observed cancellation"
    );

    // A few more ticks: nothing restarts a unit the operator turned off.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(cancellations.load(Ordering::SeqCst), 1);
    assert_eq!(
        services.get_node_status(StateWorld::Current, key).await,
        ServiceStatus::Inactive
    );

    assert!(activate_node_service(&services, key, &CancellationToken::new()).await);
    assert_eq!(starts.load(Ordering::SeqCst), 2);

    supervisor_cancel.cancel();
    supervisor.await.unwrap();
    assert_eq!(cancellations.load(Ordering::SeqCst), 2);
    assert_eq!(
        services.get_node_status(StateWorld::Current, key).await,
        ServiceStatus::Inactive
    );
}

#[tokio::test]
async fn test_failed_service_is_restarted() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    let key = NodeServiceKey::new(Implementation::Lnd, node_id, NodeServiceType::GraphEventStream);

    let attempts = Arc::new(AtomicUsize::new(0));
    let mut registry = ServiceRegistry::new();
    let counter = attempts.clone();
    registry.register_node(NodeServiceType::GraphEventStream, move |ctx, key, cancel| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                return Err(Error::InvalidRequest("first attempt fails".to_string()));
            }
            ctx.caches
                .services
                .set_node_status(StateWorld::Current, key, ServiceStatus::Active, None)
                .await;
            cancel.cancelled().await;
            Ok(())
        }
        .boxed()
    });

    let supervisor_cancel = CancellationToken::new();
    let supervisor = tokio::spawn(Supervisor::new(tc.ctx.clone(), registry).run(supervisor_cancel.clone()));

    let services = tc.ctx.caches.services.clone();
    assert!(
        wait_until(|| {
            let services = services.clone();
            async move { services.get_node_status(StateWorld::Current, key).await == ServiceStatus::Active }
        })
        .await,
        "service never recovered"
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    // Reaching Active clears the failure stamp of the first attempt.
    let state = services.get_state(StateWorld::Current, key).await;
    assert!(state.failure_time.is_none());
    assert!(state.active_time.is_some());

    supervisor_cancel.cancel();
    supervisor.await.unwrap();
}

#[tokio::test]
async fn test_unregistered_units_stay_inactive() {
    let tc = TestContext::new().await;
    let node_id = tc.register(NodeCustomSettings::default()).await;
    let key = NodeServiceKey::new(
        Implementation::Lnd,
        node_id,
        NodeServiceType::ChannelBalanceCacheStream,
    );

    let supervisor_cancel = CancellationToken::new();
    let supervisor = tokio::spawn(
        Supervisor::new(tc.ctx.clone(), ServiceRegistry::new()).run(supervisor_cancel.clone()),
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    let services = &tc.ctx.caches.services;
    assert_eq!(
        services.get_node_status(StateWorld::Desired, key).await,
        ServiceStatus::Active
    );
    assert_eq!(
        services.get_node_status(StateWorld::Current, key).await,
        ServiceStatus::Inactive
    );

    supervisor_cancel.cancel();
    supervisor.await.unwrap();
}
