// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded runtime start, registration and shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use ampere_core::Config;
use ampere_core::domain::{
    CoreServiceType, Implementation, NodeCustomSettings, NodeServiceKey, NodeServiceType,
    ServiceStatus, StateWorld,
};
use ampere_core::persistence::SqlitePersistence;
use ampere_node::AmpereRuntime;
use ampere_node::client::{MockConnector, MockNodeClient};
use ampere_node::registration::{NodeRegistration, set_node_connection_details};
use ampere_node::resolver::NoopResolver;
use common::*;

#[tokio::test]
async fn test_builder_requires_connector() {
    let result = AmpereRuntime::builder()
        .config(Config::with_database_url("sqlite::memory:"))
        .build();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_runtime_runs_registered_node_services() {
    let persistence = Arc::new(SqlitePersistence::in_memory().await.unwrap());
    let client = Arc::new(MockNodeClient::new(MANAGED_KEY));
    let mut config = Config::with_database_url("sqlite::memory:");
    config.supervisor_tick = Duration::from_millis(50);

    let runtime = AmpereRuntime::builder()
        .config(config)
        .persistence(persistence)
        .connector(Arc::new(MockConnector::new(client.clone())))
        .resolver(Arc::new(NoopResolver))
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let ctx = runtime.context().clone();
    let node_id = set_node_connection_details(
        &ctx,
        NodeRegistration {
            name: "alpha".to_string(),
            implementation: Implementation::Lnd,
            credentials: credentials(b"mac-1"),
            custom_settings: NodeCustomSettings::default(),
        },
    )
    .await
    .unwrap();

    let key = NodeServiceKey::new(
        Implementation::Lnd,
        node_id,
        NodeServiceType::ChannelEventStream,
    );
    let services = ctx.caches.services.clone();
    assert!(
        wait_until(|| {
            let services = services.clone();
            async move {
                services.get_node_status(StateWorld::Current, key).await == ServiceStatus::Active
            }
        })
        .await,
        "channel event stream never started"
    );
    assert_eq!(
        services
            .get_core_status(StateWorld::Current, CoreServiceType::Root)
            .await,
        ServiceStatus::Active
    );
    assert!(client.call_count("subscribe_channel_events") >= 1);

    runtime.shutdown().await.unwrap();
    assert!(client.close_count() >= 1);
}
