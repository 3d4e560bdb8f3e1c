// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for ampere-node integration tests.
//!
//! Provides TestContext with an in-memory SQLite store, spawned caches and a
//! mock daemon registered as a managed LND node.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ampere_core::domain::{
    ChannelPoint, Implementation, NodeCredentials, NodeCustomSettings, NodeId,
};
use ampere_core::persistence::SqlitePersistence;
use ampere_core::{Caches, Config};
use ampere_node::client::{ChannelInfo, MockConnector, MockNodeClient};
use ampere_node::registration::{NodeRegistration, set_node_connection_details};
use ampere_node::resolver::NoopResolver;
use ampere_node::ServiceContext;
use tokio_util::sync::CancellationToken;

pub const MANAGED_KEY: &str = "02aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const REMOTE_KEY: &str = "03abababababababababababababababababababababababababababababababab";
pub const FUNDING_TXID: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

/// Test context holding the shared service context and the mock daemon.
pub struct TestContext {
    pub ctx: ServiceContext,
    pub client: Arc<MockNodeClient>,
    pub connector: Arc<MockConnector>,
    pub cancel: CancellationToken,
}

impl TestContext {
    /// Fresh store, caches and mock daemon. No node is registered yet.
    pub async fn new() -> Self {
        let persistence = Arc::new(
            SqlitePersistence::in_memory()
                .await
                .expect("Failed to open in-memory database"),
        );
        let cancel = CancellationToken::new();
        let (caches, _) = Caches::spawn(&cancel);
        caches.services.init_states().await;

        let client = Arc::new(MockNodeClient::new(MANAGED_KEY));
        let connector = Arc::new(MockConnector::new(client.clone()));
        let mut config = Config::with_database_url("sqlite::memory:");
        config.supervisor_tick = Duration::from_millis(50);
        let ctx = ServiceContext::new(
            persistence,
            caches,
            connector.clone(),
            Arc::new(NoopResolver),
            config,
        );
        Self {
            ctx,
            client,
            connector,
            cancel,
        }
    }

    /// Register the mock daemon as a managed LND node.
    pub async fn register(&self, custom_settings: NodeCustomSettings) -> NodeId {
        set_node_connection_details(
            &self.ctx,
            NodeRegistration {
                name: "alpha".to_string(),
                implementation: Implementation::Lnd,
                credentials: credentials(b"mac-1"),
                custom_settings,
            },
        )
        .await
        .expect("Failed to register node")
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub fn credentials(macaroon: &[u8]) -> NodeCredentials {
    NodeCredentials {
        grpc_address: "127.0.0.1:10009".to_string(),
        tls_certificate: b"cert".to_vec(),
        macaroon: macaroon.to_vec(),
        ..Default::default()
    }
}

pub fn funding_point(output_index: u32) -> ChannelPoint {
    ChannelPoint::new(FUNDING_TXID, output_index)
}

/// An open channel to [`REMOTE_KEY`] as `list_channels` reports it.
pub fn channel_info(output_index: u32, short_channel_id: u64, local: i64, remote: i64) -> ChannelInfo {
    ChannelInfo {
        channel_point: funding_point(output_index),
        short_channel_id,
        remote_public_key: REMOTE_KEY.to_string(),
        capacity: local + remote + 4_000,
        local_balance: local,
        remote_balance: remote,
        local_channel_reserve: 10_000,
        remote_channel_reserve: 10_000,
        local_dust_limit: 354,
        remote_dust_limit: 354,
        commit_fee: 4_000,
        active: true,
        private: false,
        initiator: true,
        pending_htlcs: Vec::new(),
        unsettled_balance: 0,
        total_satoshis_sent: 0,
        total_satoshis_received: 0,
        num_updates: 1,
        commit_weight: 724,
        fee_per_kw: 2_500,
    }
}

/// Poll `check` every 10ms until it holds or two seconds pass.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
