// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for unit tests.

use std::sync::Arc;

use ampere_core::domain::{Implementation, NodeCredentials, NodeCustomSettings, NodeId};
use ampere_core::persistence::SqlitePersistence;
use ampere_core::{Caches, Config};
use tokio_util::sync::CancellationToken;

use crate::client::{MockConnector, MockNodeClient};
use crate::context::ServiceContext;
use crate::registration::{NodeRegistration, set_node_connection_details};
use crate::resolver::NoopResolver;

pub(crate) const MANAGED_KEY: &str =
    "02aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

pub(crate) struct Fixture {
    pub ctx: ServiceContext,
    pub client: Arc<MockNodeClient>,
    pub connector: Arc<MockConnector>,
    pub cancel: CancellationToken,
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub(crate) async fn fixture() -> Fixture {
    let persistence = Arc::new(SqlitePersistence::in_memory().await.unwrap());
    let cancel = CancellationToken::new();
    let (caches, _) = Caches::spawn(&cancel);
    caches.services.init_states().await;
    let client = Arc::new(MockNodeClient::new(MANAGED_KEY));
    let connector = Arc::new(MockConnector::new(client.clone()));
    let ctx = ServiceContext::new(
        persistence,
        caches,
        connector.clone(),
        Arc::new(NoopResolver),
        Config::with_database_url("sqlite::memory:"),
    );
    Fixture {
        ctx,
        client,
        connector,
        cancel,
    }
}

pub(crate) fn credentials(macaroon: &[u8]) -> NodeCredentials {
    NodeCredentials {
        grpc_address: "127.0.0.1:10009".to_string(),
        tls_certificate: b"cert".to_vec(),
        macaroon: macaroon.to_vec(),
        ..Default::default()
    }
}

/// Register the mock daemon as a managed LND node.
pub(crate) async fn register(fixture: &Fixture, custom_settings: NodeCustomSettings) -> NodeId {
    set_node_connection_details(
        &fixture.ctx,
        NodeRegistration {
            name: "alpha".to_string(),
            implementation: Implementation::Lnd,
            credentials: credentials(b"mac"),
            custom_settings,
        },
    )
    .await
    .unwrap()
}
