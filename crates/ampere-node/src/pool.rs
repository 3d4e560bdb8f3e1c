// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Daemon connection pool.
//!
//! One transport per managed node. A transport is reused while the node's
//! credentials stay byte-identical; a credential change opens a new transport
//! and closes the old one. Cancelling a worker never closes its transport.

use std::collections::HashMap;
use std::sync::Arc;

use ampere_core::domain::{Implementation, NodeCredentials, NodeId};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::client::{self, Connector, NodeClient};

struct PoolEntry {
    implementation: Implementation,
    credentials: NodeCredentials,
    client: Arc<dyn NodeClient>,
}

/// Transports keyed by node id.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    entries: Mutex<HashMap<NodeId, PoolEntry>>,
}

impl ConnectionPool {
    /// Pool opening transports through `connector`.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Transport for `node_id`, opened or replaced when the credentials changed.
    pub async fn get(
        &self,
        node_id: NodeId,
        implementation: Implementation,
        credentials: &NodeCredentials,
    ) -> client::Result<Arc<dyn NodeClient>> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(&node_id)
            && entry.implementation == implementation
            && entry.credentials == *credentials
        {
            return Ok(entry.client.clone());
        }

        let client = self.connector.connect(implementation, credentials).await?;
        let previous = entries.insert(
            node_id,
            PoolEntry {
                implementation,
                credentials: credentials.clone(),
                client: client.clone(),
            },
        );
        drop(entries);

        match previous {
            Some(previous) => {
                info!(node_id, "Node credentials changed, transport replaced");
                previous.client.close().await;
            }
            None => debug!(node_id, address = %credentials.grpc_address, "Transport opened"),
        }
        Ok(client)
    }

    /// Open a transport that is not pooled yet, for a node without an id.
    pub async fn open_unbound(
        &self,
        implementation: Implementation,
        credentials: &NodeCredentials,
    ) -> client::Result<Arc<dyn NodeClient>> {
        self.connector.connect(implementation, credentials).await
    }

    /// Pool a transport opened with [`open_unbound`](Self::open_unbound).
    /// A transport already pooled for the node is closed unless it is the same one.
    pub async fn adopt(
        &self,
        node_id: NodeId,
        implementation: Implementation,
        credentials: &NodeCredentials,
        client: Arc<dyn NodeClient>,
    ) {
        let previous = self.entries.lock().await.insert(
            node_id,
            PoolEntry {
                implementation,
                credentials: credentials.clone(),
                client: client.clone(),
            },
        );
        if let Some(previous) = previous
            && !Arc::ptr_eq(&previous.client, &client)
        {
            previous.client.close().await;
        }
    }

    /// Drop and close the transport of `node_id`.
    pub async fn remove(&self, node_id: NodeId) -> bool {
        let removed = self.entries.lock().await.remove(&node_id);
        match removed {
            Some(entry) => {
                entry.client.close().await;
                true
            }
            None => false,
        }
    }

    /// Number of pooled transports.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the pool holds no transport.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Close every pooled transport.
    pub async fn close_all(&self) {
        let entries: Vec<PoolEntry> = self.entries.lock().await.drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.client.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::client::{MockConnector, MockNodeClient};

    fn credentials(macaroon: &[u8]) -> NodeCredentials {
        NodeCredentials {
            grpc_address: "127.0.0.1:10009".to_string(),
            tls_certificate: b"cert".to_vec(),
            macaroon: macaroon.to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pool_reuses_until_credentials_change() {
        let client = Arc::new(MockNodeClient::new("02aa"));
        let connector = Arc::new(MockConnector::new(client.clone()));
        let pool = ConnectionPool::new(connector.clone());

        let first = credentials(b"mac-1");
        pool.get(7, Implementation::Lnd, &first).await.unwrap();
        pool.get(7, Implementation::Lnd, &first).await.unwrap();
        assert_eq!(connector.open_count(), 1);
        assert_eq!(client.close_count(), 0);

        pool.get(7, Implementation::Lnd, &credentials(b"mac-2"))
            .await
            .unwrap();
        assert_eq!(connector.open_count(), 2);
        assert_eq!(client.close_count(), 1);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_pool_surfaces_open_failure() {
        let connector = Arc::new(MockConnector::new(Arc::new(MockNodeClient::new("02aa"))));
        connector.fail.store(true, Ordering::SeqCst);
        let pool = ConnectionPool::new(connector);

        assert!(pool.get(1, Implementation::Cln, &credentials(b"x")).await.is_err());
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_pool_remove_closes_transport() {
        let client = Arc::new(MockNodeClient::new("02aa"));
        let pool = ConnectionPool::new(Arc::new(MockConnector::new(client.clone())));
        pool.get(3, Implementation::Lnd, &credentials(b"m")).await.unwrap();

        assert!(pool.remove(3).await);
        assert!(!pool.remove(3).await);
        assert_eq!(client.close_count(), 1);
    }
}
