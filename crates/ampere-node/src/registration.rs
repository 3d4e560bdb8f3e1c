// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Adding and removing managed nodes.

use ampere_core::domain::{
    Implementation, NodeConnectionDetails, NodeCredentials, NodeCustomSettings, NodeId, NodeKey,
    NodeSettings, ServiceStatus, StateWorld,
};
use chrono::Utc;
use tracing::info;

use crate::context::ServiceContext;
use crate::error::{Error, Result, with_timeout};
use crate::ingest::ensure_node;
use crate::supervisor::request_node_services;

/// What the operator supplies for a managed node.
#[derive(Debug, Clone)]
pub struct NodeRegistration {
    /// Display name.
    pub name: String,
    /// Daemon implementation.
    pub implementation: Implementation,
    /// Transport credentials.
    pub credentials: NodeCredentials,
    /// Import flags.
    pub custom_settings: NodeCustomSettings,
}

/// Store connection details for the node behind `registration` and request its services.
///
/// The daemon is asked for its identity first, so a node that cannot be
/// reached is never stored. Registering a known node replaces its details and
/// keeps its original creation time.
pub async fn set_node_connection_details(
    ctx: &ServiceContext,
    registration: NodeRegistration,
) -> Result<NodeId> {
    if registration.credentials.grpc_address.is_empty() {
        return Err(Error::InvalidRequest("gRPC address is required".to_string()));
    }
    let client = with_timeout(
        "connect",
        ctx.timeouts.bulk,
        ctx.pool
            .open_unbound(registration.implementation, &registration.credentials),
    )
    .await?;
    let info = with_timeout("get_info", ctx.timeouts.quick, client.get_info()).await?;
    if info.public_key.is_empty() {
        client.close().await;
        return Err(Error::InvalidRequest("daemon reported no public key".to_string()));
    }

    let key = NodeKey::new(info.chain, info.network, info.public_key.clone());
    let node_id = ensure_node(ctx, &key).await?.node_id;
    let created_on = match ctx.persistence.get_node_connection_details(node_id).await? {
        Some(existing) => existing.created_on,
        None => Utc::now(),
    };
    let details = NodeConnectionDetails {
        node_id,
        name: registration.name,
        implementation: registration.implementation,
        credentials: registration.credentials,
        custom_settings: registration.custom_settings,
        created_on,
    };
    ctx.persistence.set_node_connection_details(&details).await?;

    ctx.pool
        .adopt(node_id, details.implementation, &details.credentials, client)
        .await;
    ctx.caches
        .nodes
        .set_managed_node(
            NodeSettings {
                node_id,
                chain: info.chain,
                network: info.network,
                public_key: info.public_key,
                name: Some(details.name.clone()),
                channel_status: None,
            },
            true,
        )
        .await;
    ctx.caches
        .services
        .set_node_connection_details(details.clone())
        .await;
    let requested = request_node_services(&ctx.caches.services, &details).await;
    info!(
        node_id,
        implementation = %details.implementation,
        requested,
        "Managed node registered"
    );
    Ok(node_id)
}

/// Stop every service of a managed node and forget its connection details.
///
/// Stored channels and events stay. Returns false when the node had no details.
pub async fn remove_node_connection_details(ctx: &ServiceContext, node_id: NodeId) -> Result<bool> {
    if node_id == 0 {
        return Err(Error::InvalidRequest("node id is required".to_string()));
    }
    let services = &ctx.caches.services;
    for snapshot in services.list_node_snapshots(node_id).await {
        services
            .set_status(StateWorld::Desired, snapshot.unit, ServiceStatus::Inactive, None)
            .await;
        services
            .set_status(StateWorld::Current, snapshot.unit, ServiceStatus::Inactive, None)
            .await;
    }

    let removed = ctx.persistence.remove_node_connection_details(node_id).await?;
    services.remove_node(node_id).await;
    ctx.caches.channel_states.remove_node(node_id).await;
    if let Some(settings) = ctx.caches.nodes.get_node_settings(node_id).await {
        ctx.caches.nodes.set_managed_node(settings, false).await;
    }
    ctx.pool.remove(node_id).await;
    info!(node_id, removed, "Managed node removed");
    Ok(removed)
}
