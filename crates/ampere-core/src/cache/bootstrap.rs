// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Loading the caches from persistence at startup.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{info, warn};

use crate::domain::{Node, NodeId, NodeSettings};
use crate::error::Result;
use crate::persistence::{Persistence, TagBinding};

use super::Caches;

/// Counts of what [`Caches::bootstrap`] loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapSummary {
    /// Managed nodes with connection details.
    pub managed_nodes: usize,
    /// Channels of every status.
    pub channels: usize,
    /// Distinct channel peers.
    pub channel_peers: usize,
    /// Tag bindings.
    pub tag_bindings: usize,
}

fn settings_of(node: &Node, name: Option<String>) -> NodeSettings {
    NodeSettings {
        node_id: node.node_id,
        chain: node.chain,
        network: node.network,
        public_key: node.public_key.clone(),
        name,
        channel_status: None,
    }
}

impl Caches {
    /// Fill the caches with managed nodes, channels, channel peers and tags.
    pub async fn bootstrap(&self, persistence: &dyn Persistence) -> Result<BootstrapSummary> {
        let nodes: HashMap<NodeId, Node> = persistence
            .list_nodes()
            .await?
            .into_iter()
            .map(|node| (node.node_id, node))
            .collect();

        let mut managed = HashSet::new();
        for details in persistence.list_node_connection_details().await? {
            let Some(node) = nodes.get(&details.node_id) else {
                warn!(node_id = details.node_id, "Connection details without node row");
                continue;
            };
            managed.insert(node.node_id);
            self.nodes
                .set_managed_node(settings_of(node, Some(details.name.clone())), true)
                .await;
            self.services.set_node_connection_details(details).await;
        }

        let channels = persistence.list_channels().await?;
        // peer -> has a non-terminal channel
        let mut peers: BTreeMap<NodeId, bool> = BTreeMap::new();
        for channel in &channels {
            for endpoint in [channel.first_node_id, channel.second_node_id] {
                if managed.contains(&endpoint) {
                    continue;
                }
                let active = peers.entry(endpoint).or_default();
                *active |= !channel.status.is_terminal();
            }
            self.channels.set_channel(channel.clone()).await;
        }
        for (&peer_id, &active) in &peers {
            match nodes.get(&peer_id) {
                Some(node) => self.nodes.set_channel_peer(settings_of(node, None), active).await,
                None => warn!(node_id = peer_id, "Channel endpoint without node row"),
            }
        }

        let bindings = persistence.list_tag_bindings().await?;
        for binding in &bindings {
            match *binding {
                TagBinding::Node { tag_id, node_id } => self.tags.add_node_tag(node_id, tag_id).await,
                TagBinding::Channel { tag_id, channel_id } => {
                    self.tags.add_channel_tag(channel_id, tag_id).await
                }
            }
        }

        let summary = BootstrapSummary {
            managed_nodes: managed.len(),
            channels: channels.len(),
            channel_peers: peers.len(),
            tag_bindings: bindings.len(),
        };
        info!(
            managed_nodes = summary.managed_nodes,
            channels = summary.channels,
            channel_peers = summary.channel_peers,
            tag_bindings = summary.tag_bindings,
            "Caches bootstrapped"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::cache::nodes::NodeRole;
    use crate::domain::{
        Chain, Channel, ChannelPoint, ChannelStatus, Implementation, Network,
        NodeConnectionDetails, NodeCredentials, NodeCustomSettings, NodeKey,
    };
    use crate::persistence::SqlitePersistence;

    #[tokio::test]
    async fn test_bootstrap_loads_roles() {
        let persistence = SqlitePersistence::in_memory().await.unwrap();
        let key = |pk: &str| NodeKey::new(Chain::Bitcoin, Network::MainNet, pk);
        let managed = persistence.add_node(&key("02aa")).await.unwrap();
        let open_peer = persistence.add_node(&key("03bb")).await.unwrap();
        let closed_peer = persistence.add_node(&key("03cc")).await.unwrap();

        persistence
            .set_node_connection_details(&NodeConnectionDetails {
                node_id: managed,
                name: "alpha".to_string(),
                implementation: Implementation::Lnd,
                credentials: NodeCredentials::default(),
                custom_settings: NodeCustomSettings::all(),
                created_on: Utc::now(),
            })
            .await
            .unwrap();

        let open = Channel::new(
            &ChannelPoint::new("aa".repeat(32), 0),
            1_000_000,
            managed,
            open_peer,
            ChannelStatus::Open,
        );
        let closed = Channel::new(
            &ChannelPoint::new("bb".repeat(32), 1),
            500_000,
            closed_peer,
            managed,
            ChannelStatus::CooperativeClosed,
        );
        let open_id = persistence.add_channel(&open).await.unwrap();
        persistence.add_channel(&closed).await.unwrap();
        persistence
            .add_tag_binding(&TagBinding::Channel {
                tag_id: 4,
                channel_id: open_id,
            })
            .await
            .unwrap();

        let (caches, _tasks) = Caches::spawn(&CancellationToken::new());
        let summary = caches.bootstrap(&persistence).await.unwrap();
        assert_eq!(
            summary,
            BootstrapSummary {
                managed_nodes: 1,
                channels: 2,
                channel_peers: 2,
                tag_bindings: 1,
            }
        );

        assert_eq!(caches.nodes.get_active_managed_node_id(&key("02aa")).await, managed);
        assert_eq!(
            caches.nodes.get_node_ids(NodeRole::ActiveChannelPeer).await,
            vec![open_peer]
        );
        assert_eq!(caches.nodes.get_channel_peer_node_id(&key("03cc")).await, closed_peer);
        assert_eq!(
            caches
                .channels
                .get_active_channel_id_by_channel_point(&format!("{}:0", "aa".repeat(32)))
                .await,
            open_id
        );
        assert!(caches.services.get_node_connection_details(managed).await.is_some());
        assert_eq!(caches.tags.get_channel_ids_by_tag(4).await, vec![open_id]);
    }
}
