// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node roles: managed nodes, channel peers and connected peers.
//!
//! Each role is an index keyed by (chain, network, public key). The "active"
//! index of a role is always a subset of its "all" index.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::domain::{Chain, ChannelPeerStatus, Network, NodeId, NodeKey, NodeSettings};

use super::{Actor, ask, spawn_actor, tell};

const NAME: &str = "nodes";

/// Node index a lookup goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Managed nodes that are currently active.
    ActiveManaged,
    /// Every managed node, active or not.
    AllManaged,
    /// Peers with at least one non-closed channel to a managed node.
    ActiveChannelPeer,
    /// Every node that ever had a channel with a managed node.
    AllChannelPeer,
    /// Peers currently connected to a managed node.
    ConnectedPeer,
}

pub(crate) enum NodeCommand {
    IdByKey {
        role: NodeRole,
        key: NodeKey,
        reply: oneshot::Sender<NodeId>,
    },
    Ids {
        role: NodeRole,
        network: Option<(Chain, Network)>,
        reply: oneshot::Sender<Vec<NodeId>>,
    },
    PublicKeys {
        role: NodeRole,
        chain: Chain,
        network: Network,
        reply: oneshot::Sender<Vec<String>>,
    },
    Settings {
        node_id: NodeId,
        reply: oneshot::Sender<Option<NodeSettings>>,
    },
    Name {
        node_id: NodeId,
        reply: oneshot::Sender<Option<String>>,
    },
    SetManagedNode {
        settings: NodeSettings,
        active: bool,
    },
    SetChannelPeer {
        settings: NodeSettings,
        active: bool,
    },
    SetConnectedPeer(NodeSettings),
    RemoveConnectedPeer(NodeId),
    RemoveNode(NodeId),
}

#[derive(Default)]
struct NodeActor {
    active_managed: HashMap<NodeKey, NodeId>,
    all_managed: HashMap<NodeKey, NodeId>,
    active_channel_peers: HashMap<NodeKey, NodeId>,
    all_channel_peers: HashMap<NodeKey, NodeId>,
    connected_peers: HashMap<NodeKey, NodeId>,
    settings: HashMap<NodeId, NodeSettings>,
    names: HashMap<NodeId, String>,
}

fn is_valid(settings: &NodeSettings) -> bool {
    if settings.node_id == 0 || settings.public_key.is_empty() {
        error!(
            node_id = settings.node_id,
            public_key = %settings.public_key,
            "Refusing to cache a node without node id or public key"
        );
        return false;
    }
    true
}

impl NodeActor {
    fn index(&self, role: NodeRole) -> &HashMap<NodeKey, NodeId> {
        match role {
            NodeRole::ActiveManaged => &self.active_managed,
            NodeRole::AllManaged => &self.all_managed,
            NodeRole::ActiveChannelPeer => &self.active_channel_peers,
            NodeRole::AllChannelPeer => &self.all_channel_peers,
            NodeRole::ConnectedPeer => &self.connected_peers,
        }
    }

    /// Store settings, keeping a previously known operator name.
    fn store_settings(&mut self, mut settings: NodeSettings) {
        if settings.name.is_none()
            && let Some(previous) = self.settings.get(&settings.node_id)
        {
            settings.name = previous.name.clone();
        }
        if settings.channel_status.is_none()
            && let Some(previous) = self.settings.get(&settings.node_id)
        {
            settings.channel_status = previous.channel_status;
        }
        self.settings.insert(settings.node_id, settings);
    }

    fn set_managed_node(&mut self, settings: NodeSettings, active: bool) {
        if !is_valid(&settings) {
            return;
        }
        let key = settings.key();
        self.all_managed.insert(key.clone(), settings.node_id);
        if active {
            self.active_managed.insert(key, settings.node_id);
        } else {
            self.active_managed.remove(&key);
        }
        if let Some(name) = settings.name.clone() {
            self.names.insert(settings.node_id, name);
        }
        self.store_settings(settings);
    }

    fn set_channel_peer(&mut self, mut settings: NodeSettings, active: bool) {
        if !is_valid(&settings) {
            return;
        }
        let key = settings.key();
        self.all_channel_peers.insert(key.clone(), settings.node_id);
        if active {
            self.active_channel_peers.insert(key, settings.node_id);
            settings.channel_status = Some(ChannelPeerStatus::Active);
        } else {
            self.active_channel_peers.remove(&key);
            settings.channel_status = Some(ChannelPeerStatus::Inactive);
        }
        self.store_settings(settings);
    }

    fn set_connected_peer(&mut self, settings: NodeSettings) {
        if !is_valid(&settings) {
            return;
        }
        self.connected_peers.insert(settings.key(), settings.node_id);
        self.store_settings(settings);
    }

    fn remove_connected_peer(&mut self, node_id: NodeId) {
        self.connected_peers.retain(|_, id| *id != node_id);
    }

    fn remove_node(&mut self, node_id: NodeId) {
        for index in [
            &mut self.active_managed,
            &mut self.all_managed,
            &mut self.active_channel_peers,
            &mut self.all_channel_peers,
            &mut self.connected_peers,
        ] {
            index.retain(|_, id| *id != node_id);
        }
        self.settings.remove(&node_id);
        self.names.remove(&node_id);
    }
}

impl Actor for NodeActor {
    type Command = NodeCommand;
    const NAME: &'static str = NAME;

    fn handle(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::IdByKey { role, key, reply } => {
                let _ = reply.send(self.index(role).get(&key).copied().unwrap_or_default());
            }
            NodeCommand::Ids {
                role,
                network,
                reply,
            } => {
                let mut ids: Vec<NodeId> = self
                    .index(role)
                    .iter()
                    .filter(|(key, _)| {
                        network.is_none_or(|(chain, network)| {
                            key.chain == chain && key.network == network
                        })
                    })
                    .map(|(_, id)| *id)
                    .collect();
                ids.sort_unstable();
                ids.dedup();
                let _ = reply.send(ids);
            }
            NodeCommand::PublicKeys {
                role,
                chain,
                network,
                reply,
            } => {
                let mut keys: Vec<String> = self
                    .index(role)
                    .keys()
                    .filter(|key| key.chain == chain && key.network == network)
                    .map(|key| key.public_key.clone())
                    .collect();
                keys.sort();
                let _ = reply.send(keys);
            }
            NodeCommand::Settings { node_id, reply } => {
                let _ = reply.send(self.settings.get(&node_id).cloned());
            }
            NodeCommand::Name { node_id, reply } => {
                let _ = reply.send(self.names.get(&node_id).cloned());
            }
            NodeCommand::SetManagedNode { settings, active } => {
                self.set_managed_node(settings, active)
            }
            NodeCommand::SetChannelPeer { settings, active } => {
                self.set_channel_peer(settings, active)
            }
            NodeCommand::SetConnectedPeer(settings) => self.set_connected_peer(settings),
            NodeCommand::RemoveConnectedPeer(node_id) => self.remove_connected_peer(node_id),
            NodeCommand::RemoveNode(node_id) => self.remove_node(node_id),
        }
    }
}

/// Handle to the nodes cache actor.
#[derive(Clone)]
pub struct NodeCache {
    tx: mpsc::Sender<NodeCommand>,
}

impl NodeCache {
    /// Spawn the actor.
    pub fn spawn(cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, task) = spawn_actor(NodeActor::default(), cancel);
        (Self { tx }, task)
    }

    /// Node id of `key` in the given index, 0 when absent or the key has no public key.
    pub async fn get_node_id(&self, role: NodeRole, key: &NodeKey) -> NodeId {
        if key.public_key.is_empty() {
            error!(?role, "Node lookup without public key");
            return 0;
        }
        let key = key.clone();
        ask(&self.tx, NAME, |reply| NodeCommand::IdByKey { role, key, reply }).await
    }

    /// Node id of an active managed node.
    pub async fn get_active_managed_node_id(&self, key: &NodeKey) -> NodeId {
        self.get_node_id(NodeRole::ActiveManaged, key).await
    }

    /// Node id of a managed node, active or not.
    pub async fn get_managed_node_id(&self, key: &NodeKey) -> NodeId {
        self.get_node_id(NodeRole::AllManaged, key).await
    }

    /// Node id of a peer with an open channel.
    pub async fn get_active_channel_peer_node_id(&self, key: &NodeKey) -> NodeId {
        self.get_node_id(NodeRole::ActiveChannelPeer, key).await
    }

    /// Node id of any node that ever had a channel with a managed node.
    pub async fn get_channel_peer_node_id(&self, key: &NodeKey) -> NodeId {
        self.get_node_id(NodeRole::AllChannelPeer, key).await
    }

    /// Node id of a currently connected peer.
    pub async fn get_connected_peer_node_id(&self, key: &NodeKey) -> NodeId {
        self.get_node_id(NodeRole::ConnectedPeer, key).await
    }

    /// Sorted node ids of the given index.
    pub async fn get_node_ids(&self, role: NodeRole) -> Vec<NodeId> {
        ask(&self.tx, NAME, |reply| NodeCommand::Ids {
            role,
            network: None,
            reply,
        })
        .await
    }

    /// Sorted node ids of the given index restricted to one chain and network.
    pub async fn get_node_ids_for_network(
        &self,
        role: NodeRole,
        chain: Chain,
        network: Network,
    ) -> Vec<NodeId> {
        ask(&self.tx, NAME, |reply| NodeCommand::Ids {
            role,
            network: Some((chain, network)),
            reply,
        })
        .await
    }

    /// Sorted public keys of the given index for one chain and network.
    pub async fn get_public_keys(
        &self,
        role: NodeRole,
        chain: Chain,
        network: Network,
    ) -> Vec<String> {
        ask(&self.tx, NAME, |reply| NodeCommand::PublicKeys {
            role,
            chain,
            network,
            reply,
        })
        .await
    }

    /// Cached settings of a node.
    pub async fn get_node_settings(&self, node_id: NodeId) -> Option<NodeSettings> {
        if node_id == 0 {
            return None;
        }
        ask(&self.tx, NAME, |reply| NodeCommand::Settings { node_id, reply }).await
    }

    /// Operator-assigned name of a managed node.
    pub async fn get_node_name(&self, node_id: NodeId) -> Option<String> {
        if node_id == 0 {
            return None;
        }
        ask(&self.tx, NAME, |reply| NodeCommand::Name { node_id, reply }).await
    }

    /// Register a managed node. Inactive nodes leave the active index but stay in the all index.
    pub async fn set_managed_node(&self, settings: NodeSettings, active: bool) {
        tell(&self.tx, NAME, NodeCommand::SetManagedNode { settings, active }).await
    }

    /// Register a channel peer and record its channel status.
    pub async fn set_channel_peer(&self, settings: NodeSettings, active: bool) {
        tell(&self.tx, NAME, NodeCommand::SetChannelPeer { settings, active }).await
    }

    /// Mark a peer as connected.
    pub async fn set_connected_peer(&self, settings: NodeSettings) {
        tell(&self.tx, NAME, NodeCommand::SetConnectedPeer(settings)).await
    }

    /// Mark a peer as disconnected.
    pub async fn remove_connected_peer(&self, node_id: NodeId) {
        tell(&self.tx, NAME, NodeCommand::RemoveConnectedPeer(node_id)).await
    }

    /// Forget a node in every index.
    pub async fn remove_node(&self, node_id: NodeId) {
        if node_id == 0 {
            error!("Refusing to remove node id 0");
            return;
        }
        tell(&self.tx, NAME, NodeCommand::RemoveNode(node_id)).await
    }
}
