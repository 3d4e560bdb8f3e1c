// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tag bindings of nodes and channels.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::domain::{ChannelId, NodeId, TagId};

use super::{Actor, ask, spawn_actor, tell};

const NAME: &str = "tags";

pub(crate) enum TagCommand {
    NodeIds {
        tag_id: TagId,
        reply: oneshot::Sender<Vec<NodeId>>,
    },
    ChannelIds {
        tag_id: TagId,
        reply: oneshot::Sender<Vec<ChannelId>>,
    },
    Tags {
        node_id: NodeId,
        channel_id: ChannelId,
        reply: oneshot::Sender<Vec<TagId>>,
    },
    AddNodeTag {
        node_id: NodeId,
        tag_id: TagId,
    },
    RemoveNodeTag {
        node_id: NodeId,
        tag_id: TagId,
    },
    AddChannelTag {
        channel_id: ChannelId,
        tag_id: TagId,
    },
    RemoveChannelTag {
        channel_id: ChannelId,
        tag_id: TagId,
    },
}

#[derive(Default)]
struct TagActor {
    nodes: HashMap<NodeId, BTreeSet<TagId>>,
    channels: HashMap<ChannelId, BTreeSet<TagId>>,
}

fn subjects_with<K: Copy + Ord>(map: &HashMap<K, BTreeSet<TagId>>, tag_id: TagId) -> Vec<K> {
    let mut subjects: Vec<K> = map
        .iter()
        .filter(|(_, tags)| tags.contains(&tag_id))
        .map(|(subject, _)| *subject)
        .collect();
    subjects.sort_unstable();
    subjects
}

fn remove_tag<K: Eq + std::hash::Hash>(map: &mut HashMap<K, BTreeSet<TagId>>, key: K, tag_id: TagId) {
    if let Some(tags) = map.get_mut(&key) {
        tags.remove(&tag_id);
        if tags.is_empty() {
            map.remove(&key);
        }
    }
}

impl Actor for TagActor {
    type Command = TagCommand;
    const NAME: &'static str = NAME;

    fn handle(&mut self, command: TagCommand) {
        match command {
            TagCommand::NodeIds { tag_id, reply } => {
                let _ = reply.send(subjects_with(&self.nodes, tag_id));
            }
            TagCommand::ChannelIds { tag_id, reply } => {
                let _ = reply.send(subjects_with(&self.channels, tag_id));
            }
            TagCommand::Tags {
                node_id,
                channel_id,
                reply,
            } => {
                let mut merged = BTreeSet::new();
                if let Some(tags) = self.nodes.get(&node_id) {
                    merged.extend(tags.iter().copied());
                }
                if let Some(tags) = self.channels.get(&channel_id) {
                    merged.extend(tags.iter().copied());
                }
                let _ = reply.send(merged.into_iter().collect());
            }
            TagCommand::AddNodeTag { node_id, tag_id } => {
                self.nodes.entry(node_id).or_default().insert(tag_id);
            }
            TagCommand::RemoveNodeTag { node_id, tag_id } => {
                remove_tag(&mut self.nodes, node_id, tag_id)
            }
            TagCommand::AddChannelTag { channel_id, tag_id } => {
                self.channels.entry(channel_id).or_default().insert(tag_id);
            }
            TagCommand::RemoveChannelTag { channel_id, tag_id } => {
                remove_tag(&mut self.channels, channel_id, tag_id)
            }
        }
    }
}

/// Handle to the tags cache actor.
#[derive(Clone)]
pub struct TagCache {
    tx: mpsc::Sender<TagCommand>,
}

impl TagCache {
    /// Spawn the actor.
    pub fn spawn(cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, task) = spawn_actor(TagActor::default(), cancel);
        (Self { tx }, task)
    }

    /// Nodes carrying the tag, ascending.
    pub async fn get_node_ids_by_tag(&self, tag_id: TagId) -> Vec<NodeId> {
        ask(&self.tx, NAME, |reply| TagCommand::NodeIds { tag_id, reply }).await
    }

    /// Channels carrying the tag, ascending.
    pub async fn get_channel_ids_by_tag(&self, tag_id: TagId) -> Vec<ChannelId> {
        ask(&self.tx, NAME, |reply| TagCommand::ChannelIds { tag_id, reply }).await
    }

    /// Tags of a node and a channel merged, ascending and duplicate-free. Pass 0 to skip either.
    pub async fn get_tags(&self, node_id: NodeId, channel_id: ChannelId) -> Vec<TagId> {
        ask(&self.tx, NAME, |reply| TagCommand::Tags {
            node_id,
            channel_id,
            reply,
        })
        .await
    }

    /// Tags of a node, ascending.
    pub async fn get_node_tags(&self, node_id: NodeId) -> Vec<TagId> {
        self.get_tags(node_id, 0).await
    }

    /// Tags of a channel, ascending.
    pub async fn get_channel_tags(&self, channel_id: ChannelId) -> Vec<TagId> {
        self.get_tags(0, channel_id).await
    }

    /// Bind a tag to a node.
    pub async fn add_node_tag(&self, node_id: NodeId, tag_id: TagId) {
        if node_id == 0 || tag_id == 0 {
            error!(node_id, tag_id, "Refusing to tag without node id or tag id");
            return;
        }
        tell(&self.tx, NAME, TagCommand::AddNodeTag { node_id, tag_id }).await
    }

    /// Unbind a tag from a node.
    pub async fn remove_node_tag(&self, node_id: NodeId, tag_id: TagId) {
        tell(&self.tx, NAME, TagCommand::RemoveNodeTag { node_id, tag_id }).await
    }

    /// Bind a tag to a channel.
    pub async fn add_channel_tag(&self, channel_id: ChannelId, tag_id: TagId) {
        if channel_id == 0 || tag_id == 0 {
            error!(channel_id, tag_id, "Refusing to tag without channel id or tag id");
            return;
        }
        tell(&self.tx, NAME, TagCommand::AddChannelTag { channel_id, tag_id }).await
    }

    /// Unbind a tag from a channel.
    pub async fn remove_channel_tag(&self, channel_id: ChannelId, tag_id: TagId) {
        tell(&self.tx, NAME, TagCommand::RemoveChannelTag { channel_id, tag_id }).await
    }
}
