// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-channel balance, HTLC and routing policy snapshots of managed nodes.
//!
//! Every balance change is validated before it replaces the stored snapshot:
//! both sides must be non-negative and their sum may exceed the capacity by at
//! most the channel's tolerance, the larger of the two reserve-plus-dust
//! amounts plus the absolute commit fee. A rejected change leaves the previous
//! snapshot in place.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::domain::{ChannelBalanceEvent, ChannelId, NodeId, RoutingPolicy, ServiceStatus};

use super::{Actor, ask, ask_or, spawn_actor, tell};

const NAME: &str = "channel_states";

/// Rejected balance update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceInvariantError {
    /// Local balance below zero.
    #[error("channel {channel_id}: negative local balance {local_balance}")]
    NegativeLocal {
        /// Channel.
        channel_id: ChannelId,
        /// Offending balance.
        local_balance: i64,
    },

    /// Remote balance below zero.
    #[error("channel {channel_id}: negative remote balance {remote_balance}")]
    NegativeRemote {
        /// Channel.
        channel_id: ChannelId,
        /// Offending balance.
        remote_balance: i64,
    },

    /// Local plus remote exceeds capacity plus tolerance.
    #[error("channel {channel_id}: balances {total} exceed capacity {capacity} + tolerance {tolerance}")]
    CapacityExceeded {
        /// Channel.
        channel_id: ChannelId,
        /// Local plus remote.
        total: i64,
        /// Capacity.
        capacity: i64,
        /// Allowed overrun.
        tolerance: i64,
    },

    /// No snapshot for the channel.
    #[error("node {node_id} has no snapshot for channel {channel_id}")]
    UnknownChannel {
        /// Managed node.
        node_id: NodeId,
        /// Channel.
        channel_id: ChannelId,
    },

    /// The actor is gone.
    #[error("channel state cache is not running")]
    Unavailable,
}

/// HTLC in flight on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingHtlc {
    /// Incoming when true, outgoing otherwise.
    pub incoming: bool,
    /// Amount in satoshis.
    pub amount: i64,
    /// Payment hash, hex.
    pub hash_lock: String,
    /// Absolute expiry height.
    pub expiration_height: u32,
    /// Channel the HTLC is forwarded to or from, zero when local.
    pub forwarding_channel_id: ChannelId,
}

/// Fields only refreshed on a full resync.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StaleChannelFields {
    /// Unsettled balance in satoshis.
    pub unsettled_balance: i64,
    /// Lifetime satoshis sent.
    pub total_satoshis_sent: i64,
    /// Lifetime satoshis received.
    pub total_satoshis_received: i64,
    /// Commitment updates.
    pub num_updates: u64,
    /// Commitment transaction weight.
    pub commit_weight: i64,
    /// Fee rate per kiloweight.
    pub fee_per_kw: i64,
}

/// Derived state of one channel of one managed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    /// Managed node.
    pub node_id: NodeId,
    /// Channel.
    pub channel_id: ChannelId,
    /// Node on the other end.
    pub remote_node_id: NodeId,
    /// Active, Inactive or Deleted once closed.
    pub status: ServiceStatus,
    /// Whether the link to the peer is up.
    pub link_active: bool,
    /// Capacity in satoshis.
    pub capacity: i64,
    /// Local balance in satoshis.
    pub local_balance: i64,
    /// Remote balance in satoshis.
    pub remote_balance: i64,
    /// Local channel reserve.
    pub local_channel_reserve: i64,
    /// Remote channel reserve.
    pub remote_channel_reserve: i64,
    /// Local dust limit.
    pub local_dust_limit: i64,
    /// Remote dust limit.
    pub remote_dust_limit: i64,
    /// Commitment fee.
    pub commit_fee: i64,
    /// HTLCs in flight.
    pub pending_htlcs: Vec<PendingHtlc>,
    /// Our advertised policy.
    pub local_routing_policy: RoutingPolicy,
    /// The peer's advertised policy.
    pub remote_routing_policy: RoutingPolicy,
    /// Fields refreshed only on resync.
    pub stale: Option<StaleChannelFields>,
    /// Last change.
    pub updated_on: DateTime<Utc>,
}

impl ChannelSnapshot {
    /// Allowed overrun of local plus remote over the capacity.
    pub fn tolerance(&self) -> i64 {
        let local = self.local_channel_reserve + self.local_dust_limit;
        let remote = self.remote_channel_reserve + self.remote_dust_limit;
        local.max(remote) + self.commit_fee.abs()
    }

    /// Check the balance invariants.
    pub fn validate(&self) -> Result<(), BalanceInvariantError> {
        if self.local_balance < 0 {
            return Err(BalanceInvariantError::NegativeLocal {
                channel_id: self.channel_id,
                local_balance: self.local_balance,
            });
        }
        if self.remote_balance < 0 {
            return Err(BalanceInvariantError::NegativeRemote {
                channel_id: self.channel_id,
                remote_balance: self.remote_balance,
            });
        }
        let total = self.local_balance + self.remote_balance;
        let tolerance = self.tolerance();
        if total > self.capacity + tolerance {
            return Err(BalanceInvariantError::CapacityExceeded {
                channel_id: self.channel_id,
                total,
                capacity: self.capacity,
                tolerance,
            });
        }
        Ok(())
    }
}

type BalanceReply = oneshot::Sender<Result<ChannelBalanceEvent, BalanceInvariantError>>;

pub(crate) enum ChannelStateCommand {
    SetStatesForNode {
        node_id: NodeId,
        snapshots: Vec<ChannelSnapshot>,
        reply: oneshot::Sender<Vec<BalanceInvariantError>>,
    },
    UpdateBalance {
        node_id: NodeId,
        channel_id: ChannelId,
        local_balance: i64,
        remote_balance: i64,
        reply: BalanceReply,
    },
    ApplyDelta {
        node_id: NodeId,
        channel_id: ChannelId,
        delta_msat: i64,
        reply: BalanceReply,
    },
    SetStatus {
        node_id: NodeId,
        channel_id: ChannelId,
        status: ServiceStatus,
    },
    SetLinkStatusForPeer {
        node_id: NodeId,
        remote_node_id: NodeId,
        active: bool,
    },
    SetRoutingPolicy {
        node_id: NodeId,
        channel_id: ChannelId,
        local: bool,
        policy: RoutingPolicy,
    },
    State {
        node_id: NodeId,
        channel_id: ChannelId,
        reply: oneshot::Sender<Option<ChannelSnapshot>>,
    },
    StatesForNode {
        node_id: NodeId,
        reply: oneshot::Sender<Vec<ChannelSnapshot>>,
    },
    RemoveNode(NodeId),
}

#[derive(Default)]
struct ChannelStateActor {
    nodes: HashMap<NodeId, BTreeMap<ChannelId, ChannelSnapshot>>,
}

impl ChannelStateActor {
    fn set_states_for_node(
        &mut self,
        node_id: NodeId,
        snapshots: Vec<ChannelSnapshot>,
    ) -> Vec<BalanceInvariantError> {
        let mut previous = self.nodes.remove(&node_id).unwrap_or_default();
        let mut next = BTreeMap::new();
        let mut errors = Vec::new();
        for snapshot in snapshots {
            let channel_id = snapshot.channel_id;
            match snapshot.validate() {
                Ok(()) => {
                    next.insert(channel_id, snapshot);
                }
                Err(e) => {
                    error!(node_id, channel_id, error = %e, "Rejected channel snapshot on resync");
                    if let Some(prior) = previous.remove(&channel_id) {
                        next.insert(channel_id, prior);
                    }
                    errors.push(e);
                }
            }
        }
        self.nodes.insert(node_id, next);
        errors
    }

    /// Validate a candidate and swap it in, producing the balance event.
    fn replace(
        &mut self,
        node_id: NodeId,
        channel_id: ChannelId,
        change: impl FnOnce(&mut ChannelSnapshot),
    ) -> Result<ChannelBalanceEvent, BalanceInvariantError> {
        let Some(current) = self
            .nodes
            .get_mut(&node_id)
            .and_then(|channels| channels.get_mut(&channel_id))
        else {
            return Err(BalanceInvariantError::UnknownChannel {
                node_id,
                channel_id,
            });
        };
        let mut candidate = current.clone();
        change(&mut candidate);
        if let Err(e) = candidate.validate() {
            error!(node_id, channel_id, error = %e, "Rejected channel balance update");
            return Err(e);
        }
        let now = Utc::now();
        candidate.updated_on = now;
        let event = ChannelBalanceEvent {
            node_id,
            channel_id,
            remote_node_id: candidate.remote_node_id,
            capacity: candidate.capacity,
            previous_local_balance: current.local_balance,
            local_balance: candidate.local_balance,
            remote_balance: candidate.remote_balance,
            time: now,
        };
        *current = candidate;
        Ok(event)
    }

    fn channel_mut(&mut self, node_id: NodeId, channel_id: ChannelId) -> Option<&mut ChannelSnapshot> {
        let snapshot = self
            .nodes
            .get_mut(&node_id)
            .and_then(|channels| channels.get_mut(&channel_id));
        if snapshot.is_none() {
            warn!(node_id, channel_id, "No channel snapshot to update");
        }
        snapshot
    }
}

impl Actor for ChannelStateActor {
    type Command = ChannelStateCommand;
    const NAME: &'static str = NAME;

    fn handle(&mut self, command: ChannelStateCommand) {
        match command {
            ChannelStateCommand::SetStatesForNode {
                node_id,
                snapshots,
                reply,
            } => {
                let _ = reply.send(self.set_states_for_node(node_id, snapshots));
            }
            ChannelStateCommand::UpdateBalance {
                node_id,
                channel_id,
                local_balance,
                remote_balance,
                reply,
            } => {
                let result = self.replace(node_id, channel_id, |snapshot| {
                    snapshot.local_balance = local_balance;
                    snapshot.remote_balance = remote_balance;
                });
                let _ = reply.send(result);
            }
            ChannelStateCommand::ApplyDelta {
                node_id,
                channel_id,
                delta_msat,
                reply,
            } => {
                let delta = delta_msat / 1000;
                let result = self.replace(node_id, channel_id, |snapshot| {
                    snapshot.local_balance += delta;
                    snapshot.remote_balance -= delta;
                });
                let _ = reply.send(result);
            }
            ChannelStateCommand::SetStatus {
                node_id,
                channel_id,
                status,
            } => {
                if let Some(snapshot) = self.channel_mut(node_id, channel_id) {
                    snapshot.status = status;
                    snapshot.updated_on = Utc::now();
                }
            }
            ChannelStateCommand::SetLinkStatusForPeer {
                node_id,
                remote_node_id,
                active,
            } => {
                let now = Utc::now();
                for snapshot in self
                    .nodes
                    .get_mut(&node_id)
                    .into_iter()
                    .flat_map(|channels| channels.values_mut())
                    .filter(|snapshot| snapshot.remote_node_id == remote_node_id)
                {
                    snapshot.link_active = active;
                    if snapshot.status != ServiceStatus::Deleted {
                        snapshot.status = if active {
                            ServiceStatus::Active
                        } else {
                            ServiceStatus::Inactive
                        };
                    }
                    snapshot.updated_on = now;
                }
            }
            ChannelStateCommand::SetRoutingPolicy {
                node_id,
                channel_id,
                local,
                policy,
            } => {
                if let Some(snapshot) = self.channel_mut(node_id, channel_id) {
                    if local {
                        snapshot.local_routing_policy = policy;
                    } else {
                        snapshot.remote_routing_policy = policy;
                    }
                    snapshot.updated_on = Utc::now();
                }
            }
            ChannelStateCommand::State {
                node_id,
                channel_id,
                reply,
            } => {
                let snapshot = self
                    .nodes
                    .get(&node_id)
                    .and_then(|channels| channels.get(&channel_id))
                    .cloned();
                let _ = reply.send(snapshot);
            }
            ChannelStateCommand::StatesForNode { node_id, reply } => {
                let snapshots = self
                    .nodes
                    .get(&node_id)
                    .map(|channels| channels.values().cloned().collect())
                    .unwrap_or_default();
                let _ = reply.send(snapshots);
            }
            ChannelStateCommand::RemoveNode(node_id) => {
                self.nodes.remove(&node_id);
            }
        }
    }
}

/// Handle to the channel state actor.
#[derive(Clone)]
pub struct ChannelStateCache {
    tx: mpsc::Sender<ChannelStateCommand>,
}

impl ChannelStateCache {
    /// Spawn the actor.
    pub fn spawn(cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, task) = spawn_actor(ChannelStateActor::default(), cancel);
        (Self { tx }, task)
    }

    /// Replace every snapshot of a node. Invalid snapshots keep their prior
    /// version (if any) and are reported back.
    pub async fn set_states_for_node(
        &self,
        node_id: NodeId,
        snapshots: Vec<ChannelSnapshot>,
    ) -> Vec<BalanceInvariantError> {
        if node_id == 0 {
            error!("Refusing to store channel snapshots without node id");
            return Vec::new();
        }
        ask(&self.tx, NAME, |reply| ChannelStateCommand::SetStatesForNode {
            node_id,
            snapshots,
            reply,
        })
        .await
    }

    /// Set both balances of a channel.
    pub async fn update_balance(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        local_balance: i64,
        remote_balance: i64,
    ) -> Result<ChannelBalanceEvent, BalanceInvariantError> {
        ask_or(&self.tx, NAME, Err(BalanceInvariantError::Unavailable), |reply| {
            ChannelStateCommand::UpdateBalance {
                node_id,
                channel_id,
                local_balance,
                remote_balance,
                reply,
            }
        })
        .await
    }

    /// Move `delta_msat` from the remote to the local side (negative moves it back).
    pub async fn apply_balance_delta(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        delta_msat: i64,
    ) -> Result<ChannelBalanceEvent, BalanceInvariantError> {
        ask_or(&self.tx, NAME, Err(BalanceInvariantError::Unavailable), |reply| {
            ChannelStateCommand::ApplyDelta {
                node_id,
                channel_id,
                delta_msat,
                reply,
            }
        })
        .await
    }

    /// Set the status of one snapshot.
    pub async fn set_status(&self, node_id: NodeId, channel_id: ChannelId, status: ServiceStatus) {
        tell(
            &self.tx,
            NAME,
            ChannelStateCommand::SetStatus {
                node_id,
                channel_id,
                status,
            },
        )
        .await
    }

    /// Flip the link status of every channel of `node_id` with `remote_node_id`.
    pub async fn set_link_status_for_peer(
        &self,
        node_id: NodeId,
        remote_node_id: NodeId,
        active: bool,
    ) {
        tell(
            &self.tx,
            NAME,
            ChannelStateCommand::SetLinkStatusForPeer {
                node_id,
                remote_node_id,
                active,
            },
        )
        .await
    }

    /// Store the local or remote routing policy of a channel.
    pub async fn set_routing_policy(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        local: bool,
        policy: RoutingPolicy,
    ) {
        tell(
            &self.tx,
            NAME,
            ChannelStateCommand::SetRoutingPolicy {
                node_id,
                channel_id,
                local,
                policy,
            },
        )
        .await
    }

    /// Snapshot of one channel.
    pub async fn get_state(&self, node_id: NodeId, channel_id: ChannelId) -> Option<ChannelSnapshot> {
        ask(&self.tx, NAME, |reply| ChannelStateCommand::State {
            node_id,
            channel_id,
            reply,
        })
        .await
    }

    /// Snapshots of a node ordered by channel id.
    pub async fn get_states_for_node(&self, node_id: NodeId) -> Vec<ChannelSnapshot> {
        ask(&self.tx, NAME, |reply| ChannelStateCommand::StatesForNode {
            node_id,
            reply,
        })
        .await
    }

    /// Forget every snapshot of a node.
    pub async fn remove_node(&self, node_id: NodeId) {
        tell(&self.tx, NAME, ChannelStateCommand::RemoveNode(node_id)).await
    }
}
