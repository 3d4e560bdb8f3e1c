// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Desired and current state of every supervised unit.
//!
//! The actor also owns the cancel handles of running units, the per-node
//! import success times and the connection details of managed nodes.
//!
//! Status writes follow a small state machine:
//!
//! ```text
//! Inactive ──▶ Pending ──▶ Initializing ──▶ Active
//!    ▲            │             │              │
//!    └────────────┴─────────────┴──────────────┘  (deactivate or failure)
//! ```
//!
//! * Pending needs a cancel handle, either supplied or kept from the prior state.
//! * Active stamps the activation time and clears every other timestamp.
//! * Inactive cancels the stored handle and stamps the inactivation time.
//! * Writing the current status again is a no-op, except for Initializing.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::domain::{
    CoreServiceType, ImportType, Implementation, NodeConnectionDetails, NodeId, NodeServiceKey,
    NodeServiceType, ServiceState, ServiceStatus, StateWorld,
};

use super::{Actor, ask, spawn_actor, tell};

const NAME: &str = "services";

/// A supervised unit: a core service or a node-bound service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ServiceUnit {
    /// Not bound to a node.
    Core(CoreServiceType),
    /// Bound to a managed node.
    Node(NodeServiceKey),
}

impl ServiceUnit {
    /// Managed node of a node-bound unit.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Self::Core(_) => None,
            Self::Node(key) => Some(key.node_id),
        }
    }
}

impl From<CoreServiceType> for ServiceUnit {
    fn from(service_type: CoreServiceType) -> Self {
        Self::Core(service_type)
    }
}

impl From<NodeServiceKey> for ServiceUnit {
    fn from(key: NodeServiceKey) -> Self {
        Self::Node(key)
    }
}

/// Desired and current state of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSnapshot {
    /// Unit.
    pub unit: ServiceUnit,
    /// What the operator asked for.
    pub desired: ServiceState,
    /// What the workers achieved.
    pub current: ServiceState,
}

#[derive(Default)]
struct ServiceEntry {
    state: ServiceState,
    cancel: Option<CancellationToken>,
}

impl ServiceEntry {
    fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }

    /// Apply a status write. Returns false when the write was rejected.
    fn transition(
        &mut self,
        status: ServiceStatus,
        cancel: Option<CancellationToken>,
        now: DateTime<Utc>,
    ) -> bool {
        if status == self.state.status && status != ServiceStatus::Initializing {
            return true;
        }
        match status {
            ServiceStatus::Pending => {
                let Some(cancel) = cancel.or_else(|| self.cancel.take()) else {
                    return false;
                };
                self.cancel = Some(cancel);
                self.state.pending_time = Some(now);
            }
            ServiceStatus::Initializing => {
                if cancel.is_some() {
                    self.cancel = cancel;
                }
                self.state.initialization_time = Some(now);
            }
            ServiceStatus::Active => {
                if cancel.is_some() {
                    self.cancel = cancel;
                }
                self.state.active_time = Some(now);
                self.state.pending_time = None;
                self.state.initialization_time = None;
                self.state.inactivation_time = None;
                self.state.failure_time = None;
            }
            ServiceStatus::Inactive => {
                self.cancel();
                self.state.pending_time = None;
                self.state.initialization_time = None;
                self.state.inactivation_time = Some(now);
            }
            ServiceStatus::Deleted | ServiceStatus::Archived | ServiceStatus::TimedOut => {
                self.cancel();
            }
        }
        self.state.status = status;
        true
    }

    fn fail(&mut self, now: DateTime<Utc>) {
        self.transition(ServiceStatus::Inactive, None, now);
        self.state.inactivation_time = Some(now);
        self.state.failure_time = Some(now);
    }
}

#[derive(Default)]
struct ServiceWorld {
    core: HashMap<CoreServiceType, ServiceEntry>,
    nodes: HashMap<NodeServiceKey, ServiceEntry>,
}

impl ServiceWorld {
    fn entry(&mut self, unit: ServiceUnit) -> &mut ServiceEntry {
        match unit {
            ServiceUnit::Core(service_type) => self.core.entry(service_type).or_default(),
            ServiceUnit::Node(key) => self.nodes.entry(key).or_default(),
        }
    }

    fn state(&self, unit: &ServiceUnit) -> ServiceState {
        let entry = match unit {
            ServiceUnit::Core(service_type) => self.core.get(service_type),
            ServiceUnit::Node(key) => self.nodes.get(key),
        };
        entry.map(|entry| entry.state.clone()).unwrap_or_default()
    }

    fn units(&self) -> impl Iterator<Item = ServiceUnit> + '_ {
        self.core
            .keys()
            .map(|service_type| ServiceUnit::Core(*service_type))
            .chain(self.nodes.keys().map(|key| ServiceUnit::Node(*key)))
    }
}

pub(crate) enum ServiceCommand {
    InitStates,
    State {
        world: StateWorld,
        unit: ServiceUnit,
        reply: oneshot::Sender<ServiceState>,
    },
    SetStatus {
        world: StateWorld,
        unit: ServiceUnit,
        status: ServiceStatus,
        cancel: Option<CancellationToken>,
        reply: oneshot::Sender<bool>,
    },
    MarkFailed {
        world: StateWorld,
        unit: ServiceUnit,
    },
    Cancel(ServiceUnit),
    ChannelBalanceStreamActive {
        node_id: NodeId,
        reply: oneshot::Sender<bool>,
    },
    NodeIdsForImplementation {
        implementation: Implementation,
        reply: oneshot::Sender<Vec<NodeId>>,
    },
    Snapshots {
        node_id: Option<NodeId>,
        reply: oneshot::Sender<Vec<ServiceSnapshot>>,
    },
    SuccessTime {
        node_id: NodeId,
        import_type: ImportType,
        reply: oneshot::Sender<Option<DateTime<Utc>>>,
    },
    SetSuccessTime {
        node_id: NodeId,
        import_type: ImportType,
        time: DateTime<Utc>,
    },
    ConnectionDetails {
        node_id: NodeId,
        reply: oneshot::Sender<Option<NodeConnectionDetails>>,
    },
    AllConnectionDetails {
        reply: oneshot::Sender<Vec<NodeConnectionDetails>>,
    },
    SetConnectionDetails(NodeConnectionDetails),
    RemoveNode(NodeId),
}

#[derive(Default)]
struct ServiceActor {
    desired: ServiceWorld,
    current: ServiceWorld,
    success_times: HashMap<NodeId, HashMap<ImportType, DateTime<Utc>>>,
    connection_details: HashMap<NodeId, NodeConnectionDetails>,
}

impl ServiceActor {
    fn world(&mut self, world: StateWorld) -> &mut ServiceWorld {
        match world {
            StateWorld::Desired => &mut self.desired,
            StateWorld::Current => &mut self.current,
        }
    }

    fn init_states(&mut self) {
        let now = Utc::now();
        for service_type in CoreServiceType::ALL {
            let unit = ServiceUnit::Core(service_type);
            self.desired.entry(unit).transition(ServiceStatus::Active, None, now);
            self.current.entry(unit).state.status = ServiceStatus::Inactive;
        }
    }

    fn set_status(
        &mut self,
        world: StateWorld,
        unit: ServiceUnit,
        status: ServiceStatus,
        cancel: Option<CancellationToken>,
    ) -> bool {
        let entry = self.world(world).entry(unit);
        let previous = entry.state.status;
        let accepted = entry.transition(status, cancel, Utc::now());
        if accepted {
            if previous != status {
                debug!(?world, ?unit, %previous, %status, "Service status changed");
            }
        } else {
            error!(
                ?world,
                ?unit,
                %previous,
                %status,
                "Rejected service status write without a cancel handle"
            );
        }
        accepted
    }

    fn channel_balance_stream_active(&self, node_id: NodeId) -> bool {
        let Some(details) = self.connection_details.get(&node_id) else {
            return false;
        };
        let implementation = details.implementation;
        let settings = details.custom_settings;
        NodeServiceType::channel_balance_cache_dependencies(implementation)
            .iter()
            .filter(|service_type| service_type.enabled_by(settings))
            .all(|service_type| {
                let key = NodeServiceKey::new(implementation, node_id, *service_type);
                self.current
                    .nodes
                    .get(&key)
                    .is_some_and(|entry| entry.state.status == ServiceStatus::Active)
            })
    }

    fn node_ids_for_implementation(&self, implementation: Implementation) -> Vec<NodeId> {
        let mut ids = BTreeSet::new();
        for world in [&self.desired, &self.current] {
            ids.extend(
                world
                    .nodes
                    .keys()
                    .filter(|key| key.implementation == implementation)
                    .map(|key| key.node_id),
            );
        }
        ids.extend(
            self.connection_details
                .values()
                .filter(|details| details.implementation == implementation)
                .map(|details| details.node_id),
        );
        ids.into_iter().collect()
    }

    fn snapshots(&self, node_id: Option<NodeId>) -> Vec<ServiceSnapshot> {
        let units: BTreeSet<ServiceUnit> = self
            .desired
            .units()
            .chain(self.current.units())
            .filter(|unit| node_id.is_none() || unit.node_id() == node_id)
            .collect();
        units
            .into_iter()
            .map(|unit| ServiceSnapshot {
                unit,
                desired: self.desired.state(&unit),
                current: self.current.state(&unit),
            })
            .collect()
    }

    fn remove_node(&mut self, node_id: NodeId) {
        for world in [&mut self.desired, &mut self.current] {
            world.nodes.retain(|key, entry| {
                if key.node_id == node_id {
                    entry.cancel();
                    false
                } else {
                    true
                }
            });
        }
        self.success_times.remove(&node_id);
        self.connection_details.remove(&node_id);
    }
}

impl Actor for ServiceActor {
    type Command = ServiceCommand;
    const NAME: &'static str = NAME;

    fn handle(&mut self, command: ServiceCommand) {
        match command {
            ServiceCommand::InitStates => self.init_states(),
            ServiceCommand::State { world, unit, reply } => {
                let _ = reply.send(self.world(world).state(&unit));
            }
            ServiceCommand::SetStatus {
                world,
                unit,
                status,
                cancel,
                reply,
            } => {
                let _ = reply.send(self.set_status(world, unit, status, cancel));
            }
            ServiceCommand::MarkFailed { world, unit } => {
                warn!(?world, ?unit, "Service failed");
                self.world(world).entry(unit).fail(Utc::now());
            }
            ServiceCommand::Cancel(unit) => {
                self.current.entry(unit).cancel();
            }
            ServiceCommand::ChannelBalanceStreamActive { node_id, reply } => {
                let _ = reply.send(self.channel_balance_stream_active(node_id));
            }
            ServiceCommand::NodeIdsForImplementation {
                implementation,
                reply,
            } => {
                let _ = reply.send(self.node_ids_for_implementation(implementation));
            }
            ServiceCommand::Snapshots { node_id, reply } => {
                let _ = reply.send(self.snapshots(node_id));
            }
            ServiceCommand::SuccessTime {
                node_id,
                import_type,
                reply,
            } => {
                let time = self
                    .success_times
                    .get(&node_id)
                    .and_then(|times| times.get(&import_type))
                    .copied();
                let _ = reply.send(time);
            }
            ServiceCommand::SetSuccessTime {
                node_id,
                import_type,
                time,
            } => {
                self.success_times
                    .entry(node_id)
                    .or_default()
                    .insert(import_type, time);
            }
            ServiceCommand::ConnectionDetails { node_id, reply } => {
                let _ = reply.send(self.connection_details.get(&node_id).cloned());
            }
            ServiceCommand::AllConnectionDetails { reply } => {
                let mut details: Vec<NodeConnectionDetails> =
                    self.connection_details.values().cloned().collect();
                details.sort_by_key(|details| details.node_id);
                let _ = reply.send(details);
            }
            ServiceCommand::SetConnectionDetails(details) => {
                self.connection_details.insert(details.node_id, details);
            }
            ServiceCommand::RemoveNode(node_id) => self.remove_node(node_id),
        }
    }
}

/// Handle to the services cache actor.
#[derive(Clone)]
pub struct ServiceCache {
    tx: mpsc::Sender<ServiceCommand>,
}

impl ServiceCache {
    /// Spawn the actor.
    pub fn spawn(cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, task) = spawn_actor(ServiceActor::default(), cancel);
        (Self { tx }, task)
    }

    /// Seed every core service as desired Active and current Inactive.
    pub async fn init_states(&self) {
        tell(&self.tx, NAME, ServiceCommand::InitStates).await
    }

    /// State of a unit; the default (Inactive) state when unknown.
    pub async fn get_state(&self, world: StateWorld, unit: impl Into<ServiceUnit>) -> ServiceState {
        let unit = unit.into();
        ask(&self.tx, NAME, |reply| ServiceCommand::State { world, unit, reply }).await
    }

    /// Status of a unit.
    pub async fn get_status(
        &self,
        world: StateWorld,
        unit: impl Into<ServiceUnit>,
    ) -> ServiceStatus {
        self.get_state(world, unit).await.status
    }

    /// Write a status. Returns false when the state machine rejected the write.
    pub async fn set_status(
        &self,
        world: StateWorld,
        unit: impl Into<ServiceUnit>,
        status: ServiceStatus,
        cancel: Option<CancellationToken>,
    ) -> bool {
        let unit = unit.into();
        ask(&self.tx, NAME, |reply| ServiceCommand::SetStatus {
            world,
            unit,
            status,
            cancel,
            reply,
        })
        .await
    }

    /// Desired status of a core service.
    pub async fn get_core_status(&self, world: StateWorld, service_type: CoreServiceType) -> ServiceStatus {
        self.get_status(world, service_type).await
    }

    /// Write the status of a core service.
    pub async fn set_core_status(
        &self,
        world: StateWorld,
        service_type: CoreServiceType,
        status: ServiceStatus,
        cancel: Option<CancellationToken>,
    ) -> bool {
        self.set_status(world, service_type, status, cancel).await
    }

    /// Status of a node service.
    pub async fn get_node_status(&self, world: StateWorld, key: NodeServiceKey) -> ServiceStatus {
        self.get_status(world, key).await
    }

    /// Write the status of a node service.
    pub async fn set_node_status(
        &self,
        world: StateWorld,
        key: NodeServiceKey,
        status: ServiceStatus,
        cancel: Option<CancellationToken>,
    ) -> bool {
        if key.node_id == 0 {
            error!(?key, "Refusing to write service status without node id");
            return false;
        }
        self.set_status(world, key, status, cancel).await
    }

    /// Inactivate the unit and stamp its failure time.
    pub async fn mark_failed(&self, world: StateWorld, unit: impl Into<ServiceUnit>) {
        let unit = unit.into();
        tell(&self.tx, NAME, ServiceCommand::MarkFailed { world, unit }).await
    }

    /// Fire and clear the cancel handle of a running unit.
    pub async fn cancel(&self, unit: impl Into<ServiceUnit>) {
        tell(&self.tx, NAME, ServiceCommand::Cancel(unit.into())).await
    }

    /// Whether every stream the channel-balance cache depends on is Active for the node.
    pub async fn is_channel_balance_stream_active(&self, node_id: NodeId) -> bool {
        ask(&self.tx, NAME, |reply| ServiceCommand::ChannelBalanceStreamActive {
            node_id,
            reply,
        })
        .await
    }

    /// Nodes known for an implementation in either world or in the connection details.
    pub async fn get_node_ids_for_implementation(
        &self,
        implementation: Implementation,
    ) -> Vec<NodeId> {
        ask(&self.tx, NAME, |reply| ServiceCommand::NodeIdsForImplementation {
            implementation,
            reply,
        })
        .await
    }

    /// Desired and current state of every known unit, ordered by unit.
    pub async fn list_snapshots(&self) -> Vec<ServiceSnapshot> {
        ask(&self.tx, NAME, |reply| ServiceCommand::Snapshots {
            node_id: None,
            reply,
        })
        .await
    }

    /// Desired and current state of the units bound to one node.
    pub async fn list_node_snapshots(&self, node_id: NodeId) -> Vec<ServiceSnapshot> {
        ask(&self.tx, NAME, |reply| ServiceCommand::Snapshots {
            node_id: Some(node_id),
            reply,
        })
        .await
    }

    /// Last successful run of an import for a node.
    pub async fn get_success_time(
        &self,
        node_id: NodeId,
        import_type: ImportType,
    ) -> Option<DateTime<Utc>> {
        ask(&self.tx, NAME, |reply| ServiceCommand::SuccessTime {
            node_id,
            import_type,
            reply,
        })
        .await
    }

    /// Record a successful import run.
    pub async fn set_success_time(
        &self,
        node_id: NodeId,
        import_type: ImportType,
        time: DateTime<Utc>,
    ) {
        tell(
            &self.tx,
            NAME,
            ServiceCommand::SetSuccessTime {
                node_id,
                import_type,
                time,
            },
        )
        .await
    }

    /// Connection details of a managed node.
    pub async fn get_node_connection_details(
        &self,
        node_id: NodeId,
    ) -> Option<NodeConnectionDetails> {
        if node_id == 0 {
            return None;
        }
        ask(&self.tx, NAME, |reply| ServiceCommand::ConnectionDetails {
            node_id,
            reply,
        })
        .await
    }

    /// Connection details of every managed node, ordered by node id.
    pub async fn list_node_connection_details(&self) -> Vec<NodeConnectionDetails> {
        ask(&self.tx, NAME, |reply| ServiceCommand::AllConnectionDetails {
            reply,
        })
        .await
    }

    /// Store connection details.
    pub async fn set_node_connection_details(&self, details: NodeConnectionDetails) {
        if details.node_id == 0 {
            error!("Refusing to cache connection details without node id");
            return;
        }
        tell(&self.tx, NAME, ServiceCommand::SetConnectionDetails(details)).await
    }

    /// Cancel and forget every unit, import time and connection detail of a node.
    pub async fn remove_node(&self, node_id: NodeId) {
        tell(&self.tx, NAME, ServiceCommand::RemoveNode(node_id)).await
    }
}
