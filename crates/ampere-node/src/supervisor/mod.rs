// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation of desired and current service state.
//!
//! Every tick the supervisor compares the two worlds of every known unit:
//!
//! - desired Active, current Inactive: write Pending with a fresh child
//!   token and spawn the unit's factory.
//! - desired Inactive, current Pending, Initializing or Active: write
//!   Inactive, which fires the stored token.
//!
//! A unit is never started twice: until its previous task has finished it
//! is left alone. When a task returns on its own, an Ok outcome writes
//! Inactive and an error (or panic) marks the unit failed. A task that
//! returns after its token fired writes nothing; whoever cancelled it already
//! recorded the new status.

mod registry;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use ampere_core::cache::{ServiceCache, ServiceUnit};
use ampere_core::domain::{
    CoreServiceType, NodeConnectionDetails, NodeServiceKey, NodeServiceType, ServiceStatus,
    StateWorld,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::ServiceContext;

pub use registry::{CoreFactory, NodeFactory, ServiceFuture, ServiceRegistry};

type UnitFactory = Box<dyn FnOnce(ServiceContext, CancellationToken) -> ServiceFuture + Send>;

/// Polling interval of the activate and inactivate helpers.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Drives every unit toward its desired status.
pub struct Supervisor {
    ctx: ServiceContext,
    registry: ServiceRegistry,
    running: HashMap<ServiceUnit, JoinHandle<()>>,
    unregistered: HashSet<ServiceUnit>,
}

impl Supervisor {
    /// Create a supervisor.
    pub fn new(ctx: ServiceContext, registry: ServiceRegistry) -> Self {
        Self {
            ctx,
            registry,
            running: HashMap::new(),
            unregistered: HashSet::new(),
        }
    }

    /// Reconcile every tick until `cancel` fires, then stop every unit.
    pub async fn run(mut self, cancel: CancellationToken) {
        let services = self.ctx.caches.services.clone();
        services
            .set_core_status(
                StateWorld::Current,
                CoreServiceType::Root,
                ServiceStatus::Active,
                None,
            )
            .await;
        info!(
            tick_ms = self.ctx.config.supervisor_tick.as_millis() as u64,
            "Supervisor started"
        );

        let mut ticker = tokio::time::interval(self.ctx.config.supervisor_tick);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Supervisor shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    self.reconcile(&cancel).await;
                }
            }
        }

        self.stop_all().await;
        services
            .set_core_status(
                StateWorld::Current,
                CoreServiceType::Root,
                ServiceStatus::Inactive,
                None,
            )
            .await;
    }

    /// One reconciliation pass. Returns the number of units started.
    pub async fn reconcile(&mut self, cancel: &CancellationToken) -> usize {
        self.running.retain(|_, handle| !handle.is_finished());

        let services = self.ctx.caches.services.clone();
        let mut started = 0;
        for snapshot in services.list_snapshots().await {
            let unit = snapshot.unit;
            let desired = snapshot.desired.status;
            let current = snapshot.current.status;

            match (desired, current) {
                (ServiceStatus::Active, ServiceStatus::Inactive) => {
                    if self.running.contains_key(&unit) {
                        debug!(?unit, "Previous run still finishing");
                        continue;
                    }
                    if self.start(unit, cancel).await {
                        started += 1;
                    }
                }
                (
                    ServiceStatus::Inactive,
                    ServiceStatus::Pending | ServiceStatus::Initializing | ServiceStatus::Active,
                ) => {
                    if !matches!(unit, ServiceUnit::Core(CoreServiceType::Root)) {
                        info!(?unit, "Stopping service");
                        services
                            .set_status(StateWorld::Current, unit, ServiceStatus::Inactive, None)
                            .await;
                    }
                }
                _ => {}
            }
        }
        started
    }

    async fn start(&mut self, unit: ServiceUnit, cancel: &CancellationToken) -> bool {
        let Some(future_of) = self.factory(unit) else {
            if self.unregistered.insert(unit) {
                warn!(?unit, "No factory registered, unit stays inactive");
            }
            return false;
        };

        let child = cancel.child_token();
        let services = self.ctx.caches.services.clone();
        if !services
            .set_status(
                StateWorld::Current,
                unit,
                ServiceStatus::Pending,
                Some(child.clone()),
            )
            .await
        {
            error!(?unit, "Pending write rejected");
            return false;
        }
        debug!(?unit, "Starting service");

        let future = future_of(self.ctx.clone(), child.clone());
        let handle = tokio::spawn(async move {
            let outcome = tokio::spawn(future).await;
            match outcome {
                Ok(Ok(())) => {
                    if !child.is_cancelled() {
                        debug!(?unit, "Service returned");
                        services
                            .set_status(StateWorld::Current, unit, ServiceStatus::Inactive, None)
                            .await;
                    }
                }
                Ok(Err(e)) => {
                    if !child.is_cancelled() {
                        warn!(?unit, error = %e, "Service failed");
                        services.mark_failed(StateWorld::Current, unit).await;
                    }
                }
                Err(e) => {
                    error!(?unit, error = %e, "Service panicked");
                    services.mark_failed(StateWorld::Current, unit).await;
                }
            }
        });
        self.running.insert(unit, handle);
        true
    }

    fn factory(&self, unit: ServiceUnit) -> Option<UnitFactory> {
        match unit {
            ServiceUnit::Core(service_type) => {
                let factory = self.registry.core(service_type)?;
                Some(Box::new(move |ctx, cancel| factory(ctx, cancel)))
            }
            ServiceUnit::Node(key) => {
                let factory = self.registry.node(key.service_type)?;
                Some(Box::new(move |ctx, cancel| factory(ctx, key, cancel)))
            }
        }
    }

    /// Inactivate every unit still marked running and wait for the tasks.
    async fn stop_all(&mut self) {
        let services = &self.ctx.caches.services;
        for snapshot in services.list_snapshots().await {
            let unit = snapshot.unit;
            if unit == ServiceUnit::Core(CoreServiceType::Root) {
                continue;
            }
            if snapshot.current.status != ServiceStatus::Inactive {
                services
                    .set_status(StateWorld::Current, unit, ServiceStatus::Inactive, None)
                    .await;
            }
        }
        for (unit, handle) in self.running.drain() {
            if let Err(e) = handle.await {
                error!(?unit, error = %e, "Service task did not join");
            }
        }
    }
}

/// Request every service the node's implementation and custom settings allow.
pub async fn request_node_services(services: &ServiceCache, details: &NodeConnectionDetails) -> usize {
    let mut requested = 0;
    for &service_type in NodeServiceType::for_implementation(details.implementation) {
        if !service_type.enabled_by(details.custom_settings) {
            continue;
        }
        let key = NodeServiceKey::new(details.implementation, details.node_id, service_type);
        if services
            .set_node_status(StateWorld::Desired, key, ServiceStatus::Active, None)
            .await
        {
            requested += 1;
        }
    }
    requested
}

/// Request a core service Active and wait until it is.
///
/// Returns false when `cancel` fires first.
pub async fn activate_core_service(
    services: &ServiceCache,
    service_type: CoreServiceType,
    cancel: &CancellationToken,
) -> bool {
    set_and_wait(services, service_type.into(), ServiceStatus::Active, cancel).await
}

/// Request a core service Inactive and wait until it is.
pub async fn inactivate_core_service(
    services: &ServiceCache,
    service_type: CoreServiceType,
    cancel: &CancellationToken,
) -> bool {
    set_and_wait(services, service_type.into(), ServiceStatus::Inactive, cancel).await
}

/// Request a node service Active and wait until it is.
pub async fn activate_node_service(
    services: &ServiceCache,
    key: NodeServiceKey,
    cancel: &CancellationToken,
) -> bool {
    if key.node_id == 0 {
        error!(?key, "Refusing to activate a service without node id");
        return false;
    }
    set_and_wait(services, key.into(), ServiceStatus::Active, cancel).await
}

/// Request a node service Inactive and wait until it is.
pub async fn inactivate_node_service(
    services: &ServiceCache,
    key: NodeServiceKey,
    cancel: &CancellationToken,
) -> bool {
    if key.node_id == 0 {
        error!(?key, "Refusing to inactivate a service without node id");
        return false;
    }
    set_and_wait(services, key.into(), ServiceStatus::Inactive, cancel).await
}

async fn set_and_wait(
    services: &ServiceCache,
    unit: ServiceUnit,
    status: ServiceStatus,
    cancel: &CancellationToken,
) -> bool {
    services
        .set_status(StateWorld::Desired, unit, status, None)
        .await;
    let mut ticker = tokio::time::interval(STATUS_POLL_INTERVAL);
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return false,

            _ = ticker.tick() => {
                if services.get_status(StateWorld::Current, unit).await == status {
                    return true;
                }
            }
        }
    }
}
