// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service type to worker factory mapping.

use std::collections::HashMap;
use std::sync::Arc;

use ampere_core::domain::{CoreServiceType, NodeServiceKey, NodeServiceType};
use ampere_core::scheduler::{
    EventTriggerService, SchedulerConfig, TimeTriggerService, TriggerExecutor,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::context::ServiceContext;
use crate::error::Result;
use crate::maintenance::MaintenanceService;
use crate::workers::run_node_service;

/// Future of one running unit.
pub type ServiceFuture = BoxFuture<'static, Result<()>>;

/// Builds the future of a core service.
pub type CoreFactory = Arc<dyn Fn(ServiceContext, CancellationToken) -> ServiceFuture + Send + Sync>;

/// Builds the future of a node service.
pub type NodeFactory =
    Arc<dyn Fn(ServiceContext, NodeServiceKey, CancellationToken) -> ServiceFuture + Send + Sync>;

/// Factories the supervisor starts units with. Units without a factory stay Inactive.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    core: HashMap<CoreServiceType, CoreFactory>,
    node: HashMap<NodeServiceType, NodeFactory>,
}

impl ServiceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the maintenance service, the three trigger services and
    /// every node worker.
    pub fn with_defaults(executor: Arc<dyn TriggerExecutor>, scheduler: SchedulerConfig) -> Self {
        let mut registry = Self::new();

        registry.register_core(CoreServiceType::Maintenance, |ctx, cancel| {
            MaintenanceService::new(ctx).run(cancel).boxed()
        });

        let config = scheduler.clone();
        registry.register_core(CoreServiceType::AutomationIntervalTrigger, move |ctx, cancel| {
            let service = TimeTriggerService::interval(ctx.caches, config.clone());
            async move {
                service.run(cancel).await;
                Ok(())
            }
            .boxed()
        });

        let config = scheduler.clone();
        registry.register_core(CoreServiceType::AutomationCronTrigger, move |ctx, cancel| {
            let service = TimeTriggerService::cron(ctx.caches, config.clone());
            async move {
                service.run(cancel).await;
                Ok(())
            }
            .boxed()
        });

        registry.register_core(CoreServiceType::AutomationEventTrigger, move |ctx, cancel| {
            let service =
                EventTriggerService::new(ctx.caches, executor.clone(), scheduler.clone());
            async move {
                service.run(cancel).await;
                Ok(())
            }
            .boxed()
        });

        for service_type in NodeServiceType::ALL {
            registry.register_node(service_type, |ctx, key, cancel| {
                run_node_service(ctx, key, cancel).boxed()
            });
        }
        registry
    }

    /// Register or replace the factory of a core service.
    pub fn register_core<F>(&mut self, service_type: CoreServiceType, factory: F) -> &mut Self
    where
        F: Fn(ServiceContext, CancellationToken) -> ServiceFuture + Send + Sync + 'static,
    {
        self.core.insert(service_type, Arc::new(factory));
        self
    }

    /// Register or replace the factory of a node service.
    pub fn register_node<F>(&mut self, service_type: NodeServiceType, factory: F) -> &mut Self
    where
        F: Fn(ServiceContext, NodeServiceKey, CancellationToken) -> ServiceFuture
            + Send
            + Sync
            + 'static,
    {
        self.node.insert(service_type, Arc::new(factory));
        self
    }

    /// Factory of a core service.
    pub fn core(&self, service_type: CoreServiceType) -> Option<CoreFactory> {
        self.core.get(&service_type).cloned()
    }

    /// Factory of a node service.
    pub fn node(&self, service_type: NodeServiceType) -> Option<NodeFactory> {
        self.node.get(&service_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ampere_core::scheduler::LogExecutor;

    #[test]
    fn test_defaults_cover_every_node_service() {
        let registry =
            ServiceRegistry::with_defaults(Arc::new(LogExecutor), SchedulerConfig::default());
        for service_type in NodeServiceType::ALL {
            assert!(registry.node(service_type).is_some(), "{:?}", service_type);
        }
        assert!(registry.core(CoreServiceType::Maintenance).is_some());
        assert!(registry.core(CoreServiceType::AutomationEventTrigger).is_some());
        assert!(registry.core(CoreServiceType::Root).is_none());
        assert!(registry.core(CoreServiceType::Notifier).is_none());
    }
}
