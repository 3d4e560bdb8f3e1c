// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scheduled-trigger queue consumer.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cache::{Caches, TriggerUpdate};
use crate::domain::{CoreServiceType, ScheduledTrigger, ServiceStatus, StateWorld};

use super::{SchedulerConfig, TriggerExecutor};

const SERVICE: CoreServiceType = CoreServiceType::AutomationEventTrigger;

/// Pops scheduled triggers one at a time and executes them.
pub struct EventTriggerService {
    caches: Caches,
    executor: Arc<dyn TriggerExecutor>,
    config: SchedulerConfig,
}

impl EventTriggerService {
    /// Create the consumer.
    pub fn new(caches: Caches, executor: Arc<dyn TriggerExecutor>, config: SchedulerConfig) -> Self {
        Self {
            caches,
            executor,
            config,
        }
    }

    /// Consume the queue until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Event trigger service started"
        );
        self.caches
            .services
            .set_core_status(StateWorld::Current, SERVICE, ServiceStatus::Active, None)
            .await;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.caches.triggers.pop_scheduled_trigger().await {
                Some(trigger) => self.process(trigger, &cancel).await,
                None => {
                    tokio::select! {
                        biased;

                        _ = cancel.cancelled() => break,

                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        info!("Event trigger service shutting down");
        self.caches
            .services
            .set_core_status(StateWorld::Current, SERVICE, ServiceStatus::Inactive, None)
            .await;
    }

    async fn set_state(&self, trigger: &ScheduledTrigger, update: TriggerUpdate) {
        if trigger.trigger_node_type.is_time_based() {
            self.caches
                .triggers
                .set_time_trigger(trigger.workflow_version_id, update)
                .await;
        } else {
            self.caches
                .triggers
                .set_event_trigger(
                    trigger.workflow_version_id,
                    trigger.triggering_workflow_version_node_id,
                    trigger.reference_id,
                    update,
                )
                .await;
        }
    }

    async fn process(&self, trigger: ScheduledTrigger, cancel: &CancellationToken) {
        let execution = cancel.child_token();
        debug!(
            workflow_version_id = trigger.workflow_version_id,
            reference_id = trigger.reference_id,
            events = trigger.events.len(),
            "Executing scheduled trigger"
        );
        self.set_state(
            &trigger,
            TriggerUpdate {
                status: ServiceStatus::Active,
                event: trigger.events.last().cloned(),
                boot_time: Some(Utc::now()),
                cancel: Some(execution.clone()),
            },
        )
        .await;

        if let Err(e) = self.executor.execute(&trigger, execution).await {
            error!(
                workflow_version_id = trigger.workflow_version_id,
                error = %e,
                "Scheduled trigger execution failed"
            );
        }

        self.set_state(&trigger, TriggerUpdate::status(ServiceStatus::Inactive))
            .await;
    }
}
