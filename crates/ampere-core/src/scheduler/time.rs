// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Interval and cron trigger services.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use croner::Cron;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{Caches, ScheduleRequest};
use crate::domain::{
    AutomationEvent, CoreServiceType, ServiceStatus, StateWorld, TimeSchedule, TimeTriggerEvent,
    TriggerDefinition, WorkflowNodeType, WorkflowVersionId, WorkflowVersionNodeId,
};

use super::SchedulerConfig;

/// Next firing time of a schedule strictly after `after`. None for an
/// unparsable cron expression or a zero interval.
pub fn next_due(schedule: &TimeSchedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        TimeSchedule::Interval(interval) => {
            if interval.is_zero() {
                return None;
            }
            let interval = chrono::Duration::from_std(*interval).ok()?;
            after.checked_add_signed(interval)
        }
        TimeSchedule::Cron(expression) => {
            let cron = Cron::new(expression).with_seconds_optional().parse().ok()?;
            cron.find_next_occurrence(&after, false).ok()
        }
    }
}

/// Queues time-based trigger definitions of one kind when they come due.
pub struct TimeTriggerService {
    caches: Caches,
    config: SchedulerConfig,
    service_type: CoreServiceType,
    node_type: WorkflowNodeType,
    due: HashMap<(WorkflowVersionId, WorkflowVersionNodeId), DateTime<Utc>>,
}

impl TimeTriggerService {
    /// Service for interval definitions.
    pub fn interval(caches: Caches, config: SchedulerConfig) -> Self {
        Self::new(
            caches,
            config,
            CoreServiceType::AutomationIntervalTrigger,
            WorkflowNodeType::IntervalTrigger,
        )
    }

    /// Service for cron definitions.
    pub fn cron(caches: Caches, config: SchedulerConfig) -> Self {
        Self::new(
            caches,
            config,
            CoreServiceType::AutomationCronTrigger,
            WorkflowNodeType::CronTrigger,
        )
    }

    fn new(
        caches: Caches,
        config: SchedulerConfig,
        service_type: CoreServiceType,
        node_type: WorkflowNodeType,
    ) -> Self {
        Self {
            caches,
            config,
            service_type,
            node_type,
            due: HashMap::new(),
        }
    }

    /// Check definitions every tick until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            service = ?self.service_type,
            tick_ms = self.config.tick.as_millis() as u64,
            "Time trigger service started"
        );
        self.caches
            .services
            .set_core_status(StateWorld::Current, self.service_type, ServiceStatus::Active, None)
            .await;

        let mut ticker = tokio::time::interval(self.config.tick);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = ticker.tick() => {
                    self.check(Utc::now()).await;
                }
            }
        }

        info!(service = ?self.service_type, "Time trigger service shutting down");
        self.caches
            .services
            .set_core_status(StateWorld::Current, self.service_type, ServiceStatus::Inactive, None)
            .await;
    }

    /// Queue every definition due at `now` and return how many were queued.
    pub async fn check(&mut self, now: DateTime<Utc>) -> usize {
        let definitions: Vec<TriggerDefinition> = self
            .caches
            .triggers
            .get_definitions()
            .await
            .into_iter()
            .filter(|definition| definition.node_type == self.node_type)
            .collect();

        self.due.retain(|key, _| {
            definitions
                .iter()
                .any(|d| (d.workflow_version_id, d.workflow_version_node_id) == *key)
        });

        let mut queued = 0;
        for definition in definitions {
            let Some(schedule) = &definition.schedule else {
                warn!(
                    workflow_version_id = definition.workflow_version_id,
                    "Time trigger definition without schedule"
                );
                continue;
            };
            let key = (
                definition.workflow_version_id,
                definition.workflow_version_node_id,
            );
            let armed = self.due.get(&key).copied();
            let Some(due) = armed else {
                match next_due(schedule, now) {
                    Some(due) => {
                        debug!(workflow_version_id = key.0, %due, "Time trigger armed");
                        self.due.insert(key, due);
                    }
                    None => warn!(
                        workflow_version_id = key.0,
                        ?schedule,
                        "Time trigger schedule has no next occurrence"
                    ),
                }
                continue;
            };
            if due > now {
                continue;
            }

            self.caches
                .triggers
                .schedule_trigger(ScheduleRequest {
                    workflow_version_id: definition.workflow_version_id,
                    trigger_node_type: definition.node_type,
                    triggering_workflow_version_node_id: definition.workflow_version_node_id,
                    event: AutomationEvent::Time(TimeTriggerEvent { time: now }),
                })
                .await;
            queued += 1;

            match next_due(schedule, now) {
                Some(next) => {
                    self.due.insert(key, next);
                }
                None => {
                    self.due.remove(&key);
                }
            }
        }
        queued
    }
}
