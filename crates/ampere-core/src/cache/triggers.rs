// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow trigger state, trigger definitions and the scheduled-trigger queue.
//!
//! Scheduling is deduplicated on (workflow version, trigger node type,
//! reference id of the first queued event): while an item is pending, further
//! submissions with the same key are appended to its event list instead of
//! being queued again.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::domain::{
    AutomationEvent, ScheduledTrigger, ServiceStatus, TriggerDefinition, TriggerState,
    WorkflowNodeType, WorkflowVersionId, WorkflowVersionNodeId,
};

use super::{Actor, ask, spawn_actor, tell};

const NAME: &str = "triggers";

/// Status write for a time or event trigger.
#[derive(Debug, Clone)]
pub struct TriggerUpdate {
    /// New status.
    pub status: ServiceStatus,
    /// Event that caused the write, appended to the trigger's event list.
    pub event: Option<AutomationEvent>,
    /// Start time, kept when absent.
    pub boot_time: Option<DateTime<Utc>>,
    /// Cancel handle of the running execution, kept when absent.
    pub cancel: Option<CancellationToken>,
}

impl TriggerUpdate {
    /// A bare status write.
    pub fn status(status: ServiceStatus) -> Self {
        Self {
            status,
            event: None,
            boot_time: None,
            cancel: None,
        }
    }
}

/// Request to queue one execution of a workflow version.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    /// Workflow version to run.
    pub workflow_version_id: WorkflowVersionId,
    /// Type of the trigger node that fired.
    pub trigger_node_type: WorkflowNodeType,
    /// Trigger node that fired.
    pub triggering_workflow_version_node_id: WorkflowVersionNodeId,
    /// Triggering event.
    pub event: AutomationEvent,
}

struct TriggerEntry {
    state: TriggerState,
    cancel: Option<CancellationToken>,
}

impl TriggerEntry {
    fn new(
        workflow_version_id: WorkflowVersionId,
        triggering_workflow_version_node_id: WorkflowVersionNodeId,
        reference_id: i32,
        update: TriggerUpdate,
    ) -> Self {
        Self {
            state: TriggerState {
                workflow_version_id,
                triggering_workflow_version_node_id,
                reference_id,
                status: update.status,
                previous_status: None,
                boot_time: update.boot_time,
                events: update.event.into_iter().collect(),
            },
            cancel: update.cancel,
        }
    }

    fn apply(&mut self, update: TriggerUpdate) {
        if self.state.status != update.status {
            self.state.previous_status = Some(self.state.status);
            self.state.status = update.status;
        }
        if let Some(event) = update.event {
            self.state.events.push(event);
        }
        if update.boot_time.is_some() {
            self.state.boot_time = update.boot_time;
        }
        if update.cancel.is_some() {
            self.cancel = update.cancel;
        }
    }

    fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

type EventTriggerKey = (WorkflowVersionId, WorkflowVersionNodeId, i32);

pub(crate) enum TriggerCommand {
    SetTimeTrigger {
        workflow_version_id: WorkflowVersionId,
        update: TriggerUpdate,
    },
    SetEventTrigger {
        key: EventTriggerKey,
        update: TriggerUpdate,
    },
    TimeTrigger {
        workflow_version_id: WorkflowVersionId,
        reply: oneshot::Sender<Option<TriggerState>>,
    },
    EventTrigger {
        key: EventTriggerKey,
        reply: oneshot::Sender<Option<TriggerState>>,
    },
    EventTriggers {
        workflow_version_id: WorkflowVersionId,
        reply: oneshot::Sender<Vec<TriggerState>>,
    },
    Schedule(ScheduleRequest),
    Pop {
        reply: oneshot::Sender<Option<ScheduledTrigger>>,
    },
    ScheduledCount {
        reply: oneshot::Sender<usize>,
    },
    RegisterDefinition(TriggerDefinition),
    RemoveVersion(WorkflowVersionId),
    Definitions {
        reply: oneshot::Sender<Vec<TriggerDefinition>>,
    },
    Publish(AutomationEvent),
}

#[derive(Default)]
struct TriggerActor {
    time_triggers: HashMap<WorkflowVersionId, TriggerEntry>,
    event_triggers: HashMap<EventTriggerKey, TriggerEntry>,
    scheduled: Vec<ScheduledTrigger>,
    definitions: HashMap<(WorkflowVersionId, WorkflowVersionNodeId), TriggerDefinition>,
}

impl TriggerActor {
    fn schedule(&mut self, request: ScheduleRequest) {
        let reference_id = request.event.reference_id();
        let pending = self.scheduled.iter_mut().find(|item| {
            item.workflow_version_id == request.workflow_version_id
                && item.trigger_node_type == request.trigger_node_type
                && item.reference_id == reference_id
        });
        match pending {
            Some(item) => item.events.push(request.event),
            None => self.scheduled.push(ScheduledTrigger {
                scheduling_time: Utc::now(),
                workflow_version_id: request.workflow_version_id,
                trigger_node_type: request.trigger_node_type,
                triggering_workflow_version_node_id: request.triggering_workflow_version_node_id,
                reference_id,
                events: vec![request.event],
            }),
        }
    }

    fn pop(&mut self) -> Option<ScheduledTrigger> {
        if self.scheduled.is_empty() {
            return None;
        }
        self.scheduled.sort_by_key(|item| item.scheduling_time);
        Some(self.scheduled.remove(0))
    }

    fn publish(&mut self, event: AutomationEvent) {
        let mut listeners: Vec<&TriggerDefinition> = self
            .definitions
            .values()
            .filter(|definition| definition.node_type.matches(&event))
            .collect();
        listeners.sort_by_key(|d| (d.workflow_version_id, d.workflow_version_node_id));
        let requests: Vec<ScheduleRequest> = listeners
            .into_iter()
            .map(|definition| ScheduleRequest {
                workflow_version_id: definition.workflow_version_id,
                trigger_node_type: definition.node_type,
                triggering_workflow_version_node_id: definition.workflow_version_node_id,
                event: event.clone(),
            })
            .collect();
        for request in requests {
            self.schedule(request);
        }
    }

    fn remove_version(&mut self, workflow_version_id: WorkflowVersionId) {
        self.definitions
            .retain(|(version, _), _| *version != workflow_version_id);
        if let Some(mut entry) = self.time_triggers.remove(&workflow_version_id) {
            entry.cancel();
        }
        self.event_triggers.retain(|(version, _, _), entry| {
            if *version == workflow_version_id {
                entry.cancel();
                false
            } else {
                true
            }
        });
        self.scheduled
            .retain(|item| item.workflow_version_id != workflow_version_id);
    }
}

impl Actor for TriggerActor {
    type Command = TriggerCommand;
    const NAME: &'static str = NAME;

    fn handle(&mut self, command: TriggerCommand) {
        match command {
            TriggerCommand::SetTimeTrigger {
                workflow_version_id,
                update,
            } => match self.time_triggers.get_mut(&workflow_version_id) {
                Some(entry) => entry.apply(update),
                None => {
                    let entry = TriggerEntry::new(workflow_version_id, 0, 0, update);
                    self.time_triggers.insert(workflow_version_id, entry);
                }
            },
            TriggerCommand::SetEventTrigger { key, update } => {
                match self.event_triggers.get_mut(&key) {
                    Some(entry) => entry.apply(update),
                    None => {
                        let (version, node_id, reference_id) = key;
                        let entry = TriggerEntry::new(version, node_id, reference_id, update);
                        self.event_triggers.insert(key, entry);
                    }
                }
            }
            TriggerCommand::TimeTrigger {
                workflow_version_id,
                reply,
            } => {
                let state = self
                    .time_triggers
                    .get(&workflow_version_id)
                    .map(|entry| entry.state.clone());
                let _ = reply.send(state);
            }
            TriggerCommand::EventTrigger { key, reply } => {
                let _ = reply.send(self.event_triggers.get(&key).map(|entry| entry.state.clone()));
            }
            TriggerCommand::EventTriggers {
                workflow_version_id,
                reply,
            } => {
                let mut states: Vec<TriggerState> = self
                    .event_triggers
                    .iter()
                    .filter(|((version, _, _), _)| *version == workflow_version_id)
                    .map(|(_, entry)| entry.state.clone())
                    .collect();
                states.sort_by_key(|s| (s.triggering_workflow_version_node_id, s.reference_id));
                let _ = reply.send(states);
            }
            TriggerCommand::Schedule(request) => self.schedule(request),
            TriggerCommand::Pop { reply } => {
                let _ = reply.send(self.pop());
            }
            TriggerCommand::ScheduledCount { reply } => {
                let _ = reply.send(self.scheduled.len());
            }
            TriggerCommand::RegisterDefinition(definition) => {
                debug!(
                    workflow_version_id = definition.workflow_version_id,
                    workflow_version_node_id = definition.workflow_version_node_id,
                    node_type = ?definition.node_type,
                    "Registered trigger definition"
                );
                self.definitions.insert(
                    (
                        definition.workflow_version_id,
                        definition.workflow_version_node_id,
                    ),
                    definition,
                );
            }
            TriggerCommand::RemoveVersion(workflow_version_id) => {
                self.remove_version(workflow_version_id)
            }
            TriggerCommand::Definitions { reply } => {
                let mut definitions: Vec<TriggerDefinition> =
                    self.definitions.values().cloned().collect();
                definitions.sort_by_key(|d| (d.workflow_version_id, d.workflow_version_node_id));
                let _ = reply.send(definitions);
            }
            TriggerCommand::Publish(event) => self.publish(event),
        }
    }
}

/// Handle to the triggers cache actor.
#[derive(Clone)]
pub struct TriggerCache {
    tx: mpsc::Sender<TriggerCommand>,
}

impl TriggerCache {
    /// Spawn the actor.
    pub fn spawn(cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, task) = spawn_actor(TriggerActor::default(), cancel);
        (Self { tx }, task)
    }

    /// Create or update the time trigger of a workflow version.
    pub async fn set_time_trigger(
        &self,
        workflow_version_id: WorkflowVersionId,
        update: TriggerUpdate,
    ) {
        if workflow_version_id == 0 {
            error!("Refusing to write a time trigger without workflow version");
            return;
        }
        tell(
            &self.tx,
            NAME,
            TriggerCommand::SetTimeTrigger {
                workflow_version_id,
                update,
            },
        )
        .await
    }

    /// Create or update an event trigger.
    pub async fn set_event_trigger(
        &self,
        workflow_version_id: WorkflowVersionId,
        triggering_workflow_version_node_id: WorkflowVersionNodeId,
        reference_id: i32,
        update: TriggerUpdate,
    ) {
        if workflow_version_id == 0 {
            error!("Refusing to write an event trigger without workflow version");
            return;
        }
        let key = (
            workflow_version_id,
            triggering_workflow_version_node_id,
            reference_id,
        );
        tell(&self.tx, NAME, TriggerCommand::SetEventTrigger { key, update }).await
    }

    /// State of the time trigger of a workflow version.
    pub async fn get_time_trigger(
        &self,
        workflow_version_id: WorkflowVersionId,
    ) -> Option<TriggerState> {
        ask(&self.tx, NAME, |reply| TriggerCommand::TimeTrigger {
            workflow_version_id,
            reply,
        })
        .await
    }

    /// State of one event trigger.
    pub async fn get_event_trigger(
        &self,
        workflow_version_id: WorkflowVersionId,
        triggering_workflow_version_node_id: WorkflowVersionNodeId,
        reference_id: i32,
    ) -> Option<TriggerState> {
        let key = (
            workflow_version_id,
            triggering_workflow_version_node_id,
            reference_id,
        );
        ask(&self.tx, NAME, |reply| TriggerCommand::EventTrigger { key, reply }).await
    }

    /// Event triggers of a workflow version.
    pub async fn get_event_triggers(
        &self,
        workflow_version_id: WorkflowVersionId,
    ) -> Vec<TriggerState> {
        ask(&self.tx, NAME, |reply| TriggerCommand::EventTriggers {
            workflow_version_id,
            reply,
        })
        .await
    }

    /// Queue an execution, merging into a pending item with the same key.
    pub async fn schedule_trigger(&self, request: ScheduleRequest) {
        if request.workflow_version_id == 0 {
            error!("Refusing to schedule a trigger without workflow version");
            return;
        }
        tell(&self.tx, NAME, TriggerCommand::Schedule(request)).await
    }

    /// Remove and return the earliest scheduled item.
    pub async fn pop_scheduled_trigger(&self) -> Option<ScheduledTrigger> {
        ask(&self.tx, NAME, |reply| TriggerCommand::Pop { reply }).await
    }

    /// Number of pending scheduled items.
    pub async fn scheduled_count(&self) -> usize {
        ask(&self.tx, NAME, |reply| TriggerCommand::ScheduledCount { reply }).await
    }

    /// Register (or replace) a trigger definition.
    pub async fn register_definition(&self, definition: TriggerDefinition) {
        tell(&self.tx, NAME, TriggerCommand::RegisterDefinition(definition)).await
    }

    /// Drop the definitions, triggers and queued items of a workflow version.
    /// Running executions of the version are cancelled.
    pub async fn remove_definitions(&self, workflow_version_id: WorkflowVersionId) {
        tell(&self.tx, NAME, TriggerCommand::RemoveVersion(workflow_version_id)).await
    }

    /// Every registered definition, ordered by version and node.
    pub async fn get_definitions(&self) -> Vec<TriggerDefinition> {
        ask(&self.tx, NAME, |reply| TriggerCommand::Definitions { reply }).await
    }

    /// Schedule the event for every definition listening to its kind.
    pub async fn publish_event(&self, event: AutomationEvent) {
        tell(&self.tx, NAME, TriggerCommand::Publish(event)).await
    }
}
