// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow trigger types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::{AutomationEvent, ChannelEventType};
use super::services::ServiceStatus;
use super::{WorkflowVersionId, WorkflowVersionNodeId};

/// Type of the workflow node that starts a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowNodeType {
    /// Fires on a fixed interval.
    IntervalTrigger,
    /// Fires on a cron schedule.
    CronTrigger,
    /// Fires on channel balance changes.
    ChannelBalanceEventTrigger,
    /// Fires when a channel opens.
    ChannelOpenEventTrigger,
    /// Fires when a channel closes.
    ChannelCloseEventTrigger,
    /// Fires on settled forwards.
    ForwardEventTrigger,
    /// Fires on settled invoices.
    InvoiceEventTrigger,
    /// Fires on settled payments.
    PaymentEventTrigger,
    /// Fires on peer connection changes.
    PeerConnectionEventTrigger,
    /// Started by the operator.
    ManualTrigger,
}

impl WorkflowNodeType {
    /// Whether a trigger of this type listens for the event.
    pub fn matches(self, event: &AutomationEvent) -> bool {
        match (self, event) {
            (Self::ChannelBalanceEventTrigger, AutomationEvent::ChannelBalance(_)) => true,
            (Self::ChannelOpenEventTrigger, AutomationEvent::Channel(e)) => {
                e.event_type == ChannelEventType::Open
            }
            (Self::ChannelCloseEventTrigger, AutomationEvent::Channel(e)) => {
                e.event_type == ChannelEventType::Closed
            }
            (Self::ForwardEventTrigger, AutomationEvent::Forward(_)) => true,
            (Self::InvoiceEventTrigger, AutomationEvent::Invoice(_)) => true,
            (Self::PaymentEventTrigger, AutomationEvent::Payment(_)) => true,
            (Self::PeerConnectionEventTrigger, AutomationEvent::Peer(_)) => true,
            _ => false,
        }
    }

    /// Whether the trigger is driven by time rather than events.
    pub fn is_time_based(self) -> bool {
        matches!(self, Self::IntervalTrigger | Self::CronTrigger)
    }
}

/// Time schedule of a time-based trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeSchedule {
    /// Fixed interval.
    Interval(Duration),
    /// Cron expression (five or six fields).
    Cron(String),
}

/// A trigger node of a deployed workflow version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    /// Workflow version.
    pub workflow_version_id: WorkflowVersionId,
    /// Trigger node inside the version.
    pub workflow_version_node_id: WorkflowVersionNodeId,
    /// Trigger node type.
    pub node_type: WorkflowNodeType,
    /// Schedule for time-based triggers.
    pub schedule: Option<TimeSchedule>,
}

/// Queued execution of a workflow version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTrigger {
    /// When the item was queued.
    pub scheduling_time: DateTime<Utc>,
    /// Workflow version to run.
    pub workflow_version_id: WorkflowVersionId,
    /// Type of the trigger node.
    pub trigger_node_type: WorkflowNodeType,
    /// Trigger node that fired.
    pub triggering_workflow_version_node_id: WorkflowVersionNodeId,
    /// Dedup reference of the first queued event.
    pub reference_id: i32,
    /// Every event that fired while the item was pending.
    pub events: Vec<AutomationEvent>,
}

/// Observable state of a time or event trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerState {
    /// Workflow version.
    pub workflow_version_id: WorkflowVersionId,
    /// Trigger node, zero for time triggers keyed by version only.
    pub triggering_workflow_version_node_id: WorkflowVersionNodeId,
    /// Dedup reference.
    pub reference_id: i32,
    /// Current status.
    pub status: ServiceStatus,
    /// Status before the last change.
    pub previous_status: Option<ServiceStatus>,
    /// Last time the trigger was started.
    pub boot_time: Option<DateTime<Utc>>,
    /// Triggering events received so far.
    pub events: Vec<AutomationEvent>,
}
