// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow trigger scheduling.
//!
//! Three core services drive workflow executions:
//!
//! - [`EventTriggerService`] consumes the scheduled-trigger queue of the
//!   triggers cache and hands each item to a [`TriggerExecutor`].
//! - [`TimeTriggerService::interval`] and [`TimeTriggerService::cron`] queue
//!   time-based trigger definitions when they are due.
//!
//! Event-based definitions are fed by [`TriggerCache::publish_event`](crate::cache::TriggerCache::publish_event).

mod event;
mod time;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::ScheduledTrigger;

pub use self::event::EventTriggerService;
pub use self::time::{TimeTriggerService, next_due};

/// Failure reported by a [`TriggerExecutor`].
#[derive(Debug, Error)]
#[error("workflow version {workflow_version_id} failed: {message}")]
pub struct ExecutionError {
    /// Workflow version that failed.
    pub workflow_version_id: i32,
    /// Failure description.
    pub message: String,
}

/// Runs a workflow version for a scheduled trigger.
#[async_trait]
pub trait TriggerExecutor: Send + Sync {
    /// Execute the workflow. `cancel` fires when the version is removed or the
    /// scheduler shuts down.
    async fn execute(
        &self,
        trigger: &ScheduledTrigger,
        cancel: CancellationToken,
    ) -> Result<(), ExecutionError>;
}

/// Executor that only logs what would run.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExecutor;

#[async_trait]
impl TriggerExecutor for LogExecutor {
    async fn execute(
        &self,
        trigger: &ScheduledTrigger,
        _cancel: CancellationToken,
    ) -> Result<(), ExecutionError> {
        info!(
            workflow_version_id = trigger.workflow_version_id,
            node_type = ?trigger.trigger_node_type,
            reference_id = trigger.reference_id,
            events = trigger.events.len(),
            "Workflow trigger fired"
        );
        Ok(())
    }
}

/// Scheduler timing.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long the queue consumer sleeps when the queue is empty.
    pub poll_interval: Duration,
    /// How often time-based definitions are checked.
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            tick: Duration::from_secs(1),
        }
    }
}
