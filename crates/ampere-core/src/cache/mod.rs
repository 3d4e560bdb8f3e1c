// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory state cache.
//!
//! Every cache is a single-owner actor: a spawned task owns the mappings and
//! serves commands from one bounded channel, so operations on one cache are
//! totally ordered without any locking at the call site. Handles are cheap to
//! clone and are passed explicitly to whoever needs them.
//!
//! Writes are fire-and-forget. Reads carry a `oneshot` reply channel. When an
//! actor is gone, or the input is unusable, accessors log an error and return
//! the zero value of their result type so callers can proceed.

mod bootstrap;
pub mod channel_states;
pub mod channels;
pub mod nodes;
pub mod services;
pub mod tags;
pub mod triggers;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub use self::bootstrap::BootstrapSummary;
pub use self::channel_states::{
    BalanceInvariantError, ChannelSnapshot, ChannelStateCache, PendingHtlc, StaleChannelFields,
};
pub use self::channels::ChannelCache;
pub use self::nodes::{NodeCache, NodeRole};
pub use self::services::{ServiceCache, ServiceSnapshot, ServiceUnit};
pub use self::tags::TagCache;
pub use self::triggers::{ScheduleRequest, TriggerCache, TriggerUpdate};

/// Depth of every actor's inbound command channel.
pub const COMMAND_BUFFER: usize = 1024;

/// State owned by a cache actor.
pub(crate) trait Actor: Send + 'static {
    type Command: Send + 'static;

    /// Name used in logs.
    const NAME: &'static str;

    fn handle(&mut self, command: Self::Command);
}

/// Spawn an actor task that serves commands until cancelled or until every
/// handle has been dropped.
pub(crate) fn spawn_actor<A: Actor>(
    mut actor: A,
    cancel: CancellationToken,
) -> (mpsc::Sender<A::Command>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(async move {
        debug!(actor = A::NAME, "Cache actor started");
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                command = rx.recv() => match command {
                    Some(command) => actor.handle(command),
                    None => break,
                },
            }
        }
        debug!(actor = A::NAME, "Cache actor stopped");
    });
    (tx, task)
}

/// Send a command without waiting for a result.
pub(crate) async fn tell<C>(tx: &mpsc::Sender<C>, actor: &'static str, command: C) {
    if tx.send(command).await.is_err() {
        error!(actor, "Cache actor is not running, write dropped");
    }
}

/// Send a command carrying a reply channel and wait for the answer.
pub(crate) async fn ask<C, T: Default>(
    tx: &mpsc::Sender<C>,
    actor: &'static str,
    build: impl FnOnce(oneshot::Sender<T>) -> C,
) -> T {
    ask_or(tx, actor, T::default(), build).await
}

/// Like [`ask`], answering `fallback` when the actor is unreachable.
pub(crate) async fn ask_or<C, T>(
    tx: &mpsc::Sender<C>,
    actor: &'static str,
    fallback: T,
    build: impl FnOnce(oneshot::Sender<T>) -> C,
) -> T {
    let (reply, response) = oneshot::channel();
    if tx.send(build(reply)).await.is_err() {
        error!(actor, "Cache actor is not running, returning empty result");
        return fallback;
    }
    match response.await {
        Ok(value) => value,
        Err(_) => {
            error!(actor, "Cache actor dropped the reply channel");
            fallback
        }
    }
}

/// Handles to every cache actor of the process.
#[derive(Clone)]
pub struct Caches {
    /// Channel settings and short-id / funding-point indexes.
    pub channels: ChannelCache,
    /// Managed nodes, channel peers and connected peers.
    pub nodes: NodeCache,
    /// Tag bindings of nodes and channels.
    pub tags: TagCache,
    /// Desired and current service state, import times and connection details.
    pub services: ServiceCache,
    /// Trigger states, trigger definitions and the scheduled-trigger queue.
    pub triggers: TriggerCache,
    /// Per-channel balance and policy snapshots.
    pub channel_states: ChannelStateCache,
}

impl Caches {
    /// Spawn every cache actor. All of them stop when `cancel` fires.
    pub fn spawn(cancel: &CancellationToken) -> (Self, Vec<JoinHandle<()>>) {
        let (channels, channels_task) = ChannelCache::spawn(cancel.child_token());
        let (nodes, nodes_task) = NodeCache::spawn(cancel.child_token());
        let (tags, tags_task) = TagCache::spawn(cancel.child_token());
        let (services, services_task) = ServiceCache::spawn(cancel.child_token());
        let (triggers, triggers_task) = TriggerCache::spawn(cancel.child_token());
        let (channel_states, channel_states_task) = ChannelStateCache::spawn(cancel.child_token());

        let caches = Self {
            channels,
            nodes,
            tags,
            services,
            triggers,
            channel_states,
        };
        let tasks = vec![
            channels_task,
            nodes_task,
            tags_task,
            services_task,
            triggers_task,
            channel_states_task,
        ];
        (caches, tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        value: u32,
    }

    enum CounterCommand {
        Add(u32),
        Get(oneshot::Sender<u32>),
    }

    impl Actor for Counter {
        type Command = CounterCommand;
        const NAME: &'static str = "counter";

        fn handle(&mut self, command: CounterCommand) {
            match command {
                CounterCommand::Add(n) => self.value += n,
                CounterCommand::Get(reply) => {
                    let _ = reply.send(self.value);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_actor_serves_commands_in_order() {
        let cancel = CancellationToken::new();
        let (tx, _task) = spawn_actor(Counter { value: 0 }, cancel.clone());

        for _ in 0..10 {
            tell(&tx, "counter", CounterCommand::Add(2)).await;
        }
        let value = ask(&tx, "counter", CounterCommand::Get).await;
        assert_eq!(value, 20);
    }

    #[tokio::test]
    async fn test_ask_returns_default_after_cancel() {
        let cancel = CancellationToken::new();
        let (tx, task) = spawn_actor(Counter { value: 5 }, cancel.clone());

        cancel.cancel();
        task.await.unwrap();

        let value = ask(&tx, "counter", CounterCommand::Get).await;
        assert_eq!(value, 0);
    }
}
