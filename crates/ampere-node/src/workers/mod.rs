// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-node stream workers.
//!
//! A worker opens its subscription (or poll loop), marks its unit Active and
//! translates every daemon message into stored rows, cache updates and
//! published automation events. Workers return when cancelled or when the
//! stream breaks; the supervisor decides what the outcome means.

mod channel_balance;
mod channel_events;
mod forwards;
mod graph;
mod htlc;
mod invoices;
mod payments;
mod peers;
mod transactions;

use ampere_core::domain::{NodeServiceKey, NodeServiceType, ServiceStatus, StateWorld};
use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{ClientError, Subscription};
use crate::context::ServiceContext;
use crate::error::Result;

pub use channel_balance::ChannelBalanceWorker;
pub use channel_events::ChannelEventWorker;
pub use forwards::ForwardsWorker;
pub use graph::GraphWorker;
pub use htlc::HtlcWorker;
pub use invoices::InvoiceWorker;
pub use payments::PaymentsWorker;
pub use peers::PeerWorker;
pub use transactions::TransactionWorker;

/// Handles one message type of a subscription.
#[async_trait]
pub trait StreamHandler<T: Send + 'static>: Send {
    /// Store, cache and publish one message.
    async fn handle(&mut self, message: T) -> Result<()>;
}

/// Mark `key` Active and feed `stream` into `handler` until cancelled.
///
/// Returns Ok on cancellation and the first receive or handler error otherwise.
pub async fn consume<T, H>(
    ctx: &ServiceContext,
    key: NodeServiceKey,
    cancel: &CancellationToken,
    mut stream: Subscription<T>,
    handler: &mut H,
) -> Result<()>
where
    T: Send + 'static,
    H: StreamHandler<T>,
{
    ctx.caches
        .services
        .set_node_status(StateWorld::Current, key, ServiceStatus::Active, None)
        .await;
    debug!(node_id = key.node_id, service = ?key.service_type, "Stream open");

    loop {
        let received = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Ok(()),

            received = stream.next() => received,
        };
        match received {
            Some(Ok(message)) => handler.handle(message).await?,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ClientError::StreamClosed.into()),
        }
    }
}

/// Run the worker for `key` until it is cancelled or fails.
pub async fn run_node_service(
    ctx: ServiceContext,
    key: NodeServiceKey,
    cancel: CancellationToken,
) -> Result<()> {
    match key.service_type {
        NodeServiceType::ChannelEventStream => {
            ChannelEventWorker::new(ctx, key).run(cancel).await
        }
        NodeServiceType::GraphEventStream => GraphWorker::new(ctx, key).run(cancel).await,
        NodeServiceType::HtlcEventStream => HtlcWorker::new(ctx, key).run(cancel).await,
        NodeServiceType::PeerEventStream => PeerWorker::new(ctx, key).run(cancel).await,
        NodeServiceType::ForwardsStream => ForwardsWorker::new(ctx, key).run(cancel).await,
        NodeServiceType::InvoiceStream => InvoiceWorker::new(ctx, key).run(cancel).await,
        NodeServiceType::PaymentStream => PaymentsWorker::new(ctx, key).run(cancel).await,
        NodeServiceType::TransactionStream => TransactionWorker::new(ctx, key).run(cancel).await,
        NodeServiceType::ChannelBalanceCacheStream => {
            ChannelBalanceWorker::new(ctx, key).run(cancel).await
        }
    }
}

/// Sleep unless cancelled first. Returns false on cancellation.
pub(crate) async fn pause(cancel: &CancellationToken, duration: std::time::Duration) -> bool {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => false,

        _ = tokio::time::sleep(duration) => true,
    }
}
