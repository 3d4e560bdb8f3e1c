// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outgoing payments poller.
//!
//! Payments are paged by index. The page stops at the first payment still in
//! flight so the next poll resumes there.

use ampere_core::domain::{
    AutomationEvent, NodeCustomSettings, NodeId, NodeServiceKey, PaymentRecord, PaymentStatus,
    ServiceStatus, StateWorld,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::ServiceContext;
use crate::error::{Result, with_timeout};

use super::invoices::credit;

/// Worker for [`ampere_core::domain::NodeServiceType::PaymentStream`].
pub struct PaymentsWorker {
    ctx: ServiceContext,
    key: NodeServiceKey,
}

impl PaymentsWorker {
    /// Worker for one node.
    pub fn new(ctx: ServiceContext, key: NodeServiceKey) -> Self {
        Self { ctx, key }
    }

    /// Poll every tick until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let details = self.ctx.connection_details(self.key.node_id).await?;
        let store_failed = details
            .custom_settings
            .has(NodeCustomSettings::IMPORT_FAILED_PAYMENTS);
        self.ctx
            .caches
            .services
            .set_node_status(StateWorld::Current, self.key, ServiceStatus::Active, None)
            .await;

        let mut ticker = tokio::time::interval(self.ctx.workers.payments_tick);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Ok(()),

                _ = ticker.tick() => {
                    self.poll(store_failed, &cancel).await?;
                }
            }
        }
    }

    /// Import every settled page after the last stored index.
    async fn poll(&self, store_failed: bool, cancel: &CancellationToken) -> Result<()> {
        let node_id = self.key.node_id;
        let client = self.ctx.client(node_id).await?;
        let mut index_offset = self.ctx.persistence.last_payment_index(node_id).await?;
        let page_size = self.ctx.workers.payments_page_size;

        loop {
            let page = with_timeout(
                "list_payments",
                self.ctx.timeouts.bulk,
                client.list_payments(index_offset, page_size),
            )
            .await?;
            let fetched = page.payments.len() as u64;
            let mut blocked = false;
            for payment in page.payments {
                if payment.status == PaymentStatus::InFlight {
                    blocked = true;
                    break;
                }
                index_offset = payment.payment_index;
                if payment.status == PaymentStatus::Failed && !store_failed {
                    continue;
                }
                let outgoing_channel_id = match payment.first_hop_channel_id {
                    Some(short_channel_id) => Some(
                        self.ctx
                            .caches
                            .channels
                            .get_channel_id_by_lnd_short_channel_id(short_channel_id)
                            .await,
                    )
                    .filter(|id| *id != 0),
                    None => None,
                };
                let record = PaymentRecord {
                    node_id,
                    payment_hash: payment.payment_hash,
                    payment_index: payment.payment_index,
                    value_msat: payment.value_msat,
                    fee_msat: payment.fee_msat,
                    status: payment.status,
                    creation_date: payment.creation_date,
                    outgoing_channel_id,
                    failure_reason: payment.failure_reason,
                };
                self.ctx.persistence.upsert_payment(&record).await?;
                if record.status == PaymentStatus::Succeeded {
                    self.settle(node_id, record).await;
                }
            }
            if blocked || fetched < page_size {
                debug!(node_id, index_offset, "Payments up to date");
                return Ok(());
            }
            if !super::pause(cancel, self.ctx.workers.request_interval).await {
                return Ok(());
            }
        }
    }

    async fn settle(&self, node_id: NodeId, record: PaymentRecord) {
        if let Some(channel_id) = record.outgoing_channel_id {
            credit(
                &self.ctx,
                node_id,
                channel_id,
                -(record.value_msat + record.fee_msat),
            )
            .await;
        }
        self.ctx
            .caches
            .triggers
            .publish_event(AutomationEvent::Payment(record))
            .await;
    }
}
