// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Invoice updates and the balance deltas of settled invoices.

use ampere_core::domain::{
    AutomationEvent, ChannelId, InvoiceHtlc, InvoiceRecord, InvoiceState, NodeId, NodeServiceKey,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::client::Invoice;
use crate::context::ServiceContext;
use crate::error::Result;

use super::{StreamHandler, consume};

/// Worker for [`ampere_core::domain::NodeServiceType::InvoiceStream`].
pub struct InvoiceWorker {
    ctx: ServiceContext,
    key: NodeServiceKey,
}

impl InvoiceWorker {
    /// Worker for one node.
    pub fn new(ctx: ServiceContext, key: NodeServiceKey) -> Self {
        Self { ctx, key }
    }

    /// Subscribe after the last stored indexes and process invoices until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let node_id = self.key.node_id;
        let indexes = self.ctx.persistence.last_invoice_indexes(node_id).await?;
        let client = self.ctx.client(node_id).await?;
        let stream = client
            .subscribe_invoices(indexes.add_index, indexes.settle_index)
            .await?;
        debug!(
            node_id,
            add_index = indexes.add_index,
            settle_index = indexes.settle_index,
            "Invoice subscription resumed"
        );
        let mut handler = InvoiceHandler {
            ctx: self.ctx.clone(),
            node_id,
            last_settle_index: indexes.settle_index,
        };
        consume(&self.ctx, self.key, &cancel, stream, &mut handler).await
    }
}

struct InvoiceHandler {
    ctx: ServiceContext,
    node_id: NodeId,
    last_settle_index: u64,
}

#[async_trait]
impl StreamHandler<Invoice> for InvoiceHandler {
    async fn handle(&mut self, invoice: Invoice) -> Result<()> {
        let channels = &self.ctx.caches.channels;
        let mut htlcs = Vec::with_capacity(invoice.htlcs.len());
        for htlc in &invoice.htlcs {
            htlcs.push(InvoiceHtlc {
                channel_id: channels
                    .get_channel_id_by_lnd_short_channel_id(htlc.channel_id)
                    .await,
                amount_msat: htlc.amount_msat,
            });
        }
        let record = InvoiceRecord {
            node_id: self.node_id,
            r_hash: invoice.r_hash,
            memo: invoice.memo,
            value_msat: invoice.value_msat,
            amount_paid_msat: invoice.amount_paid_msat,
            state: invoice.state,
            add_index: invoice.add_index,
            settle_index: invoice.settle_index,
            creation_date: invoice.creation_date,
            settle_date: invoice.settle_date,
            htlcs,
        };
        self.ctx.persistence.upsert_invoice(&record).await?;

        let newly_settled =
            record.state == InvoiceState::Settled && record.settle_index > self.last_settle_index;
        if !newly_settled {
            return Ok(());
        }
        self.last_settle_index = record.settle_index;

        for htlc in &record.htlcs {
            credit(&self.ctx, self.node_id, htlc.channel_id, htlc.amount_msat).await;
        }
        self.ctx
            .caches
            .triggers
            .publish_event(AutomationEvent::Invoice(record))
            .await;
        Ok(())
    }
}

/// Move `amount_msat` to the local side of a channel and publish the balance change.
pub(crate) async fn credit(
    ctx: &ServiceContext,
    node_id: NodeId,
    channel_id: ChannelId,
    amount_msat: i64,
) {
    if channel_id == 0 {
        return;
    }
    match ctx
        .caches
        .channel_states
        .apply_balance_delta(node_id, channel_id, amount_msat)
        .await
    {
        Ok(event) => {
            ctx.caches
                .triggers
                .publish_event(AutomationEvent::ChannelBalance(event))
                .await
        }
        Err(e) => error!(node_id, channel_id, error = %e, "Balance delta rejected"),
    }
}
