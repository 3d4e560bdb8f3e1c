// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! On-chain wallet transactions.

use ampere_core::domain::{NodeId, NodeServiceKey, TransactionRecord};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::Transaction;
use crate::context::ServiceContext;
use crate::error::{Result, with_timeout};

use super::{StreamHandler, consume};

/// Worker for [`ampere_core::domain::NodeServiceType::TransactionStream`].
pub struct TransactionWorker {
    ctx: ServiceContext,
    key: NodeServiceKey,
}

impl TransactionWorker {
    /// Worker for one node.
    pub fn new(ctx: ServiceContext, key: NodeServiceKey) -> Self {
        Self { ctx, key }
    }

    /// Catch up from the last stored block height, then follow the stream.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let node_id = self.key.node_id;
        let client = self.ctx.client(node_id).await?;
        let stream = client.subscribe_transactions().await?;

        let mut handler = TransactionHandler {
            ctx: self.ctx.clone(),
            node_id,
        };
        let start_height = self
            .ctx
            .persistence
            .last_transaction_block_height(node_id)
            .await?;
        let backlog = with_timeout(
            "get_transactions",
            self.ctx.timeouts.bulk,
            client.get_transactions(start_height),
        )
        .await?;
        debug!(node_id, start_height, count = backlog.len(), "Transaction catch-up");
        for transaction in backlog {
            handler.handle(transaction).await?;
        }

        consume(&self.ctx, self.key, &cancel, stream, &mut handler).await
    }
}

struct TransactionHandler {
    ctx: ServiceContext,
    node_id: NodeId,
}

#[async_trait]
impl StreamHandler<Transaction> for TransactionHandler {
    async fn handle(&mut self, transaction: Transaction) -> Result<()> {
        self.ctx
            .persistence
            .insert_transaction(&TransactionRecord {
                node_id: self.node_id,
                tx_hash: transaction.tx_hash,
                amount: transaction.amount,
                block_height: transaction.block_height,
                total_fees: transaction.total_fees,
                time: transaction.time,
                label: transaction.label,
            })
            .await?;
        Ok(())
    }
}
