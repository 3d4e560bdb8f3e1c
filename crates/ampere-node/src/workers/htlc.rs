// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTLC events.

use ampere_core::domain::{HtlcEventKind, HtlcEventRecord, NodeId, NodeServiceKey};
use async_trait::async_trait;
use chrono::DateTime;
use tokio_util::sync::CancellationToken;

use crate::client::{HtlcEvent, HtlcEventDetail};
use crate::context::ServiceContext;
use crate::error::Result;

use super::{StreamHandler, consume};

/// Worker for [`ampere_core::domain::NodeServiceType::HtlcEventStream`].
pub struct HtlcWorker {
    ctx: ServiceContext,
    key: NodeServiceKey,
}

impl HtlcWorker {
    /// Worker for one node.
    pub fn new(ctx: ServiceContext, key: NodeServiceKey) -> Self {
        Self { ctx, key }
    }

    /// Subscribe and store HTLC events until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let client = self.ctx.client(self.key.node_id).await?;
        let stream = client.subscribe_htlc_events().await?;
        let mut handler = HtlcHandler {
            ctx: self.ctx.clone(),
            node_id: self.key.node_id,
        };
        consume(&self.ctx, self.key, &cancel, stream, &mut handler).await
    }
}

struct HtlcHandler {
    ctx: ServiceContext,
    node_id: NodeId,
}

#[async_trait]
impl StreamHandler<HtlcEvent> for HtlcHandler {
    async fn handle(&mut self, event: HtlcEvent) -> Result<()> {
        let channels = &self.ctx.caches.channels;
        let incoming_channel_id = channels
            .get_channel_id_by_lnd_short_channel_id(event.incoming_channel_id)
            .await;
        let outgoing_channel_id = channels
            .get_channel_id_by_lnd_short_channel_id(event.outgoing_channel_id)
            .await;

        let mut record = HtlcEventRecord {
            time: DateTime::from_timestamp_nanos(event.timestamp_ns),
            node_id: self.node_id,
            kind: HtlcEventKind::Settle,
            event_origin: event.event_origin,
            incoming_channel_id,
            outgoing_channel_id,
            incoming_htlc_id: event.incoming_htlc_id,
            outgoing_htlc_id: event.outgoing_htlc_id,
            incoming_amount_msat: None,
            outgoing_amount_msat: None,
            incoming_timelock: None,
            outgoing_timelock: None,
            wire_failure: None,
            failure_detail: None,
            failure_string: None,
        };
        match event.detail {
            HtlcEventDetail::Forward {
                incoming_amount_msat,
                outgoing_amount_msat,
                incoming_timelock,
                outgoing_timelock,
            } => {
                record.kind = HtlcEventKind::Forward;
                record.incoming_amount_msat = Some(incoming_amount_msat);
                record.outgoing_amount_msat = Some(outgoing_amount_msat);
                record.incoming_timelock = Some(incoming_timelock);
                record.outgoing_timelock = Some(outgoing_timelock);
            }
            HtlcEventDetail::ForwardFail => record.kind = HtlcEventKind::ForwardFail,
            HtlcEventDetail::LinkFail {
                incoming_amount_msat,
                outgoing_amount_msat,
                wire_failure,
                failure_detail,
                failure_string,
            } => {
                record.kind = HtlcEventKind::LinkFail;
                record.incoming_amount_msat = Some(incoming_amount_msat);
                record.outgoing_amount_msat = Some(outgoing_amount_msat);
                record.wire_failure = Some(wire_failure);
                record.failure_detail = Some(failure_detail);
                record.failure_string = Some(failure_string);
            }
            HtlcEventDetail::Settle => {}
        }
        self.ctx.persistence.insert_htlc_event(&record).await?;
        Ok(())
    }
}
