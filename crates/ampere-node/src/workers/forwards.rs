// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Forwarding-history poller.
//!
//! Each tick requests the window from the last stored forward to now, one
//! page at a time. The unit reports Initializing until the first complete
//! pass and Active afterwards.

use ampere_core::domain::{
    AutomationEvent, ForwardRecord, NodeCustomSettings, NodeServiceKey, ServiceStatus, StateWorld,
};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{ForwardingEvent, ForwardingHistoryRequest};
use crate::context::ServiceContext;
use crate::error::{Result, with_timeout};

/// Worker for [`ampere_core::domain::NodeServiceType::ForwardsStream`].
pub struct ForwardsWorker {
    ctx: ServiceContext,
    key: NodeServiceKey,
}

impl ForwardsWorker {
    /// Worker for one node.
    pub fn new(ctx: ServiceContext, key: NodeServiceKey) -> Self {
        Self { ctx, key }
    }

    /// Poll every tick until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let services = &self.ctx.caches.services;
        services
            .set_node_status(StateWorld::Current, self.key, ServiceStatus::Initializing, None)
            .await;

        let mut caught_up = false;
        let mut ticker = tokio::time::interval(self.ctx.workers.forwards_tick);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Ok(()),

                _ = ticker.tick() => {
                    let complete = self.poll(&cancel).await?;
                    if complete && !caught_up {
                        caught_up = true;
                        info!(node_id = self.key.node_id, "Forwarding history caught up");
                        services
                            .set_node_status(StateWorld::Current, self.key, ServiceStatus::Active, None)
                            .await;
                    }
                }
            }
        }
    }

    /// Where the window of the next poll starts.
    async fn baseline(&self) -> Result<DateTime<Utc>> {
        let node_id = self.key.node_id;
        if let Some(last) = self.ctx.persistence.last_forward_time(node_id).await? {
            return Ok(last);
        }
        let details = self.ctx.connection_details(node_id).await?;
        if details
            .custom_settings
            .has(NodeCustomSettings::IMPORT_HISTORIC_FORWARDS)
        {
            Ok(DateTime::UNIX_EPOCH)
        } else {
            Ok(details.created_on)
        }
    }

    /// Import the window up to now. Returns false when cancelled mid-way.
    async fn poll(&self, cancel: &CancellationToken) -> Result<bool> {
        let node_id = self.key.node_id;
        let client = self.ctx.client(node_id).await?;
        let start_time = self.baseline().await?;
        let end_time = Utc::now();
        let page_size = self.ctx.workers.forwards_page_size;
        let mut index_offset = 0;

        loop {
            let page = with_timeout(
                "forwarding_history",
                self.ctx.timeouts.bulk,
                client.forwarding_history(ForwardingHistoryRequest {
                    start_time,
                    end_time,
                    index_offset,
                    max_events: page_size,
                }),
            )
            .await?;
            let fetched = page.events.len();
            let mut records = Vec::with_capacity(fetched);
            for event in &page.events {
                records.push(self.record(event).await);
            }
            let inserted = self.ctx.persistence.insert_forwards(&records).await?;
            debug!(node_id, index_offset, fetched, inserted, "Forwarding history page");

            if inserted > 0 {
                for record in records.into_iter().filter(|r| r.time > start_time) {
                    self.ctx
                        .caches
                        .triggers
                        .publish_event(AutomationEvent::Forward(record))
                        .await;
                }
            }

            if (fetched as u32) < page_size {
                return Ok(true);
            }
            index_offset = page.last_offset_index;
            if !super::pause(cancel, self.ctx.workers.request_interval).await {
                return Ok(false);
            }
        }
    }

    async fn record(&self, event: &ForwardingEvent) -> ForwardRecord {
        let channels = &self.ctx.caches.channels;
        ForwardRecord {
            time: DateTime::from_timestamp_nanos(event.timestamp_ns),
            time_ns: event.timestamp_ns,
            node_id: self.key.node_id,
            incoming_channel_id: channels
                .get_channel_id_by_lnd_short_channel_id(event.incoming_channel_id)
                .await,
            outgoing_channel_id: channels
                .get_channel_id_by_lnd_short_channel_id(event.outgoing_channel_id)
                .await,
            incoming_amount_msat: event.incoming_amount_msat,
            outgoing_amount_msat: event.outgoing_amount_msat,
            fee_msat: event.fee_msat,
        }
    }
}
