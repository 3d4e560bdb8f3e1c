// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic housekeeping imports.
//!
//! Every interval the maintenance service refreshes routing policies and node
//! information for each managed node with connection details. The imports are
//! not forced, so a run shortly after an operator-triggered import is skipped.

use ampere_core::domain::{CoreServiceType, ImportType, ServiceStatus, StateWorld};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::ServiceContext;
use crate::error::Result;
use crate::importers::Importer;

/// Settings key holding the RFC 3339 time of the last completed pass.
pub const LAST_RUN_SETTING: &str = "maintenance.last_run";

const IMPORTS: [ImportType; 2] = [
    ImportType::ChannelRoutingPolicies,
    ImportType::NodeInformation,
];

/// The [`CoreServiceType::Maintenance`] service.
pub struct MaintenanceService {
    ctx: ServiceContext,
    importer: Importer,
}

impl MaintenanceService {
    /// Create the service.
    pub fn new(ctx: ServiceContext) -> Self {
        let importer = Importer::new(ctx.clone());
        Self { ctx, importer }
    }

    /// Run passes until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        self.ctx
            .caches
            .services
            .set_core_status(
                StateWorld::Current,
                CoreServiceType::Maintenance,
                ServiceStatus::Active,
                None,
            )
            .await;
        info!(
            interval_secs = self.ctx.workers.maintenance_interval.as_secs(),
            "Maintenance service started"
        );

        let mut ticker = tokio::time::interval(self.ctx.workers.maintenance_interval);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Maintenance service shutting down");
                    return Ok(());
                }

                _ = ticker.tick() => {
                    self.run_once().await?;
                }
            }
        }
    }

    /// One pass over every managed node. Import failures are logged per node;
    /// only a failure to record the pass is returned.
    pub async fn run_once(&self) -> Result<usize> {
        let mut completed = 0;
        for details in self.ctx.caches.services.list_node_connection_details().await {
            let node_id = details.node_id;
            if self.ctx.caches.nodes.get_node_settings(node_id).await.is_none() {
                debug!(node_id, "Skipping maintenance of unregistered node");
                continue;
            }
            for import_type in IMPORTS {
                match self.importer.run(import_type, node_id, false).await {
                    Ok(_) => completed += 1,
                    Err(e) => warn!(node_id, ?import_type, error = %e, "Maintenance import failed"),
                }
            }
        }
        self.ctx
            .persistence
            .set_setting(LAST_RUN_SETTING, &Utc::now().to_rfc3339())
            .await?;
        debug!(completed, "Maintenance pass finished");
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use ampere_core::domain::{ChannelPoint, NodeCustomSettings};

    use super::*;
    use crate::client::ChannelInfo;
    use crate::testing::{fixture, register};

    fn open_channel() -> ChannelInfo {
        ChannelInfo {
            channel_point: ChannelPoint::new("cc".repeat(32), 1),
            short_channel_id: 1 << 40,
            remote_public_key: format!("03{}", "bc".repeat(32)),
            capacity: 2_000_000,
            local_balance: 1_000_000,
            remote_balance: 996_000,
            local_channel_reserve: 20_000,
            remote_channel_reserve: 20_000,
            local_dust_limit: 354,
            remote_dust_limit: 354,
            commit_fee: 4_000,
            active: true,
            private: false,
            initiator: true,
            pending_htlcs: Vec::new(),
            unsettled_balance: 0,
            total_satoshis_sent: 0,
            total_satoshis_received: 0,
            num_updates: 0,
            commit_weight: 724,
            fee_per_kw: 2_500,
        }
    }

    #[tokio::test]
    async fn test_run_once_imports_and_records_pass() {
        let f = fixture().await;
        let node_id = register(&f, NodeCustomSettings::default()).await;
        f.client.set_channels(vec![open_channel()]).await;
        Importer::new(f.ctx.clone())
            .run(ImportType::AllChannels, node_id, true)
            .await
            .unwrap();

        let service = MaintenanceService::new(f.ctx.clone());
        assert_eq!(service.run_once().await.unwrap(), IMPORTS.len());
        assert_eq!(f.client.call_count("get_chan_info"), 1);
        assert_eq!(f.client.call_count("get_node_info"), 1);
        let last_run = f
            .ctx
            .persistence
            .get_setting(LAST_RUN_SETTING)
            .await
            .unwrap()
            .expect("pass not recorded");
        assert!(chrono::DateTime::parse_from_rfc3339(&last_run).is_ok());

        // The second pass falls inside the skip window and asks the daemon nothing.
        service.run_once().await.unwrap();
        assert_eq!(f.client.call_count("get_chan_info"), 1);
        assert_eq!(f.client.call_count("get_node_info"), 1);
    }

    #[tokio::test]
    async fn test_unreachable_node_does_not_fail_pass() {
        let f = fixture().await;
        let node_id = register(&f, NodeCustomSettings::default()).await;
        f.ctx.pool.remove(node_id).await;
        f.connector.fail.store(true, Ordering::SeqCst);

        let service = MaintenanceService::new(f.ctx.clone());
        assert_eq!(service.run_once().await.unwrap(), 0);
        assert!(
            f.ctx
                .persistence
                .get_setting(LAST_RUN_SETTING)
                .await
                .unwrap()
                .is_some()
        );
    }
}
