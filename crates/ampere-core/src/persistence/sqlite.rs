// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::domain::{
    Channel, ChannelEventRecord, ChannelEventType, ChannelId, ChannelPoint, ConnectionStatus,
    ForwardRecord, HtlcEventRecord, InvoiceRecord, Node, NodeConnectionDetails,
    NodeConnectionHistoryRecord, NodeEventRecord, NodeId, NodeKey, PaymentRecord,
    RoutingPolicyRecord, TransactionRecord,
};
use crate::error::CoreError;
use crate::migrations;

use super::rows::{
    CHANNEL_COLUMNS, ChannelRow, ConnectionDetailsRow, HtlcEventRow, NodeEventRow, NodeRow,
    RoutingPolicyRow,
    TagBindingRow, invoice_state_name, payment_status_name, tag_binding_columns,
};
use super::{InvoiceIndexes, Persistence, TagBinding};

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file when missing, then runs
    /// all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url).await
    }

    /// Connect to a SQLite URL and run all migrations.
    ///
    /// `sqlite::memory:` databases live inside a single connection, so the pool
    /// is capped at one connection for them.
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| CoreError::database("connect", e))?;

        migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// Fresh migrated in-memory database.
    pub async fn in_memory() -> Result<Self, CoreError> {
        Self::connect("sqlite::memory:").await
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn add_node(&self, key: &NodeKey) -> Result<NodeId, CoreError> {
        let (node_id,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO node (public_key, chain, network, created_on)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (public_key, chain, network) DO UPDATE SET public_key = excluded.public_key
            RETURNING node_id
            "#,
        )
        .bind(&key.public_key)
        .bind(key.chain.code())
        .bind(key.network.code())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::database("add_node", e))?;

        Ok(node_id)
    }

    async fn get_node_id(&self, key: &NodeKey) -> Result<Option<NodeId>, CoreError> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT node_id FROM node
            WHERE public_key = ? AND chain = ? AND network = ?
            "#,
        )
        .bind(&key.public_key)
        .bind(key.chain.code())
        .bind(key.network.code())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }

    async fn get_node(&self, node_id: NodeId) -> Result<Option<Node>, CoreError> {
        let row = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT node_id, public_key, chain, network, created_on
            FROM node
            WHERE node_id = ?
            "#,
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Node::try_from).transpose()
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, CoreError> {
        let rows = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT node_id, public_key, chain, network, created_on
            FROM node
            ORDER BY node_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Node::try_from).collect()
    }

    async fn set_node_connection_details(
        &self,
        details: &NodeConnectionDetails,
    ) -> Result<(), CoreError> {
        let credentials = &details.credentials;
        sqlx::query(
            r#"
            INSERT INTO node_connection_details (
                node_id, name, implementation, grpc_address, tls_data, macaroon_data,
                certificate_data, key_data, ca_certificate_data, custom_settings, created_on, updated_on
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT (node_id) DO UPDATE SET
                name = excluded.name,
                implementation = excluded.implementation,
                grpc_address = excluded.grpc_address,
                tls_data = excluded.tls_data,
                macaroon_data = excluded.macaroon_data,
                certificate_data = excluded.certificate_data,
                key_data = excluded.key_data,
                ca_certificate_data = excluded.ca_certificate_data,
                custom_settings = excluded.custom_settings,
                updated_on = excluded.updated_on
            "#,
        )
        .bind(details.node_id)
        .bind(&details.name)
        .bind(details.implementation.code())
        .bind(&credentials.grpc_address)
        .bind(&credentials.tls_certificate)
        .bind(&credentials.macaroon)
        .bind(&credentials.certificate)
        .bind(&credentials.key)
        .bind(&credentials.ca_certificate)
        .bind(details.custom_settings.0 as i64)
        .bind(details.created_on)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database("set_node_connection_details", e))?;

        Ok(())
    }

    async fn get_node_connection_details(
        &self,
        node_id: NodeId,
    ) -> Result<Option<NodeConnectionDetails>, CoreError> {
        let row = sqlx::query_as::<_, ConnectionDetailsRow>(
            r#"
            SELECT node_id, name, implementation, grpc_address, tls_data, macaroon_data,
                   certificate_data, key_data, ca_certificate_data, custom_settings, created_on
            FROM node_connection_details
            WHERE node_id = ?
            "#,
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(NodeConnectionDetails::try_from).transpose()
    }

    async fn list_node_connection_details(&self) -> Result<Vec<NodeConnectionDetails>, CoreError> {
        let rows = sqlx::query_as::<_, ConnectionDetailsRow>(
            r#"
            SELECT node_id, name, implementation, grpc_address, tls_data, macaroon_data,
                   certificate_data, key_data, ca_certificate_data, custom_settings, created_on
            FROM node_connection_details
            ORDER BY node_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(NodeConnectionDetails::try_from)
            .collect()
    }

    async fn remove_node_connection_details(&self, node_id: NodeId) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM node_connection_details WHERE node_id = ?")
            .bind(node_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn add_channel(&self, channel: &Channel) -> Result<ChannelId, CoreError> {
        let (channel_id,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO channel (
                short_channel_id, lnd_short_channel_id, funding_transaction_hash,
                funding_output_index, funding_block_height, funded_on, capacity,
                first_node_id, second_node_id, initiating_node_id, accepting_node_id,
                closing_node_id, private, status_id, closing_transaction_hash,
                closing_block_height, closed_on, flags
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (funding_transaction_hash, funding_output_index)
                DO UPDATE SET updated_on = channel.updated_on
            RETURNING channel_id
            "#,
        )
        .bind(&channel.short_channel_id)
        .bind(channel.lnd_short_channel_id.map(|v| v as i64))
        .bind(&channel.funding_transaction_hash)
        .bind(channel.funding_output_index as i64)
        .bind(channel.funding_block_height.map(i64::from))
        .bind(channel.funded_on)
        .bind(channel.capacity)
        .bind(channel.first_node_id)
        .bind(channel.second_node_id)
        .bind(channel.initiating_node_id)
        .bind(channel.accepting_node_id)
        .bind(channel.closing_node_id)
        .bind(channel.private)
        .bind(channel.status.code())
        .bind(&channel.closing_transaction_hash)
        .bind(channel.closing_block_height.map(i64::from))
        .bind(channel.closed_on)
        .bind(channel.flags.0 as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::database("add_channel", e))?;

        Ok(channel_id)
    }

    async fn update_channel(&self, channel: &Channel) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE channel SET
                short_channel_id = ?, lnd_short_channel_id = ?, funding_block_height = ?,
                funded_on = ?, capacity = ?, initiating_node_id = ?, accepting_node_id = ?,
                closing_node_id = ?, private = ?, status_id = ?, closing_transaction_hash = ?,
                closing_block_height = ?, closed_on = ?, flags = ?, updated_on = ?
            WHERE channel_id = ?
            "#,
        )
        .bind(&channel.short_channel_id)
        .bind(channel.lnd_short_channel_id.map(|v| v as i64))
        .bind(channel.funding_block_height.map(i64::from))
        .bind(channel.funded_on)
        .bind(channel.capacity)
        .bind(channel.initiating_node_id)
        .bind(channel.accepting_node_id)
        .bind(channel.closing_node_id)
        .bind(channel.private)
        .bind(channel.status.code())
        .bind(&channel.closing_transaction_hash)
        .bind(channel.closing_block_height.map(i64::from))
        .bind(channel.closed_on)
        .bind(channel.flags.0 as i64)
        .bind(Utc::now())
        .bind(channel.channel_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database("update_channel", e))?;

        Ok(())
    }

    async fn get_channel(&self, channel_id: ChannelId) -> Result<Option<Channel>, CoreError> {
        let sql = format!("SELECT {} FROM channel WHERE channel_id = ?", CHANNEL_COLUMNS);
        let row = sqlx::query_as::<_, ChannelRow>(&sql)
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Channel::try_from).transpose()
    }

    async fn get_channel_by_point(
        &self,
        point: &ChannelPoint,
    ) -> Result<Option<Channel>, CoreError> {
        let sql = format!(
            "SELECT {} FROM channel WHERE funding_transaction_hash = ? AND funding_output_index = ?",
            CHANNEL_COLUMNS
        );
        let row = sqlx::query_as::<_, ChannelRow>(&sql)
            .bind(&point.txid)
            .bind(point.output_index as i64)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Channel::try_from).transpose()
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, CoreError> {
        let sql = format!("SELECT {} FROM channel ORDER BY channel_id", CHANNEL_COLUMNS);
        let rows = sqlx::query_as::<_, ChannelRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Channel::try_from).collect()
    }

    async fn insert_channel_event(&self, event: &ChannelEventRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO channel_event (time, node_id, channel_id, event_type, imported, payload)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.time)
        .bind(event.node_id)
        .bind(event.channel_id)
        .bind(event.event_type.code())
        .bind(event.imported)
        .bind(serde_json::to_string(&event.payload)?)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database("insert_channel_event", e))?;

        Ok(())
    }

    async fn channel_event_exists(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        event_type: ChannelEventType,
    ) -> Result<bool, CoreError> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM channel_event
                WHERE node_id = ? AND channel_id = ? AND event_type = ?
            )
            "#,
        )
        .bind(node_id)
        .bind(channel_id)
        .bind(event_type.code())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn count_channel_events(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        event_type: ChannelEventType,
    ) -> Result<i64, CoreError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM channel_event
            WHERE node_id = ? AND channel_id = ? AND event_type = ?
            "#,
        )
        .bind(node_id)
        .bind(channel_id)
        .bind(event_type.code())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::database("count_channel_events", e))?;

        Ok(count)
    }

    async fn insert_node_event(&self, event: &NodeEventRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO node_event (time, event_node_id, node_id, alias, color, addresses, features)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.time)
        .bind(event.event_node_id)
        .bind(event.node_id)
        .bind(&event.alias)
        .bind(&event.color)
        .bind(serde_json::to_string(&event.addresses)?)
        .bind(serde_json::to_string(&event.features)?)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database("insert_node_event", e))?;

        Ok(())
    }

    async fn latest_node_event(
        &self,
        event_node_id: NodeId,
        node_id: NodeId,
    ) -> Result<Option<NodeEventRecord>, CoreError> {
        let row = sqlx::query_as::<_, NodeEventRow>(
            r#"
            SELECT time, event_node_id, node_id, alias, color, addresses, features
            FROM node_event
            WHERE event_node_id = ? AND node_id = ?
            ORDER BY time DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(event_node_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(NodeEventRecord::try_from).transpose()
    }

    async fn insert_routing_policy(&self, record: &RoutingPolicyRecord) -> Result<(), CoreError> {
        let policy = &record.policy;
        sqlx::query(
            r#"
            INSERT INTO routing_policy (
                time, channel_id, announcing_node_id, connecting_node_id, node_id, disabled,
                fee_base_msat, fee_rate_ppm, min_htlc_msat, max_htlc_msat, time_lock_delta
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.time)
        .bind(record.channel_id)
        .bind(record.announcing_node_id)
        .bind(record.connecting_node_id)
        .bind(record.node_id)
        .bind(policy.disabled)
        .bind(policy.fee_base_msat)
        .bind(policy.fee_rate_ppm)
        .bind(policy.min_htlc_msat)
        .bind(policy.max_htlc_msat)
        .bind(i64::from(policy.time_lock_delta))
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database("insert_routing_policy", e))?;

        Ok(())
    }

    async fn latest_routing_policy(
        &self,
        channel_id: ChannelId,
        announcing_node_id: NodeId,
        connecting_node_id: NodeId,
    ) -> Result<Option<RoutingPolicyRecord>, CoreError> {
        let row = sqlx::query_as::<_, RoutingPolicyRow>(
            r#"
            SELECT time, channel_id, announcing_node_id, connecting_node_id, node_id, disabled,
                   fee_base_msat, fee_rate_ppm, min_htlc_msat, max_htlc_msat, time_lock_delta
            FROM routing_policy
            WHERE channel_id = ? AND announcing_node_id = ? AND connecting_node_id = ?
            ORDER BY time DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(channel_id)
        .bind(announcing_node_id)
        .bind(connecting_node_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RoutingPolicyRecord::from))
    }

    async fn insert_node_connection_history(
        &self,
        record: &NodeConnectionHistoryRecord,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO node_connection_history (time, event_node_id, node_id, connection_status, address)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.time)
        .bind(record.event_node_id)
        .bind(record.node_id)
        .bind(record.status.code())
        .bind(&record.address)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database("insert_node_connection_history", e))?;

        Ok(())
    }

    async fn latest_node_connection_status(
        &self,
        event_node_id: NodeId,
        node_id: NodeId,
    ) -> Result<Option<ConnectionStatus>, CoreError> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT connection_status FROM node_connection_history
            WHERE event_node_id = ? AND node_id = ?
            ORDER BY time DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(event_node_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(code,)| ConnectionStatus::from_code(code)))
    }

    async fn node_connection_history(
        &self,
        event_node_id: NodeId,
        node_id: NodeId,
    ) -> Result<Vec<ConnectionStatus>, CoreError> {
        let rows: Vec<(i32,)> = sqlx::query_as(
            r#"
            SELECT connection_status FROM node_connection_history
            WHERE event_node_id = ? AND node_id = ?
            ORDER BY time, id
            "#,
        )
        .bind(event_node_id)
        .bind(node_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::database("node_connection_history", e))?;

        Ok(rows
            .into_iter()
            .map(|(code,)| ConnectionStatus::from_code(code))
            .collect())
    }

    async fn insert_forwards(&self, forwards: &[ForwardRecord]) -> Result<u64, CoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for forward in forwards {
            let result = sqlx::query(
                r#"
                INSERT INTO forward (
                    time, time_ns, node_id, incoming_channel_id, outgoing_channel_id,
                    incoming_amount_msat, outgoing_amount_msat, fee_msat
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(forward.time)
            .bind(forward.time_ns)
            .bind(forward.node_id)
            .bind(forward.incoming_channel_id)
            .bind(forward.outgoing_channel_id)
            .bind(forward.incoming_amount_msat)
            .bind(forward.outgoing_amount_msat)
            .bind(forward.fee_msat)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::database("insert_forwards", e))?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn last_forward_time(&self, node_id: NodeId) -> Result<Option<DateTime<Utc>>, CoreError> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            SELECT time FROM forward
            WHERE node_id = ?
            ORDER BY time_ns DESC
            LIMIT 1
            "#,
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(time,)| time))
    }

    async fn insert_htlc_event(&self, event: &HtlcEventRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO htlc_event (
                time, node_id, event_type, event_origin, incoming_channel_id, outgoing_channel_id,
                incoming_htlc_id, outgoing_htlc_id, incoming_amount_msat, outgoing_amount_msat,
                incoming_timelock, outgoing_timelock, wire_failure, failure_detail, failure_string
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.time)
        .bind(event.node_id)
        .bind(event.kind.as_str())
        .bind(&event.event_origin)
        .bind(event.incoming_channel_id)
        .bind(event.outgoing_channel_id)
        .bind(event.incoming_htlc_id as i64)
        .bind(event.outgoing_htlc_id as i64)
        .bind(event.incoming_amount_msat)
        .bind(event.outgoing_amount_msat)
        .bind(event.incoming_timelock.map(i64::from))
        .bind(event.outgoing_timelock.map(i64::from))
        .bind(event.wire_failure)
        .bind(event.failure_detail)
        .bind(&event.failure_string)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database("insert_htlc_event", e))?;

        Ok(())
    }

    async fn list_htlc_events(&self, node_id: NodeId) -> Result<Vec<HtlcEventRecord>, CoreError> {
        let rows = sqlx::query_as::<_, HtlcEventRow>(
            r#"
            SELECT time, node_id, event_type, event_origin, incoming_channel_id, outgoing_channel_id,
                   incoming_htlc_id, outgoing_htlc_id, incoming_amount_msat, outgoing_amount_msat,
                   incoming_timelock, outgoing_timelock, wire_failure, failure_detail, failure_string
            FROM htlc_event
            WHERE node_id = ?
            ORDER BY time, id
            "#,
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::database("list_htlc_events", e))?;

        rows.into_iter().map(HtlcEventRecord::try_from).collect()
    }

    async fn upsert_invoice(&self, invoice: &InvoiceRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO invoice (
                node_id, r_hash, memo, value_msat, amount_paid_msat, invoice_state,
                add_index, settle_index, creation_date, settle_date, htlcs
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (node_id, r_hash) DO UPDATE SET
                amount_paid_msat = excluded.amount_paid_msat,
                invoice_state = excluded.invoice_state,
                settle_index = excluded.settle_index,
                settle_date = excluded.settle_date,
                htlcs = excluded.htlcs
            "#,
        )
        .bind(invoice.node_id)
        .bind(&invoice.r_hash)
        .bind(&invoice.memo)
        .bind(invoice.value_msat)
        .bind(invoice.amount_paid_msat)
        .bind(invoice_state_name(invoice.state))
        .bind(invoice.add_index as i64)
        .bind(invoice.settle_index as i64)
        .bind(invoice.creation_date)
        .bind(invoice.settle_date)
        .bind(serde_json::to_string(&invoice.htlcs)?)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database("upsert_invoice", e))?;

        Ok(())
    }

    async fn last_invoice_indexes(&self, node_id: NodeId) -> Result<InvoiceIndexes, CoreError> {
        let (add_index, settle_index): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(MAX(add_index), 0), COALESCE(MAX(settle_index), 0)
            FROM invoice
            WHERE node_id = ?
            "#,
        )
        .bind(node_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(InvoiceIndexes {
            add_index: add_index as u64,
            settle_index: settle_index as u64,
        })
    }

    async fn upsert_payment(&self, payment: &PaymentRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO payment (
                node_id, payment_index, payment_hash, value_msat, fee_msat, status,
                creation_date, outgoing_channel_id, failure_reason
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (node_id, payment_index) DO UPDATE SET
                fee_msat = excluded.fee_msat,
                status = excluded.status,
                outgoing_channel_id = excluded.outgoing_channel_id,
                failure_reason = excluded.failure_reason
            "#,
        )
        .bind(payment.node_id)
        .bind(payment.payment_index as i64)
        .bind(&payment.payment_hash)
        .bind(payment.value_msat)
        .bind(payment.fee_msat)
        .bind(payment_status_name(payment.status))
        .bind(payment.creation_date)
        .bind(payment.outgoing_channel_id)
        .bind(&payment.failure_reason)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database("upsert_payment", e))?;

        Ok(())
    }

    async fn last_payment_index(&self, node_id: NodeId) -> Result<u64, CoreError> {
        let (index,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(payment_index), 0) FROM payment WHERE node_id = ?")
                .bind(node_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(index as u64)
    }

    async fn insert_transaction(&self, transaction: &TransactionRecord) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO tx (node_id, tx_hash, amount, block_height, total_fees, time, label)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(transaction.node_id)
        .bind(&transaction.tx_hash)
        .bind(transaction.amount)
        .bind(i64::from(transaction.block_height))
        .bind(transaction.total_fees)
        .bind(transaction.time)
        .bind(&transaction.label)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database("insert_transaction", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn last_transaction_block_height(&self, node_id: NodeId) -> Result<u32, CoreError> {
        let (height,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(block_height), 0) FROM tx WHERE node_id = ?")
                .bind(node_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(height as u32)
    }

    async fn list_tag_bindings(&self) -> Result<Vec<TagBinding>, CoreError> {
        let rows = sqlx::query_as::<_, TagBindingRow>(
            "SELECT tag_id, node_id, channel_id FROM tagged_entity ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TagBinding::try_from).collect()
    }

    async fn add_tag_binding(&self, binding: &TagBinding) -> Result<(), CoreError> {
        let (tag_id, node_id, channel_id) = tag_binding_columns(binding);
        sqlx::query(
            r#"
            INSERT INTO tagged_entity (tag_id, node_id, channel_id)
            VALUES (?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(tag_id)
        .bind(node_id)
        .bind(channel_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database("add_tag_binding", e))?;

        Ok(())
    }

    async fn remove_tag_binding(&self, binding: &TagBinding) -> Result<(), CoreError> {
        let (tag_id, node_id, channel_id) = tag_binding_columns(binding);
        sqlx::query(
            r#"
            DELETE FROM tagged_entity
            WHERE tag_id = ? AND node_id IS ? AND channel_id IS ?
            "#,
        )
        .bind(tag_id)
        .bind(node_id)
        .bind(channel_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, CoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_on)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_on = excluded.updated_on
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::database("set_setting", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Chain, ChannelStatus, HtlcEventKind, Implementation, InvoiceState, Network,
        NodeCredentials, NodeCustomSettings, PaymentStatus, RoutingPolicy,
    };
    use chrono::Duration;

    const TXID: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    async fn test_persistence() -> SqlitePersistence {
        SqlitePersistence::in_memory()
            .await
            .expect("Failed to create in-memory SQLite persistence")
    }

    fn key(public_key: &str) -> NodeKey {
        NodeKey::new(Chain::Bitcoin, Network::MainNet, public_key)
    }

    async fn two_nodes(persistence: &SqlitePersistence) -> (NodeId, NodeId) {
        let local = persistence.add_node(&key("02aa")).await.unwrap();
        let remote = persistence.add_node(&key("03ab")).await.unwrap();
        (local, remote)
    }

    #[tokio::test]
    async fn test_add_node_is_idempotent() {
        let persistence = test_persistence().await;

        let first = persistence.add_node(&key("02aa")).await.unwrap();
        let second = persistence.add_node(&key("02aa")).await.unwrap();
        assert_eq!(first, second);

        let testnet = NodeKey::new(Chain::Bitcoin, Network::TestNet, "02aa");
        let other = persistence.add_node(&testnet).await.unwrap();
        assert_ne!(first, other);

        assert_eq!(persistence.get_node_id(&key("02aa")).await.unwrap(), Some(first));
        assert_eq!(persistence.get_node_id(&key("02ff")).await.unwrap(), None);

        let node = persistence.get_node(first).await.unwrap().unwrap();
        assert_eq!(node.public_key, "02aa");
        assert_eq!(node.network, Network::MainNet);
        assert_eq!(persistence.list_nodes().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_connection_details_round_trip() {
        let persistence = test_persistence().await;
        let node_id = persistence.add_node(&key("02aa")).await.unwrap();

        let mut details = NodeConnectionDetails {
            node_id,
            name: "alice".to_string(),
            implementation: Implementation::Lnd,
            credentials: NodeCredentials {
                grpc_address: "127.0.0.1:10009".to_string(),
                tls_certificate: vec![1, 2, 3],
                macaroon: vec![4, 5],
                ..Default::default()
            },
            custom_settings: NodeCustomSettings::all(),
            created_on: Utc::now(),
        };
        persistence.set_node_connection_details(&details).await.unwrap();

        details.name = "alice-renamed".to_string();
        persistence.set_node_connection_details(&details).await.unwrap();

        let stored = persistence
            .get_node_connection_details(node_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.name, "alice-renamed");
        assert_eq!(stored.credentials, details.credentials);
        assert_eq!(stored.custom_settings, NodeCustomSettings::all());
        assert_eq!(persistence.list_node_connection_details().await.unwrap().len(), 1);

        assert!(persistence.remove_node_connection_details(node_id).await.unwrap());
        assert!(!persistence.remove_node_connection_details(node_id).await.unwrap());
        assert!(persistence.list_node_connection_details().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_channel_is_unique_per_funding_point() {
        let persistence = test_persistence().await;
        let (local, remote) = two_nodes(&persistence).await;
        let point = ChannelPoint::new(TXID, 0);

        let mut channel = Channel::new(&point, 1_000_000, local, remote, ChannelStatus::Opening);
        let id = persistence.add_channel(&channel).await.unwrap();
        let again = persistence.add_channel(&channel).await.unwrap();
        assert_eq!(id, again);

        channel.channel_id = id;
        channel.status = ChannelStatus::CooperativeClosed;
        channel.short_channel_id = Some("772125x1829x3".to_string());
        channel.fill_short_channel_ids();
        channel.closing_node_id = Some(remote);
        persistence.update_channel(&channel).await.unwrap();

        let stored = persistence.get_channel_by_point(&point).await.unwrap().unwrap();
        assert_eq!(stored, channel);
        assert_eq!(persistence.get_channel(id).await.unwrap(), Some(channel));
        assert_eq!(persistence.list_channels().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_channel_event_exists() {
        let persistence = test_persistence().await;
        let (local, remote) = two_nodes(&persistence).await;
        let point = ChannelPoint::new(TXID, 1);
        let channel = Channel::new(&point, 500, local, remote, ChannelStatus::Open);
        let channel_id = persistence.add_channel(&channel).await.unwrap();

        assert!(
            !persistence
                .channel_event_exists(local, channel_id, ChannelEventType::Open)
                .await
                .unwrap()
        );

        persistence
            .insert_channel_event(&ChannelEventRecord {
                time: Utc::now(),
                node_id: local,
                channel_id,
                event_type: ChannelEventType::Open,
                imported: true,
                payload: serde_json::json!({"capacity": 500}),
            })
            .await
            .unwrap();

        assert!(
            persistence
                .channel_event_exists(local, channel_id, ChannelEventType::Open)
                .await
                .unwrap()
        );
        assert!(
            !persistence
                .channel_event_exists(local, channel_id, ChannelEventType::Closed)
                .await
                .unwrap()
        );
        assert_eq!(
            persistence
                .count_channel_events(local, channel_id, ChannelEventType::Open)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_latest_routing_policy() {
        let persistence = test_persistence().await;
        let (local, remote) = two_nodes(&persistence).await;
        let channel = Channel::new(&ChannelPoint::new(TXID, 2), 500, local, remote, ChannelStatus::Open);
        let channel_id = persistence.add_channel(&channel).await.unwrap();

        let now = Utc::now();
        for (offset, fee_rate_ppm) in [(2, 100), (1, 250)] {
            persistence
                .insert_routing_policy(&RoutingPolicyRecord {
                    time: now - Duration::seconds(offset),
                    channel_id,
                    announcing_node_id: local,
                    connecting_node_id: remote,
                    node_id: local,
                    policy: RoutingPolicy {
                        fee_rate_ppm,
                        time_lock_delta: 40,
                        ..Default::default()
                    },
                })
                .await
                .unwrap();
        }

        let latest = persistence
            .latest_routing_policy(channel_id, local, remote)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.policy.fee_rate_ppm, 250);
        assert_eq!(latest.policy.time_lock_delta, 40);

        assert!(
            persistence
                .latest_routing_policy(channel_id, remote, local)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_node_event_and_connection_history() {
        let persistence = test_persistence().await;
        let (local, remote) = two_nodes(&persistence).await;

        let event = NodeEventRecord {
            time: Utc::now(),
            event_node_id: remote,
            node_id: local,
            alias: "bob".to_string(),
            color: "#3399ff".to_string(),
            addresses: vec!["1.2.3.4:9735".to_string()],
            features: vec![0, 5, 7],
        };
        persistence.insert_node_event(&event).await.unwrap();
        let latest = persistence.latest_node_event(remote, local).await.unwrap().unwrap();
        assert!(!latest.differs_from(&event));

        assert_eq!(
            persistence.latest_node_connection_status(remote, local).await.unwrap(),
            None
        );
        for status in [ConnectionStatus::Connected, ConnectionStatus::Disconnected] {
            persistence
                .insert_node_connection_history(&NodeConnectionHistoryRecord {
                    time: Utc::now(),
                    event_node_id: remote,
                    node_id: local,
                    status,
                    address: None,
                })
                .await
                .unwrap();
        }
        assert_eq!(
            persistence.latest_node_connection_status(remote, local).await.unwrap(),
            Some(ConnectionStatus::Disconnected)
        );
        assert_eq!(
            persistence.node_connection_history(remote, local).await.unwrap(),
            vec![ConnectionStatus::Connected, ConnectionStatus::Disconnected]
        );
    }

    #[tokio::test]
    async fn test_insert_forwards_skips_duplicates() {
        let persistence = test_persistence().await;
        let (local, _) = two_nodes(&persistence).await;
        assert_eq!(persistence.last_forward_time(local).await.unwrap(), None);

        let base = Utc::now();
        let forwards: Vec<ForwardRecord> = (0..3)
            .map(|i| ForwardRecord {
                time: base + Duration::seconds(i),
                time_ns: (base + Duration::seconds(i)).timestamp_nanos_opt().unwrap(),
                node_id: local,
                incoming_channel_id: 1,
                outgoing_channel_id: 2,
                incoming_amount_msat: 10_000,
                outgoing_amount_msat: 9_000,
                fee_msat: 1_000,
            })
            .collect();

        assert_eq!(persistence.insert_forwards(&forwards).await.unwrap(), 3);
        assert_eq!(persistence.insert_forwards(&forwards[1..]).await.unwrap(), 0);

        let last = persistence.last_forward_time(local).await.unwrap().unwrap();
        assert_eq!(last.timestamp(), forwards[2].time.timestamp());
    }

    #[tokio::test]
    async fn test_htlc_invoice_payment_and_transaction_indexes() {
        let persistence = test_persistence().await;
        let (local, _) = two_nodes(&persistence).await;

        persistence
            .insert_htlc_event(&HtlcEventRecord {
                time: Utc::now(),
                node_id: local,
                kind: HtlcEventKind::LinkFail,
                event_origin: "forward".to_string(),
                incoming_channel_id: 1,
                outgoing_channel_id: 2,
                incoming_htlc_id: 7,
                outgoing_htlc_id: 0,
                incoming_amount_msat: Some(1_000),
                outgoing_amount_msat: None,
                incoming_timelock: Some(800_000),
                outgoing_timelock: None,
                wire_failure: Some(15),
                failure_detail: Some(6),
                failure_string: Some("insufficient balance".to_string()),
            })
            .await
            .unwrap();
        let htlcs = persistence.list_htlc_events(local).await.unwrap();
        assert_eq!(htlcs.len(), 1);
        assert_eq!(htlcs[0].kind, HtlcEventKind::LinkFail);
        assert_eq!(htlcs[0].incoming_timelock, Some(800_000));
        assert_eq!(htlcs[0].wire_failure, Some(15));
        assert_eq!(htlcs[0].failure_detail, Some(6));

        let mut invoice = InvoiceRecord {
            node_id: local,
            r_hash: "beef".to_string(),
            memo: "coffee".to_string(),
            value_msat: 5_000,
            amount_paid_msat: 0,
            state: InvoiceState::Open,
            add_index: 4,
            settle_index: 0,
            creation_date: Utc::now(),
            settle_date: None,
            htlcs: Vec::new(),
        };
        persistence.upsert_invoice(&invoice).await.unwrap();
        invoice.state = InvoiceState::Settled;
        invoice.settle_index = 2;
        invoice.amount_paid_msat = 5_000;
        persistence.upsert_invoice(&invoice).await.unwrap();
        assert_eq!(
            persistence.last_invoice_indexes(local).await.unwrap(),
            InvoiceIndexes {
                add_index: 4,
                settle_index: 2
            }
        );

        assert_eq!(persistence.last_payment_index(local).await.unwrap(), 0);
        persistence
            .upsert_payment(&PaymentRecord {
                node_id: local,
                payment_hash: "cafe".to_string(),
                payment_index: 11,
                value_msat: 1_000,
                fee_msat: 1,
                status: PaymentStatus::Succeeded,
                creation_date: Utc::now(),
                outgoing_channel_id: Some(2),
                failure_reason: None,
            })
            .await
            .unwrap();
        assert_eq!(persistence.last_payment_index(local).await.unwrap(), 11);

        let transaction = TransactionRecord {
            node_id: local,
            tx_hash: TXID.to_string(),
            amount: -1_000,
            block_height: 800_123,
            total_fees: 200,
            time: Utc::now(),
            label: String::new(),
        };
        assert!(persistence.insert_transaction(&transaction).await.unwrap());
        assert!(!persistence.insert_transaction(&transaction).await.unwrap());
        assert_eq!(
            persistence.last_transaction_block_height(local).await.unwrap(),
            800_123
        );
    }

    #[tokio::test]
    async fn test_tag_bindings_and_settings() {
        let persistence = test_persistence().await;
        let (local, remote) = two_nodes(&persistence).await;
        let channel = Channel::new(&ChannelPoint::new(TXID, 3), 500, local, remote, ChannelStatus::Open);
        let channel_id = persistence.add_channel(&channel).await.unwrap();

        let node_tag = TagBinding::Node {
            tag_id: 1,
            node_id: remote,
        };
        let channel_tag = TagBinding::Channel {
            tag_id: 1,
            channel_id,
        };
        persistence.add_tag_binding(&node_tag).await.unwrap();
        persistence.add_tag_binding(&node_tag).await.unwrap();
        persistence.add_tag_binding(&channel_tag).await.unwrap();
        assert_eq!(
            persistence.list_tag_bindings().await.unwrap(),
            vec![node_tag, channel_tag]
        );

        persistence.remove_tag_binding(&node_tag).await.unwrap();
        assert_eq!(persistence.list_tag_bindings().await.unwrap(), vec![channel_tag]);

        assert_eq!(persistence.get_setting("maintenance.last_run").await.unwrap(), None);
        persistence.set_setting("maintenance.last_run", "a").await.unwrap();
        persistence.set_setting("maintenance.last_run", "b").await.unwrap();
        assert_eq!(
            persistence.get_setting("maintenance.last_run").await.unwrap().as_deref(),
            Some("b")
        );
    }

    #[tokio::test]
    async fn test_from_path_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ampere.db");

        let persistence = SqlitePersistence::from_path(&path).await.unwrap();
        persistence.add_node(&key("02aa")).await.unwrap();
        assert!(path.exists());
    }
}
