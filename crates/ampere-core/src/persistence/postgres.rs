// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed persistence implementation.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{
    Channel, ChannelEventRecord, ChannelEventType, ChannelId, ChannelPoint, ConnectionStatus,
    ForwardRecord, HtlcEventRecord, InvoiceRecord, Node, NodeConnectionDetails,
    NodeConnectionHistoryRecord, NodeEventRecord, NodeId, NodeKey, PaymentRecord,
    RoutingPolicyRecord, TransactionRecord,
};
use crate::error::CoreError;

use super::rows::{
    CHANNEL_COLUMNS, ChannelRow, ConnectionDetailsRow, HtlcEventRow, NodeEventRow, NodeRow,
    RoutingPolicyRow,
    TagBindingRow, invoice_state_name, payment_status_name, tag_binding_columns,
};
use super::{InvoiceIndexes, Persistence, TagBinding};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    ///
    /// The pool must already be migrated, see [`crate::migrations::run_postgres`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn add_node(&self, key: &NodeKey) -> Result<NodeId, CoreError> {
        let (node_id,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO node (public_key, chain, network, created_on)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (public_key, chain, network) DO UPDATE SET public_key = EXCLUDED.public_key
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
            WHERE public_key = $1 AND chain = $2 AND network = $3
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
            WHERE node_id = $1
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (node_id) DO UPDATE SET
                name = EXCLUDED.name,
                implementation = EXCLUDED.implementation,
                grpc_address = EXCLUDED.grpc_address,
                tls_data = EXCLUDED.tls_data,
                macaroon_data = EXCLUDED.macaroon_data,
                certificate_data = EXCLUDED.certificate_data,
                key_data = EXCLUDED.key_data,
                ca_certificate_data = EXCLUDED.ca_certificate_data,
                custom_settings = EXCLUDED.custom_settings,
                updated_on = EXCLUDED.updated_on
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
            WHERE node_id = $1
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
        let result = sqlx::query("DELETE FROM node_connection_details WHERE node_id = $1")
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
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
                short_channel_id = $1, lnd_short_channel_id = $2, funding_block_height = $3,
                funded_on = $4, capacity = $5, initiating_node_id = $6, accepting_node_id = $7,
                closing_node_id = $8, private = $9, status_id = $10, closing_transaction_hash = $11,
                closing_block_height = $12, closed_on = $13, flags = $14, updated_on = $15
            WHERE channel_id = $16
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
        let sql = format!("SELECT {} FROM channel WHERE channel_id = $1", CHANNEL_COLUMNS);
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
            "SELECT {} FROM channel WHERE funding_transaction_hash = $1 AND funding_output_index = $2",
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
            VALUES ($1, $2, $3, $4, $5, $6)
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
                WHERE node_id = $1 AND channel_id = $2 AND event_type = $3
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
            WHERE node_id = $1 AND channel_id = $2 AND event_type = $3
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
            VALUES ($1, $2, $3, $4, $5, $6, $7)
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
            WHERE event_node_id = $1 AND node_id = $2
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
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
            WHERE channel_id = $1 AND announcing_node_id = $2 AND connecting_node_id = $3
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
            VALUES ($1, $2, $3, $4, $5)
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
            WHERE event_node_id = $1 AND node_id = $2
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
            WHERE event_node_id = $1 AND node_id = $2
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
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
            WHERE node_id = $1
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
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
            WHERE node_id = $1
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (node_id, r_hash) DO UPDATE SET
                amount_paid_msat = EXCLUDED.amount_paid_msat,
                invoice_state = EXCLUDED.invoice_state,
                settle_index = EXCLUDED.settle_index,
                settle_date = EXCLUDED.settle_date,
                htlcs = EXCLUDED.htlcs
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
            WHERE node_id = $1
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (node_id, payment_index) DO UPDATE SET
                fee_msat = EXCLUDED.fee_msat,
                status = EXCLUDED.status,
                outgoing_channel_id = EXCLUDED.outgoing_channel_id,
                failure_reason = EXCLUDED.failure_reason
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
            sqlx::query_as("SELECT COALESCE(MAX(payment_index), 0) FROM payment WHERE node_id = $1")
                .bind(node_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(index as u64)
    }

    async fn insert_transaction(&self, transaction: &TransactionRecord) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO tx (node_id, tx_hash, amount, block_height, total_fees, time, label)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
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
            sqlx::query_as("SELECT COALESCE(MAX(block_height), 0) FROM tx WHERE node_id = $1")
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
            VALUES ($1, $2, $3)
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
            WHERE tag_id = $1 AND node_id IS NOT DISTINCT FROM $2 AND channel_id IS NOT DISTINCT FROM $3
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
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_on)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_on = EXCLUDED.updated_on
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
