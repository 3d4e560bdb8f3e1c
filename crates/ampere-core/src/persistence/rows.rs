// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Row shapes shared by both backends and their mapping into the domain model.
//!
//! Unsigned domain values are stored as signed 64-bit integers since neither
//! backend has an unsigned column type.

use chrono::{DateTime, Utc};

use crate::domain::{
    Chain, Channel, ChannelFlags, ChannelStatus, HtlcEventKind, HtlcEventRecord, Implementation,
    InvoiceState,
    Network, Node, NodeConnectionDetails, NodeCredentials, NodeCustomSettings, NodeEventRecord,
    PaymentStatus, RoutingPolicy, RoutingPolicyRecord,
};
use crate::error::CoreError;

use super::TagBinding;

fn corrupt(table: &'static str, message: impl Into<String>) -> CoreError {
    CoreError::CorruptRow {
        table,
        message: message.into(),
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct NodeRow {
    pub node_id: i32,
    pub public_key: String,
    pub chain: i32,
    pub network: i32,
    pub created_on: DateTime<Utc>,
}

impl TryFrom<NodeRow> for Node {
    type Error = CoreError;

    fn try_from(row: NodeRow) -> Result<Self, Self::Error> {
        Ok(Node {
            node_id: row.node_id,
            public_key: row.public_key,
            chain: Chain::from_code(row.chain)
                .ok_or_else(|| corrupt("node", format!("unknown chain {}", row.chain)))?,
            network: Network::from_code(row.network)
                .ok_or_else(|| corrupt("node", format!("unknown network {}", row.network)))?,
            created_on: row.created_on,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ConnectionDetailsRow {
    pub node_id: i32,
    pub name: String,
    pub implementation: i32,
    pub grpc_address: String,
    pub tls_data: Vec<u8>,
    pub macaroon_data: Vec<u8>,
    pub certificate_data: Vec<u8>,
    pub key_data: Vec<u8>,
    pub ca_certificate_data: Vec<u8>,
    pub custom_settings: i64,
    pub created_on: DateTime<Utc>,
}

impl TryFrom<ConnectionDetailsRow> for NodeConnectionDetails {
    type Error = CoreError;

    fn try_from(row: ConnectionDetailsRow) -> Result<Self, Self::Error> {
        let implementation = Implementation::from_code(row.implementation).ok_or_else(|| {
            corrupt(
                "node_connection_details",
                format!("unknown implementation {}", row.implementation),
            )
        })?;
        Ok(NodeConnectionDetails {
            node_id: row.node_id,
            name: row.name,
            implementation,
            credentials: NodeCredentials {
                grpc_address: row.grpc_address,
                tls_certificate: row.tls_data,
                macaroon: row.macaroon_data,
                certificate: row.certificate_data,
                key: row.key_data,
                ca_certificate: row.ca_certificate_data,
            },
            custom_settings: NodeCustomSettings(row.custom_settings as u32),
            created_on: row.created_on,
        })
    }
}

/// Column list matching [`ChannelRow`].
pub(crate) const CHANNEL_COLUMNS: &str = "channel_id, short_channel_id, lnd_short_channel_id, \
    funding_transaction_hash, funding_output_index, funding_block_height, funded_on, capacity, \
    first_node_id, second_node_id, initiating_node_id, accepting_node_id, closing_node_id, \
    private, status_id, closing_transaction_hash, closing_block_height, closed_on, flags";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ChannelRow {
    pub channel_id: i32,
    pub short_channel_id: Option<String>,
    pub lnd_short_channel_id: Option<i64>,
    pub funding_transaction_hash: String,
    pub funding_output_index: i64,
    pub funding_block_height: Option<i64>,
    pub funded_on: Option<DateTime<Utc>>,
    pub capacity: i64,
    pub first_node_id: i32,
    pub second_node_id: i32,
    pub initiating_node_id: Option<i32>,
    pub accepting_node_id: Option<i32>,
    pub closing_node_id: Option<i32>,
    pub private: bool,
    pub status_id: i32,
    pub closing_transaction_hash: Option<String>,
    pub closing_block_height: Option<i64>,
    pub closed_on: Option<DateTime<Utc>>,
    pub flags: i64,
}

impl TryFrom<ChannelRow> for Channel {
    type Error = CoreError;

    fn try_from(row: ChannelRow) -> Result<Self, Self::Error> {
        let status = ChannelStatus::from_code(row.status_id)
            .ok_or_else(|| corrupt("channel", format!("unknown status {}", row.status_id)))?;
        Ok(Channel {
            channel_id: row.channel_id,
            short_channel_id: row.short_channel_id,
            lnd_short_channel_id: row.lnd_short_channel_id.map(|v| v as u64),
            funding_transaction_hash: row.funding_transaction_hash,
            funding_output_index: row.funding_output_index as u32,
            funding_block_height: row.funding_block_height.map(|v| v as u32),
            funded_on: row.funded_on,
            capacity: row.capacity,
            first_node_id: row.first_node_id,
            second_node_id: row.second_node_id,
            initiating_node_id: row.initiating_node_id,
            accepting_node_id: row.accepting_node_id,
            closing_node_id: row.closing_node_id,
            private: row.private,
            status,
            closing_transaction_hash: row.closing_transaction_hash,
            closing_block_height: row.closing_block_height.map(|v| v as u32),
            closed_on: row.closed_on,
            flags: ChannelFlags(row.flags as u32),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct NodeEventRow {
    pub time: DateTime<Utc>,
    pub event_node_id: i32,
    pub node_id: i32,
    pub alias: String,
    pub color: String,
    pub addresses: String,
    pub features: String,
}

impl TryFrom<NodeEventRow> for NodeEventRecord {
    type Error = CoreError;

    fn try_from(row: NodeEventRow) -> Result<Self, Self::Error> {
        Ok(NodeEventRecord {
            time: row.time,
            event_node_id: row.event_node_id,
            node_id: row.node_id,
            alias: row.alias,
            color: row.color,
            addresses: serde_json::from_str(&row.addresses)?,
            features: serde_json::from_str(&row.features)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct HtlcEventRow {
    pub time: DateTime<Utc>,
    pub node_id: i32,
    pub event_type: String,
    pub event_origin: String,
    pub incoming_channel_id: i32,
    pub outgoing_channel_id: i32,
    pub incoming_htlc_id: i64,
    pub outgoing_htlc_id: i64,
    pub incoming_amount_msat: Option<i64>,
    pub outgoing_amount_msat: Option<i64>,
    pub incoming_timelock: Option<i64>,
    pub outgoing_timelock: Option<i64>,
    pub wire_failure: Option<i32>,
    pub failure_detail: Option<i32>,
    pub failure_string: Option<String>,
}

impl TryFrom<HtlcEventRow> for HtlcEventRecord {
    type Error = CoreError;

    fn try_from(row: HtlcEventRow) -> Result<Self, Self::Error> {
        let kind = HtlcEventKind::from_name(&row.event_type)
            .ok_or_else(|| corrupt("htlc_event", format!("unknown event type {}", row.event_type)))?;
        Ok(HtlcEventRecord {
            time: row.time,
            node_id: row.node_id,
            kind,
            event_origin: row.event_origin,
            incoming_channel_id: row.incoming_channel_id,
            outgoing_channel_id: row.outgoing_channel_id,
            incoming_htlc_id: row.incoming_htlc_id as u64,
            outgoing_htlc_id: row.outgoing_htlc_id as u64,
            incoming_amount_msat: row.incoming_amount_msat,
            outgoing_amount_msat: row.outgoing_amount_msat,
            incoming_timelock: row.incoming_timelock.map(|t| t as u32),
            outgoing_timelock: row.outgoing_timelock.map(|t| t as u32),
            wire_failure: row.wire_failure,
            failure_detail: row.failure_detail,
            failure_string: row.failure_string,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RoutingPolicyRow {
    pub time: DateTime<Utc>,
    pub channel_id: i32,
    pub announcing_node_id: i32,
    pub connecting_node_id: i32,
    pub node_id: i32,
    pub disabled: bool,
    pub fee_base_msat: i64,
    pub fee_rate_ppm: i64,
    pub min_htlc_msat: i64,
    pub max_htlc_msat: i64,
    pub time_lock_delta: i64,
}

impl From<RoutingPolicyRow> for RoutingPolicyRecord {
    fn from(row: RoutingPolicyRow) -> Self {
        RoutingPolicyRecord {
            time: row.time,
            channel_id: row.channel_id,
            announcing_node_id: row.announcing_node_id,
            connecting_node_id: row.connecting_node_id,
            node_id: row.node_id,
            policy: RoutingPolicy {
                disabled: row.disabled,
                fee_base_msat: row.fee_base_msat,
                fee_rate_ppm: row.fee_rate_ppm,
                min_htlc_msat: row.min_htlc_msat,
                max_htlc_msat: row.max_htlc_msat,
                time_lock_delta: row.time_lock_delta as u32,
            },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TagBindingRow {
    pub tag_id: i32,
    pub node_id: Option<i32>,
    pub channel_id: Option<i32>,
}

impl TryFrom<TagBindingRow> for TagBinding {
    type Error = CoreError;

    fn try_from(row: TagBindingRow) -> Result<Self, Self::Error> {
        match (row.node_id, row.channel_id) {
            (Some(node_id), None) => Ok(TagBinding::Node {
                tag_id: row.tag_id,
                node_id,
            }),
            (None, Some(channel_id)) => Ok(TagBinding::Channel {
                tag_id: row.tag_id,
                channel_id,
            }),
            _ => Err(corrupt(
                "tagged_entity",
                format!("tag {} must bind exactly one node or channel", row.tag_id),
            )),
        }
    }
}

/// Split a binding into its (tag, node, channel) columns.
pub(crate) fn tag_binding_columns(binding: &TagBinding) -> (i32, Option<i32>, Option<i32>) {
    match *binding {
        TagBinding::Node { tag_id, node_id } => (tag_id, Some(node_id), None),
        TagBinding::Channel { tag_id, channel_id } => (tag_id, None, Some(channel_id)),
    }
}

pub(crate) fn invoice_state_name(state: InvoiceState) -> &'static str {
    match state {
        InvoiceState::Open => "OPEN",
        InvoiceState::Settled => "SETTLED",
        InvoiceState::Canceled => "CANCELED",
        InvoiceState::Accepted => "ACCEPTED",
    }
}

pub(crate) fn payment_status_name(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::InFlight => "IN_FLIGHT",
        PaymentStatus::Succeeded => "SUCCEEDED",
        PaymentStatus::Failed => "FAILED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_row_rejects_unknown_status() {
        let row = ChannelRow {
            channel_id: 1,
            short_channel_id: None,
            lnd_short_channel_id: None,
            funding_transaction_hash: "aa".to_string(),
            funding_output_index: 0,
            funding_block_height: None,
            funded_on: None,
            capacity: 1,
            first_node_id: 1,
            second_node_id: 2,
            initiating_node_id: None,
            accepting_node_id: None,
            closing_node_id: None,
            private: false,
            status_id: 42,
            closing_transaction_hash: None,
            closing_block_height: None,
            closed_on: None,
            flags: 0,
        };
        let err = Channel::try_from(row).unwrap_err();
        assert!(matches!(err, CoreError::CorruptRow { table: "channel", .. }));
    }

    #[test]
    fn test_tag_binding_row_requires_one_subject() {
        let row = TagBindingRow {
            tag_id: 3,
            node_id: Some(1),
            channel_id: Some(2),
        };
        assert!(TagBinding::try_from(row).is_err());

        let row = TagBindingRow {
            tag_id: 3,
            node_id: None,
            channel_id: Some(2),
        };
        assert_eq!(
            TagBinding::try_from(row).unwrap(),
            TagBinding::Channel {
                tag_id: 3,
                channel_id: 2
            }
        );
    }
}
