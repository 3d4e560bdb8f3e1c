// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Canonical event records.
//!
//! Stream workers translate daemon messages into these records before they are
//! persisted. The [`AutomationEvent`] family is what gets queued on workflow triggers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::{ChannelStatus, RoutingPolicy};
use super::node::ConnectionStatus;
use super::{ChannelId, NodeId};

/// Kind of a persisted channel event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelEventType {
    /// Channel opened.
    Open,
    /// Channel closed.
    Closed,
    /// Channel link became active.
    Active,
    /// Channel link became inactive.
    Inactive,
    /// Funding transaction broadcast.
    PendingOpen,
    /// All outputs of a closed channel are resolved.
    FullyResolved,
}

impl ChannelEventType {
    /// Integer code stored in the database.
    pub fn code(self) -> i32 {
        match self {
            Self::Open => 0,
            Self::Closed => 1,
            Self::Active => 2,
            Self::Inactive => 3,
            Self::PendingOpen => 4,
            Self::FullyResolved => 5,
        }
    }

    /// Decode a database code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Open),
            1 => Some(Self::Closed),
            2 => Some(Self::Active),
            3 => Some(Self::Inactive),
            4 => Some(Self::PendingOpen),
            5 => Some(Self::FullyResolved),
            _ => None,
        }
    }
}

/// Row of the `channel_event` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEventRecord {
    /// When the event happened (or was imported).
    pub time: DateTime<Utc>,
    /// Managed node that reported it.
    pub node_id: NodeId,
    /// Channel.
    pub channel_id: ChannelId,
    /// Kind.
    pub event_type: ChannelEventType,
    /// Created by a bulk import rather than a live stream.
    pub imported: bool,
    /// Raw message as JSON.
    pub payload: serde_json::Value,
}

/// Row of the `node_event` table: one node announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEventRecord {
    /// When observed.
    pub time: DateTime<Utc>,
    /// Node the announcement is about.
    pub event_node_id: NodeId,
    /// Managed node that observed it.
    pub node_id: NodeId,
    /// Alias.
    pub alias: String,
    /// Color, `#rrggbb`.
    pub color: String,
    /// Advertised addresses.
    pub addresses: Vec<String>,
    /// Advertised feature bits.
    pub features: Vec<u32>,
}

impl NodeEventRecord {
    /// Whether the announced content differs from a previous row.
    pub fn differs_from(&self, previous: &NodeEventRecord) -> bool {
        self.alias != previous.alias
            || self.color != previous.color
            || self.addresses != previous.addresses
            || self.features != previous.features
    }
}

/// Row of the `routing_policy` table: one direction of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicyRecord {
    /// When observed.
    pub time: DateTime<Utc>,
    /// Channel.
    pub channel_id: ChannelId,
    /// Node that announced the policy.
    pub announcing_node_id: NodeId,
    /// Node on the other end.
    pub connecting_node_id: NodeId,
    /// Managed node that observed it.
    pub node_id: NodeId,
    /// Policy values.
    pub policy: RoutingPolicy,
}

/// Row of the `node_connection_history` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConnectionHistoryRecord {
    /// When observed.
    pub time: DateTime<Utc>,
    /// Peer.
    pub event_node_id: NodeId,
    /// Managed node.
    pub node_id: NodeId,
    /// Online or offline.
    pub status: ConnectionStatus,
    /// Address the peer was reached at, when known.
    pub address: Option<String>,
}

/// Row of the `forward` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRecord {
    /// When the forward settled.
    pub time: DateTime<Utc>,
    /// Nanosecond timestamp reported by the daemon; part of the dedup key.
    pub time_ns: i64,
    /// Managed node.
    pub node_id: NodeId,
    /// Incoming channel, zero when unknown.
    pub incoming_channel_id: ChannelId,
    /// Outgoing channel, zero when unknown.
    pub outgoing_channel_id: ChannelId,
    /// Amount received in millisatoshis.
    pub incoming_amount_msat: i64,
    /// Amount sent in millisatoshis.
    pub outgoing_amount_msat: i64,
    /// Fee earned in millisatoshis.
    pub fee_msat: i64,
}

/// Flavour of an HTLC event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtlcEventKind {
    /// HTLC forwarded.
    Forward,
    /// Downstream failure of a forwarded HTLC.
    ForwardFail,
    /// Link-level failure.
    LinkFail,
    /// HTLC settled.
    Settle,
}

impl HtlcEventKind {
    /// Name stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::ForwardFail => "forward_fail",
            Self::LinkFail => "link_fail",
            Self::Settle => "settle",
        }
    }

    /// Parse a stored name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "forward" => Some(Self::Forward),
            "forward_fail" => Some(Self::ForwardFail),
            "link_fail" => Some(Self::LinkFail),
            "settle" => Some(Self::Settle),
            _ => None,
        }
    }
}

/// Row of the `htlc_event` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcEventRecord {
    /// When the event happened.
    pub time: DateTime<Utc>,
    /// Managed node.
    pub node_id: NodeId,
    /// Flavour.
    pub kind: HtlcEventKind,
    /// Direction reported by the daemon (send, receive, forward, unknown).
    pub event_origin: String,
    /// Incoming channel, zero when unknown.
    pub incoming_channel_id: ChannelId,
    /// Outgoing channel, zero when unknown.
    pub outgoing_channel_id: ChannelId,
    /// Incoming HTLC index.
    pub incoming_htlc_id: u64,
    /// Outgoing HTLC index.
    pub outgoing_htlc_id: u64,
    /// Incoming amount in millisatoshis.
    pub incoming_amount_msat: Option<i64>,
    /// Outgoing amount in millisatoshis.
    pub outgoing_amount_msat: Option<i64>,
    /// Incoming timelock.
    pub incoming_timelock: Option<u32>,
    /// Outgoing timelock.
    pub outgoing_timelock: Option<u32>,
    /// BOLT #4 wire failure code (link fail only).
    pub wire_failure: Option<i32>,
    /// Daemon failure detail (link fail only).
    pub failure_detail: Option<i32>,
    /// Human readable failure.
    pub failure_string: Option<String>,
}

/// State of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceState {
    /// Waiting for payment.
    Open,
    /// Paid.
    Settled,
    /// Cancelled or expired.
    Canceled,
    /// HTLCs held, not yet settled.
    Accepted,
}

/// One HTLC that paid (part of) an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHtlc {
    /// Channel the HTLC arrived on.
    pub channel_id: ChannelId,
    /// Amount in millisatoshis.
    pub amount_msat: i64,
}

/// Row of the `invoice` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Managed node.
    pub node_id: NodeId,
    /// Payment hash, hex.
    pub r_hash: String,
    /// Memo.
    pub memo: String,
    /// Requested amount in millisatoshis.
    pub value_msat: i64,
    /// Paid amount in millisatoshis.
    pub amount_paid_msat: i64,
    /// State.
    pub state: InvoiceState,
    /// Creation index.
    pub add_index: u64,
    /// Settle index, zero while unsettled.
    pub settle_index: u64,
    /// Creation time.
    pub creation_date: DateTime<Utc>,
    /// Settle time.
    pub settle_date: Option<DateTime<Utc>>,
    /// Paying HTLCs.
    pub htlcs: Vec<InvoiceHtlc>,
}

/// State of an outgoing payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Still trying.
    InFlight,
    /// Delivered.
    Succeeded,
    /// Given up.
    Failed,
}

/// Row of the `payment` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Managed node.
    pub node_id: NodeId,
    /// Payment hash, hex.
    pub payment_hash: String,
    /// Payment index; monotonic per node.
    pub payment_index: u64,
    /// Amount in millisatoshis.
    pub value_msat: i64,
    /// Fee in millisatoshis.
    pub fee_msat: i64,
    /// Status.
    pub status: PaymentStatus,
    /// Creation time.
    pub creation_date: DateTime<Utc>,
    /// First-hop channel of the successful route.
    pub outgoing_channel_id: Option<ChannelId>,
    /// Failure reason.
    pub failure_reason: Option<String>,
}

/// Row of the `tx` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Managed node.
    pub node_id: NodeId,
    /// Transaction id.
    pub tx_hash: String,
    /// Net amount in satoshis.
    pub amount: i64,
    /// Confirming block height, zero when unconfirmed.
    pub block_height: u32,
    /// Fees paid.
    pub total_fees: i64,
    /// Timestamp reported by the daemon.
    pub time: DateTime<Utc>,
    /// Label.
    pub label: String,
}

/// Channel balance change published to workflow triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBalanceEvent {
    /// Managed node.
    pub node_id: NodeId,
    /// Channel.
    pub channel_id: ChannelId,
    /// Remote node.
    pub remote_node_id: NodeId,
    /// Capacity in satoshis.
    pub capacity: i64,
    /// Local balance before the change.
    pub previous_local_balance: i64,
    /// Local balance after the change.
    pub local_balance: i64,
    /// Remote balance after the change.
    pub remote_balance: i64,
    /// When the change was observed.
    pub time: DateTime<Utc>,
}

/// Channel lifecycle change published to workflow triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLifecycleEvent {
    /// Managed node.
    pub node_id: NodeId,
    /// Channel.
    pub channel_id: ChannelId,
    /// Kind.
    pub event_type: ChannelEventType,
    /// Status after the change.
    pub status: ChannelStatus,
    /// When observed.
    pub time: DateTime<Utc>,
}

/// Peer online/offline change published to workflow triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConnectionEvent {
    /// Managed node.
    pub node_id: NodeId,
    /// Peer.
    pub peer_node_id: NodeId,
    /// New status.
    pub status: ConnectionStatus,
    /// When observed.
    pub time: DateTime<Utc>,
}

/// Tick of a time-based trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTriggerEvent {
    /// When the trigger fired.
    pub time: DateTime<Utc>,
}

/// Event carried in a scheduled trigger's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "event", rename_all = "snake_case")]
pub enum AutomationEvent {
    /// Balance change.
    ChannelBalance(ChannelBalanceEvent),
    /// Channel lifecycle change.
    Channel(ChannelLifecycleEvent),
    /// Forward settled.
    Forward(ForwardRecord),
    /// Invoice settled.
    Invoice(InvoiceRecord),
    /// Payment settled.
    Payment(PaymentRecord),
    /// Peer connection change.
    Peer(PeerConnectionEvent),
    /// Time trigger tick.
    Time(TimeTriggerEvent),
}

impl AutomationEvent {
    /// Dedup reference: the channel id for balance and channel events, zero otherwise.
    pub fn reference_id(&self) -> ChannelId {
        match self {
            Self::ChannelBalance(event) => event.channel_id,
            Self::Channel(event) => event.channel_id,
            _ => 0,
        }
    }

    /// Managed node the event came from, zero for time ticks.
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::ChannelBalance(event) => event.node_id,
            Self::Channel(event) => event.node_id,
            Self::Forward(event) => event.node_id,
            Self::Invoice(event) => event.node_id,
            Self::Payment(event) => event.node_id,
            Self::Peer(event) => event.node_id,
            Self::Time(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance_event(channel_id: ChannelId) -> AutomationEvent {
        AutomationEvent::ChannelBalance(ChannelBalanceEvent {
            node_id: 1,
            channel_id,
            remote_node_id: 2,
            capacity: 1_000_000,
            previous_local_balance: 0,
            local_balance: 10,
            remote_balance: 999_990,
            time: Utc::now(),
        })
    }

    #[test]
    fn test_reference_id() {
        assert_eq!(balance_event(42).reference_id(), 42);

        let channel = AutomationEvent::Channel(ChannelLifecycleEvent {
            node_id: 1,
            channel_id: 7,
            event_type: ChannelEventType::Open,
            status: ChannelStatus::Open,
            time: Utc::now(),
        });
        assert_eq!(channel.reference_id(), 7);

        let tick = AutomationEvent::Time(TimeTriggerEvent { time: Utc::now() });
        assert_eq!(tick.reference_id(), 0);
        assert_eq!(tick.node_id(), 0);
    }

    #[test]
    fn test_automation_event_serialization_is_tagged() {
        let json = serde_json::to_value(balance_event(3)).unwrap();
        assert_eq!(json["type"], "channel_balance");
        assert_eq!(json["event"]["channel_id"], 3);
        let back: AutomationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.reference_id(), 3);
    }

    #[test]
    fn test_node_event_change_detection() {
        let previous = NodeEventRecord {
            time: Utc::now(),
            event_node_id: 2,
            node_id: 1,
            alias: "bob".to_string(),
            color: "#ffffff".to_string(),
            addresses: vec!["1.2.3.4:9735".to_string()],
            features: vec![1, 5],
        };
        let mut same = previous.clone();
        same.time = Utc::now();
        assert!(!same.differs_from(&previous));

        let mut renamed = previous.clone();
        renamed.alias = "robert".to_string();
        assert!(renamed.differs_from(&previous));

        let mut moved = previous.clone();
        moved.addresses.push("onion:9735".to_string());
        assert!(moved.differs_from(&previous));
    }

    #[test]
    fn test_channel_event_type_codes() {
        for code in 0..6 {
            assert_eq!(ChannelEventType::from_code(code).unwrap().code(), code);
        }
        assert!(ChannelEventType::from_code(6).is_none());
    }
}
