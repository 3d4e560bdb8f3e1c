// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Daemon client trait definitions.
//!
//! Defines the abstract interface to an LND or CLN daemon and the messages it
//! produces. Fields a daemon does not report are left zero-valued.

use std::sync::Arc;

use ampere_core::domain::{
    Chain, ChannelPoint, CloseType, Implementation, Initiator, InvoiceState, Network,
    NodeCredentials, PaymentStatus, RoutingPolicy,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from daemon operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// Transport could not be opened or broke.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The daemon answered with an error status.
    #[error("Daemon error: {0}")]
    Status(String),

    /// The daemon does not support the request.
    #[error("Unsupported by {implementation}: {operation}")]
    Unsupported {
        /// Daemon implementation.
        implementation: Implementation,
        /// Request name.
        operation: &'static str,
    },

    /// A subscription ended.
    #[error("Stream closed")]
    StreamClosed,

    /// A response could not be mapped into the domain model.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Subscription of daemon messages.
pub type Subscription<T> = BoxStream<'static, Result<T>>;

/// Identity and sync state of a daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetInfo {
    /// Hex public key.
    pub public_key: String,
    /// Alias.
    pub alias: String,
    /// Chain.
    pub chain: Chain,
    /// Network.
    pub network: Network,
    /// Best block height.
    pub block_height: u32,
    /// Whether the chain backend is synced.
    pub synced_to_chain: bool,
    /// Daemon version.
    pub version: String,
}

/// A channel that just opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenChannelInfo {
    /// Funding outpoint.
    pub channel_point: ChannelPoint,
    /// Packed short channel id, zero when unknown.
    pub short_channel_id: u64,
    /// Peer public key.
    pub remote_public_key: String,
    /// Capacity in satoshis.
    pub capacity: i64,
    /// The managed node opened the channel.
    pub initiator: bool,
    /// Not announced.
    pub private: bool,
}

/// A channel that closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedChannelInfo {
    /// Funding outpoint.
    pub channel_point: ChannelPoint,
    /// Packed short channel id, zero when unknown.
    pub short_channel_id: u64,
    /// Peer public key.
    pub remote_public_key: String,
    /// Capacity in satoshis.
    pub capacity: i64,
    /// How it closed.
    pub close_type: CloseType,
    /// Side that opened the channel.
    pub open_initiator: Initiator,
    /// Side that closed the channel.
    pub close_initiator: Initiator,
    /// Closing transaction id.
    pub closing_tx_hash: String,
    /// Closing block height, zero while unconfirmed.
    pub close_height: u32,
    /// Balance settled back to us.
    pub settled_balance: i64,
}

/// Message of the channel event subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelEventUpdate {
    /// Channel opened.
    Open(OpenChannelInfo),
    /// Channel closed.
    Closed(ClosedChannelInfo),
    /// Link came up.
    Active(ChannelPoint),
    /// Link went down.
    Inactive(ChannelPoint),
    /// Funding transaction broadcast.
    PendingOpen(ChannelPoint),
    /// Every output of a closed channel resolved.
    FullyResolved(ChannelPoint),
}

/// A node announcement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeAnnouncement {
    /// Hex public key.
    pub public_key: String,
    /// Alias.
    pub alias: String,
    /// Color, `#rrggbb`.
    pub color: String,
    /// Addresses.
    pub addresses: Vec<String>,
    /// Feature bits.
    pub features: Vec<u32>,
}

/// A channel edge policy update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEdgeUpdate {
    /// Packed short channel id.
    pub short_channel_id: u64,
    /// Funding outpoint.
    pub channel_point: ChannelPoint,
    /// Capacity in satoshis.
    pub capacity: i64,
    /// Node that announced the policy, empty when not reported.
    pub advertising_node: String,
    /// The other endpoint, empty when not reported.
    pub connecting_node: String,
    /// Announced policy.
    pub policy: RoutingPolicy,
}

/// Message of the channel graph subscription.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GraphUpdate {
    /// Node announcements.
    pub node_updates: Vec<NodeAnnouncement>,
    /// Edge policy updates.
    pub channel_updates: Vec<ChannelEdgeUpdate>,
}

/// Flavour specific part of an HTLC event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtlcEventDetail {
    /// Forwarded.
    Forward {
        /// Incoming amount.
        incoming_amount_msat: i64,
        /// Outgoing amount.
        outgoing_amount_msat: i64,
        /// Incoming timelock.
        incoming_timelock: u32,
        /// Outgoing timelock.
        outgoing_timelock: u32,
    },
    /// Failed downstream.
    ForwardFail,
    /// Failed on our link.
    LinkFail {
        /// Incoming amount.
        incoming_amount_msat: i64,
        /// Outgoing amount.
        outgoing_amount_msat: i64,
        /// BOLT #4 wire failure code.
        wire_failure: i32,
        /// Daemon failure detail.
        failure_detail: i32,
        /// Human readable failure.
        failure_string: String,
    },
    /// Settled.
    Settle,
}

/// Message of the HTLC event subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcEvent {
    /// Packed incoming short channel id, zero when local.
    pub incoming_channel_id: u64,
    /// Packed outgoing short channel id, zero when local.
    pub outgoing_channel_id: u64,
    /// Incoming HTLC index.
    pub incoming_htlc_id: u64,
    /// Outgoing HTLC index.
    pub outgoing_htlc_id: u64,
    /// Nanosecond timestamp.
    pub timestamp_ns: i64,
    /// send, receive, forward or unknown.
    pub event_origin: String,
    /// Flavour.
    pub detail: HtlcEventDetail,
}

/// Message of the peer event subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEvent {
    /// Peer public key.
    pub public_key: String,
    /// Came online when true, went offline otherwise.
    pub online: bool,
}

/// A connected peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Peer public key.
    pub public_key: String,
    /// Network address.
    pub address: String,
}

/// Forwarding history query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardingHistoryRequest {
    /// Inclusive start.
    pub start_time: DateTime<Utc>,
    /// Exclusive end.
    pub end_time: DateTime<Utc>,
    /// Events to skip.
    pub index_offset: u32,
    /// Page size.
    pub max_events: u32,
}

/// One settled forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingEvent {
    /// Nanosecond timestamp.
    pub timestamp_ns: i64,
    /// Packed incoming short channel id.
    pub incoming_channel_id: u64,
    /// Packed outgoing short channel id.
    pub outgoing_channel_id: u64,
    /// Incoming amount.
    pub incoming_amount_msat: i64,
    /// Outgoing amount.
    pub outgoing_amount_msat: i64,
    /// Fee earned.
    pub fee_msat: i64,
}

/// A forwarding history page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ForwardingHistoryPage {
    /// Events in time order.
    pub events: Vec<ForwardingEvent>,
    /// Offset of the last returned event.
    pub last_offset_index: u32,
}

/// One HTLC paying an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHtlcInfo {
    /// Packed short channel id it arrived on.
    pub channel_id: u64,
    /// Amount.
    pub amount_msat: i64,
}

/// Message of the invoice subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Payment hash, hex.
    pub r_hash: String,
    /// Memo.
    pub memo: String,
    /// Requested amount.
    pub value_msat: i64,
    /// Paid amount.
    pub amount_paid_msat: i64,
    /// State.
    pub state: InvoiceState,
    /// Creation index.
    pub add_index: u64,
    /// Settle index.
    pub settle_index: u64,
    /// Creation time.
    pub creation_date: DateTime<Utc>,
    /// Settle time.
    pub settle_date: Option<DateTime<Utc>>,
    /// Paying HTLCs.
    pub htlcs: Vec<InvoiceHtlcInfo>,
}

/// An outgoing payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment hash, hex.
    pub payment_hash: String,
    /// Payment index.
    pub payment_index: u64,
    /// Amount.
    pub value_msat: i64,
    /// Fee.
    pub fee_msat: i64,
    /// Status.
    pub status: PaymentStatus,
    /// Creation time.
    pub creation_date: DateTime<Utc>,
    /// Packed short channel id of the first hop of the successful route.
    pub first_hop_channel_id: Option<u64>,
    /// Failure reason.
    pub failure_reason: Option<String>,
}

/// A payments page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaymentsPage {
    /// Payments in index order.
    pub payments: Vec<Payment>,
    /// Index of the last returned payment.
    pub last_index_offset: u64,
}

/// An on-chain wallet transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction id.
    pub tx_hash: String,
    /// Net amount.
    pub amount: i64,
    /// Confirming block height, zero when unconfirmed.
    pub block_height: u32,
    /// Fees paid.
    pub total_fees: i64,
    /// Timestamp.
    pub time: DateTime<Utc>,
    /// Label.
    pub label: String,
}

/// HTLC in flight on an open channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHtlc {
    /// Incoming when true.
    pub incoming: bool,
    /// Amount in satoshis.
    pub amount: i64,
    /// Payment hash, hex.
    pub hash_lock: String,
    /// Expiry height.
    pub expiration_height: u32,
    /// Packed short channel id it is forwarded to or from.
    pub forwarding_channel: u64,
}

/// An open channel as listed by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Funding outpoint.
    pub channel_point: ChannelPoint,
    /// Packed short channel id.
    pub short_channel_id: u64,
    /// Peer public key.
    pub remote_public_key: String,
    /// Capacity.
    pub capacity: i64,
    /// Local balance.
    pub local_balance: i64,
    /// Remote balance.
    pub remote_balance: i64,
    /// Local reserve.
    pub local_channel_reserve: i64,
    /// Remote reserve.
    pub remote_channel_reserve: i64,
    /// Local dust limit.
    pub local_dust_limit: i64,
    /// Remote dust limit.
    pub remote_dust_limit: i64,
    /// Commitment fee.
    pub commit_fee: i64,
    /// Link active.
    pub active: bool,
    /// Not announced.
    pub private: bool,
    /// The managed node opened it.
    pub initiator: bool,
    /// HTLCs in flight.
    pub pending_htlcs: Vec<ChannelHtlc>,
    /// Unsettled balance.
    pub unsettled_balance: i64,
    /// Lifetime sent.
    pub total_satoshis_sent: i64,
    /// Lifetime received.
    pub total_satoshis_received: i64,
    /// Commitment updates.
    pub num_updates: u64,
    /// Commitment weight.
    pub commit_weight: i64,
    /// Fee rate per kiloweight.
    pub fee_per_kw: i64,
}

/// A channel that is opening or closing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChannel {
    /// Funding outpoint.
    pub channel_point: ChannelPoint,
    /// Peer public key.
    pub remote_public_key: String,
    /// Capacity.
    pub capacity: i64,
    /// Side that opened it.
    pub initiator: Initiator,
    /// Closing transaction, for closing channels.
    pub closing_tx_hash: Option<String>,
}

/// The three pending lists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PendingChannels {
    /// Funding broadcast, not confirmed.
    pub pending_open: Vec<PendingChannel>,
    /// Cooperative close broadcast.
    pub waiting_close: Vec<PendingChannel>,
    /// Force close broadcast.
    pub pending_force_close: Vec<PendingChannel>,
}

/// Graph view of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChanInfo {
    /// Packed short channel id.
    pub short_channel_id: u64,
    /// Funding outpoint.
    pub channel_point: ChannelPoint,
    /// Capacity.
    pub capacity: i64,
    /// First endpoint.
    pub node1_public_key: String,
    /// Second endpoint.
    pub node2_public_key: String,
    /// Policy announced by the first endpoint.
    pub node1_policy: Option<RoutingPolicy>,
    /// Policy announced by the second endpoint.
    pub node2_policy: Option<RoutingPolicy>,
}

/// Graph view of one node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Latest announcement.
    pub announcement: NodeAnnouncement,
    /// Public channels.
    pub num_channels: u32,
    /// Public capacity.
    pub total_capacity: i64,
}

/// On-chain wallet balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WalletBalance {
    /// Total.
    pub total_balance: i64,
    /// Confirmed.
    pub confirmed_balance: i64,
    /// Unconfirmed.
    pub unconfirmed_balance: i64,
    /// Locked by leases.
    pub locked_balance: i64,
}

/// Routing policy update for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    /// Funding outpoint.
    pub channel_point: ChannelPoint,
    /// Base fee.
    pub fee_base_msat: i64,
    /// Proportional fee.
    pub fee_rate_ppm: i64,
    /// CLTV delta.
    pub time_lock_delta: u32,
    /// Minimum HTLC, unchanged when absent.
    pub min_htlc_msat: Option<i64>,
    /// Maximum HTLC, unchanged when absent.
    pub max_htlc_msat: Option<i64>,
}

/// Result of a signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    /// Signature valid.
    pub valid: bool,
    /// Public key that signed.
    pub public_key: String,
}

/// Requests and subscriptions of one daemon connection.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Daemon implementation.
    fn implementation(&self) -> Implementation;

    /// Identity and sync state.
    async fn get_info(&self) -> Result<GetInfo>;

    /// Channel lifecycle events.
    async fn subscribe_channel_events(&self) -> Result<Subscription<ChannelEventUpdate>>;

    /// Channel graph updates.
    async fn subscribe_channel_graph(&self) -> Result<Subscription<GraphUpdate>>;

    /// HTLC events.
    async fn subscribe_htlc_events(&self) -> Result<Subscription<HtlcEvent>>;

    /// Peer online/offline events.
    async fn subscribe_peer_events(&self) -> Result<Subscription<PeerEvent>>;

    /// Invoice updates after the given indexes.
    async fn subscribe_invoices(
        &self,
        add_index: u64,
        settle_index: u64,
    ) -> Result<Subscription<Invoice>>;

    /// Wallet transactions.
    async fn subscribe_transactions(&self) -> Result<Subscription<Transaction>>;

    /// One page of forwarding history.
    async fn forwarding_history(
        &self,
        request: ForwardingHistoryRequest,
    ) -> Result<ForwardingHistoryPage>;

    /// One page of payments after `index_offset`.
    async fn list_payments(&self, index_offset: u64, max_payments: u64) -> Result<PaymentsPage>;

    /// Wallet transactions from a block height on.
    async fn get_transactions(&self, start_height: u32) -> Result<Vec<Transaction>>;

    /// Open channels.
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>>;

    /// Opening and closing channels.
    async fn pending_channels(&self) -> Result<PendingChannels>;

    /// Closed channels.
    async fn closed_channels(&self) -> Result<Vec<ClosedChannelInfo>>;

    /// Graph view of a channel.
    async fn get_chan_info(&self, short_channel_id: u64) -> Result<ChanInfo>;

    /// Graph view of a node.
    async fn get_node_info(&self, public_key: &str) -> Result<NodeInfo>;

    /// Connected peers.
    async fn list_peers(&self) -> Result<Vec<Peer>>;

    /// Connect to a peer at `host`.
    async fn connect_peer(&self, public_key: &str, host: &str) -> Result<()>;

    /// Disconnect a peer.
    async fn disconnect_peer(&self, public_key: &str) -> Result<()>;

    /// Sign a message with the node key.
    async fn sign_message(&self, message: &[u8]) -> Result<String>;

    /// Verify a message signature.
    async fn verify_message(&self, message: &[u8], signature: &str) -> Result<VerifyResult>;

    /// Enable or disable forwarding over a channel.
    async fn update_channel_status(&self, channel_point: &ChannelPoint, enable: bool) -> Result<()>;

    /// Change the routing policy of a channel.
    async fn update_channel_policy(&self, update: &PolicyUpdate) -> Result<()>;

    /// On-chain wallet balance.
    async fn wallet_balance(&self) -> Result<WalletBalance>;

    /// Release the transport.
    async fn close(&self);
}

/// Opens daemon connections from stored credentials.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport.
    async fn connect(
        &self,
        implementation: Implementation,
        credentials: &NodeCredentials,
    ) -> Result<Arc<dyn NodeClient>>;
}
