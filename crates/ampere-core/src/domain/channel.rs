// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Channels, channel status, channel points and routing policies.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::short_channel_id::{packed_to_text, text_to_packed};
use super::{ChannelId, NodeId};

/// Lifecycle status of a channel.
///
/// Every status from [`ChannelStatus::CooperativeClosed`] upward is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelStatus {
    /// Funding transaction broadcast, not yet confirmed.
    Opening,
    /// Usable.
    Open,
    /// Closing transaction broadcast.
    Closing,
    /// Closed by mutual agreement.
    CooperativeClosed,
    /// Force closed by us.
    LocalForceClosed,
    /// Force closed by the peer.
    RemoteForceClosed,
    /// Peer broadcast a revoked state and was punished.
    BreachClosed,
    /// Funding never confirmed.
    FundingCancelledClosed,
    /// Abandoned locally.
    AbandonedClosed,
}

impl ChannelStatus {
    /// Integer code stored in the database.
    pub fn code(self) -> i32 {
        match self {
            Self::Opening => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::CooperativeClosed => 100,
            Self::LocalForceClosed => 101,
            Self::RemoteForceClosed => 102,
            Self::BreachClosed => 103,
            Self::FundingCancelledClosed => 104,
            Self::AbandonedClosed => 105,
        }
    }

    /// Decode a database code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Opening),
            1 => Some(Self::Open),
            2 => Some(Self::Closing),
            100 => Some(Self::CooperativeClosed),
            101 => Some(Self::LocalForceClosed),
            102 => Some(Self::RemoteForceClosed),
            103 => Some(Self::BreachClosed),
            104 => Some(Self::FundingCancelledClosed),
            105 => Some(Self::AbandonedClosed),
            _ => None,
        }
    }

    /// Whether the channel is closed for good.
    pub fn is_terminal(self) -> bool {
        self >= Self::CooperativeClosed
    }
}

/// How a channel was closed, as reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseType {
    /// Mutual close.
    CooperativeClose,
    /// Local force close.
    LocalForceClose,
    /// Remote force close.
    RemoteForceClose,
    /// Breach remedy.
    BreachClose,
    /// Funding transaction never confirmed.
    FundingCanceled,
    /// Abandoned.
    Abandoned,
}

impl From<CloseType> for ChannelStatus {
    fn from(close_type: CloseType) -> Self {
        match close_type {
            CloseType::CooperativeClose => ChannelStatus::CooperativeClosed,
            CloseType::LocalForceClose => ChannelStatus::LocalForceClosed,
            CloseType::RemoteForceClose => ChannelStatus::RemoteForceClosed,
            CloseType::BreachClose => ChannelStatus::BreachClosed,
            CloseType::FundingCanceled => ChannelStatus::FundingCancelledClosed,
            CloseType::Abandoned => ChannelStatus::AbandonedClosed,
        }
    }
}

/// Which side started an open or a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Initiator {
    /// Not reported.
    #[default]
    Unknown,
    /// The managed node.
    Local,
    /// The remote peer.
    Remote,
    /// Both sides (cooperative close started by both).
    Both,
}

/// Bit-mask of channel bookkeeping flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelFlags(pub u32);

impl ChannelFlags {
    /// The funding block height/time was resolved.
    pub const FUNDED_ON: u32 = 1;
    /// The closing block height/time was resolved.
    pub const CLOSED_ON: u32 = 1 << 1;
    /// The opening side was resolved.
    pub const OPENED_BY_KNOWN: u32 = 1 << 2;
    /// The closing side was resolved.
    pub const CLOSED_BY_KNOWN: u32 = 1 << 3;

    /// Whether a flag is set.
    pub fn has(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    /// Set a flag.
    pub fn set(&mut self, flag: u32) {
        self.0 |= flag;
    }
}

/// Channel point parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelPointError {
    /// Missing `:` separator.
    #[error("malformed channel point '{0}': expected <txid>:<vout>")]
    Malformed(String),
    /// Transaction id is not 32 hex encoded bytes.
    #[error("invalid funding transaction id in channel point '{0}'")]
    InvalidTxid(String),
    /// Output index is not a number.
    #[error("invalid output index in channel point '{0}'")]
    InvalidOutputIndex(String),
}

/// Funding outpoint `txid:vout`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelPoint {
    /// Hex encoded funding transaction id.
    pub txid: String,
    /// Funding output index.
    pub output_index: u32,
}

impl ChannelPoint {
    /// Build a channel point.
    pub fn new(txid: impl Into<String>, output_index: u32) -> Self {
        Self {
            txid: txid.into(),
            output_index,
        }
    }
}

impl fmt::Display for ChannelPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.output_index)
    }
}

impl FromStr for ChannelPoint {
    type Err = ChannelPointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, vout) = s
            .split_once(':')
            .ok_or_else(|| ChannelPointError::Malformed(s.to_string()))?;
        match hex::decode(txid) {
            Ok(bytes) if bytes.len() == 32 => {}
            _ => return Err(ChannelPointError::InvalidTxid(s.to_string())),
        }
        let output_index = vout
            .parse()
            .map_err(|_| ChannelPointError::InvalidOutputIndex(s.to_string()))?;
        Ok(Self::new(txid.to_ascii_lowercase(), output_index))
    }
}

/// A channel as stored in the database and the channel cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Surrogate id; zero until stored.
    pub channel_id: ChannelId,
    /// Textual short channel id.
    pub short_channel_id: Option<String>,
    /// Packed short channel id.
    pub lnd_short_channel_id: Option<u64>,
    /// Funding transaction id.
    pub funding_transaction_hash: String,
    /// Funding output index.
    pub funding_output_index: u32,
    /// Funding block height.
    pub funding_block_height: Option<u32>,
    /// Funding block time.
    pub funded_on: Option<DateTime<Utc>>,
    /// Capacity in satoshis.
    pub capacity: i64,
    /// Endpoint with the lexicographically smaller key, or the managed node.
    pub first_node_id: NodeId,
    /// The other endpoint.
    pub second_node_id: NodeId,
    /// Node that opened the channel.
    pub initiating_node_id: Option<NodeId>,
    /// Node that accepted the channel.
    pub accepting_node_id: Option<NodeId>,
    /// Node that closed the channel.
    pub closing_node_id: Option<NodeId>,
    /// Not announced to the graph.
    pub private: bool,
    /// Lifecycle status.
    pub status: ChannelStatus,
    /// Closing transaction id.
    pub closing_transaction_hash: Option<String>,
    /// Closing block height.
    pub closing_block_height: Option<u32>,
    /// Closing block time.
    pub closed_on: Option<DateTime<Utc>>,
    /// Bookkeeping flags.
    pub flags: ChannelFlags,
}

impl Channel {
    /// New unsaved channel between two nodes.
    pub fn new(
        channel_point: &ChannelPoint,
        capacity: i64,
        first_node_id: NodeId,
        second_node_id: NodeId,
        status: ChannelStatus,
    ) -> Self {
        Self {
            channel_id: 0,
            short_channel_id: None,
            lnd_short_channel_id: None,
            funding_transaction_hash: channel_point.txid.clone(),
            funding_output_index: channel_point.output_index,
            funding_block_height: None,
            funded_on: None,
            capacity,
            first_node_id,
            second_node_id,
            initiating_node_id: None,
            accepting_node_id: None,
            closing_node_id: None,
            private: false,
            status,
            closing_transaction_hash: None,
            closing_block_height: None,
            closed_on: None,
            flags: ChannelFlags::default(),
        }
    }

    /// Funding outpoint.
    pub fn channel_point(&self) -> ChannelPoint {
        ChannelPoint::new(
            self.funding_transaction_hash.clone(),
            self.funding_output_index,
        )
    }

    /// Whether the node is one of the endpoints.
    pub fn involves(&self, node_id: NodeId) -> bool {
        self.first_node_id == node_id || self.second_node_id == node_id
    }

    /// The endpoint that is not `node_id`.
    pub fn remote_node_id(&self, node_id: NodeId) -> NodeId {
        if self.first_node_id == node_id {
            self.second_node_id
        } else {
            self.first_node_id
        }
    }

    /// Set whichever short channel id form is missing from the other.
    ///
    /// A malformed textual id leaves the packed form empty.
    pub fn fill_short_channel_ids(&mut self) {
        let text = self
            .short_channel_id
            .as_deref()
            .filter(|scid| !scid.is_empty());
        let packed = self.lnd_short_channel_id.filter(|packed| *packed != 0);
        match (text, packed) {
            (Some(text), None) => {
                self.lnd_short_channel_id = text_to_packed(text).ok();
            }
            (None, Some(packed)) => {
                self.short_channel_id = Some(packed_to_text(packed));
            }
            _ => {}
        }
    }
}

/// One direction of a channel's advertised routing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoutingPolicy {
    /// Forwarding disabled.
    pub disabled: bool,
    /// Base fee in millisatoshis.
    pub fee_base_msat: i64,
    /// Proportional fee in parts per million.
    pub fee_rate_ppm: i64,
    /// Smallest forwardable HTLC in millisatoshis.
    pub min_htlc_msat: i64,
    /// Largest forwardable HTLC in millisatoshis.
    pub max_htlc_msat: i64,
    /// CLTV delta.
    pub time_lock_delta: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXID: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn test_terminal_statuses() {
        assert!(!ChannelStatus::Opening.is_terminal());
        assert!(!ChannelStatus::Open.is_terminal());
        assert!(!ChannelStatus::Closing.is_terminal());
        assert!(ChannelStatus::CooperativeClosed.is_terminal());
        assert!(ChannelStatus::AbandonedClosed.is_terminal());
    }

    #[test]
    fn test_status_codes_round_trip() {
        for code in [0, 1, 2, 100, 101, 102, 103, 104, 105] {
            let status = ChannelStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert!(ChannelStatus::from_code(3).is_none());
    }

    #[test]
    fn test_close_type_mapping() {
        assert_eq!(
            ChannelStatus::from(CloseType::CooperativeClose),
            ChannelStatus::CooperativeClosed
        );
        assert_eq!(
            ChannelStatus::from(CloseType::FundingCanceled),
            ChannelStatus::FundingCancelledClosed
        );
        assert_eq!(
            ChannelStatus::from(CloseType::BreachClose),
            ChannelStatus::BreachClosed
        );
    }

    #[test]
    fn test_channel_point_parse() {
        let point: ChannelPoint = format!("{}:1", TXID).parse().unwrap();
        assert_eq!(point.txid, TXID);
        assert_eq!(point.output_index, 1);
        assert_eq!(point.to_string(), format!("{}:1", TXID));

        assert!(matches!(
            TXID.parse::<ChannelPoint>(),
            Err(ChannelPointError::Malformed(_))
        ));
        assert!(matches!(
            "abcd:0".parse::<ChannelPoint>(),
            Err(ChannelPointError::InvalidTxid(_))
        ));
        assert!(matches!(
            format!("{}:x", TXID).parse::<ChannelPoint>(),
            Err(ChannelPointError::InvalidOutputIndex(_))
        ));
    }

    #[test]
    fn test_fill_short_channel_ids() {
        let point = ChannelPoint::new(TXID, 0);
        let mut channel = Channel::new(&point, 1_000_000, 1, 2, ChannelStatus::Open);
        channel.short_channel_id = Some("772125x1829x3".to_string());
        channel.fill_short_channel_ids();
        assert_eq!(channel.lnd_short_channel_id, Some(848_960_415_716_409_347));

        let mut channel = Channel::new(&point, 1_000_000, 1, 2, ChannelStatus::Open);
        channel.lnd_short_channel_id = Some(848_960_415_716_409_347);
        channel.fill_short_channel_ids();
        assert_eq!(channel.short_channel_id.as_deref(), Some("772125x1829x3"));

        let mut channel = Channel::new(&point, 1_000_000, 1, 2, ChannelStatus::Open);
        channel.short_channel_id = Some("garbage".to_string());
        channel.fill_short_channel_ids();
        assert_eq!(channel.lnd_short_channel_id, None);
    }

    #[test]
    fn test_remote_node_id() {
        let point = ChannelPoint::new(TXID, 0);
        let channel = Channel::new(&point, 10, 1, 2, ChannelStatus::Open);
        assert_eq!(channel.remote_node_id(1), 2);
        assert_eq!(channel.remote_node_id(2), 1);
        assert!(channel.involves(2));
        assert!(!channel.involves(3));
    }
}
