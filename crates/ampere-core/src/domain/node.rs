// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node identities, managed-node connection details and peer status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::NodeId;

/// Blockchain a node operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    /// Bitcoin.
    Bitcoin,
    /// Litecoin.
    Litecoin,
}

/// Network of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    /// Main network.
    MainNet,
    /// Public test network.
    TestNet,
    /// Local regression test network.
    RegTest,
    /// Signet.
    SigNet,
    /// btcd simulation network.
    SimNet,
}

impl Chain {
    /// Integer code stored in the database.
    pub fn code(self) -> i32 {
        match self {
            Self::Bitcoin => 0,
            Self::Litecoin => 1,
        }
    }

    /// Decode a database code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Bitcoin),
            1 => Some(Self::Litecoin),
            _ => None,
        }
    }

    /// Parse the chain name reported by the daemon's get-info.
    pub fn from_daemon_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bitcoin" => Some(Self::Bitcoin),
            "litecoin" => Some(Self::Litecoin),
            _ => None,
        }
    }
}

impl Network {
    /// Integer code stored in the database.
    pub fn code(self) -> i32 {
        match self {
            Self::MainNet => 0,
            Self::TestNet => 1,
            Self::RegTest => 2,
            Self::SigNet => 3,
            Self::SimNet => 4,
        }
    }

    /// Decode a database code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::MainNet),
            1 => Some(Self::TestNet),
            2 => Some(Self::RegTest),
            3 => Some(Self::SigNet),
            4 => Some(Self::SimNet),
            _ => None,
        }
    }

    /// Parse the network name reported by the daemon's get-info.
    pub fn from_daemon_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mainnet" | "bitcoin" => Some(Self::MainNet),
            "testnet" | "testnet3" => Some(Self::TestNet),
            "regtest" => Some(Self::RegTest),
            "signet" => Some(Self::SigNet),
            "simnet" => Some(Self::SimNet),
            _ => None,
        }
    }
}

/// Daemon implementation backing a managed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Implementation {
    /// Lightning Network Daemon.
    Lnd,
    /// Core Lightning.
    Cln,
}

impl Implementation {
    /// All supported implementations.
    pub const ALL: [Implementation; 2] = [Implementation::Lnd, Implementation::Cln];

    /// Integer code stored in the database.
    pub fn code(self) -> i32 {
        match self {
            Self::Lnd => 0,
            Self::Cln => 1,
        }
    }

    /// Decode a database code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Lnd),
            1 => Some(Self::Cln),
            _ => None,
        }
    }
}

impl fmt::Display for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lnd => write!(f, "LND"),
            Self::Cln => write!(f, "CLN"),
        }
    }
}

/// Composite index key for node lookups by public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    /// Chain.
    pub chain: Chain,
    /// Network.
    pub network: Network,
    /// Hex encoded 33-byte public key.
    pub public_key: String,
}

impl NodeKey {
    /// Build a key.
    pub fn new(chain: Chain, network: Network, public_key: impl Into<String>) -> Self {
        Self {
            chain,
            network,
            public_key: public_key.into(),
        }
    }
}

/// Link status of a node when seen as a channel peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelPeerStatus {
    /// At least one non-terminal channel exists.
    Active,
    /// All channels are closed.
    Inactive,
}

/// Cached node attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Surrogate id.
    pub node_id: NodeId,
    /// Chain.
    pub chain: Chain,
    /// Network.
    pub network: Network,
    /// Hex encoded public key.
    pub public_key: String,
    /// Operator-assigned name, only for managed nodes.
    pub name: Option<String>,
    /// Status when viewed as a channel peer.
    pub channel_status: Option<ChannelPeerStatus>,
}

impl NodeSettings {
    /// Index key of this node.
    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.chain, self.network, self.public_key.clone())
    }
}

/// Persisted node row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Surrogate id.
    pub node_id: NodeId,
    /// Hex encoded public key.
    pub public_key: String,
    /// Chain.
    pub chain: Chain,
    /// Network.
    pub network: Network,
    /// When the node was first stored.
    pub created_on: DateTime<Utc>,
}

/// Reachability of a peer as reported by peer events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Peer came online.
    Connected,
    /// Peer went offline.
    Disconnected,
}

impl ConnectionStatus {
    /// Integer code stored in the database.
    pub fn code(self) -> i32 {
        match self {
            Self::Connected => 1,
            Self::Disconnected => 0,
        }
    }

    /// Decode a database code.
    pub fn from_code(code: i32) -> Self {
        if code == 1 {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }
}

/// Per-node feature switches stored with the connection details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeCustomSettings(pub u32);

impl NodeCustomSettings {
    /// Persist failed payments too.
    pub const IMPORT_FAILED_PAYMENTS: u32 = 1;
    /// Run the HTLC event stream.
    pub const IMPORT_HTLC_EVENTS: u32 = 1 << 1;
    /// Run the peer event stream.
    pub const IMPORT_PEER_EVENTS: u32 = 1 << 2;
    /// Run the on-chain transaction stream.
    pub const IMPORT_TRANSACTIONS: u32 = 1 << 3;
    /// Run the payments poller.
    pub const IMPORT_PAYMENTS: u32 = 1 << 4;
    /// Run the invoice stream.
    pub const IMPORT_INVOICES: u32 = 1 << 5;
    /// Run the forwarding-history poller.
    pub const IMPORT_FORWARDS: u32 = 1 << 6;
    /// Import forwards older than the moment the node was added.
    pub const IMPORT_HISTORIC_FORWARDS: u32 = 1 << 7;

    /// Everything enabled.
    pub fn all() -> Self {
        Self((1 << 8) - 1)
    }

    /// Whether a flag is set.
    pub fn has(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    /// Return a copy with the flag set or cleared.
    pub fn with(self, flag: u32, enabled: bool) -> Self {
        if enabled {
            Self(self.0 | flag)
        } else {
            Self(self.0 & !flag)
        }
    }
}

/// Transport credentials of a managed node. Byte identity is the pool's reuse key.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct NodeCredentials {
    /// gRPC address, `host:port`.
    pub grpc_address: String,
    /// TLS certificate (LND).
    pub tls_certificate: Vec<u8>,
    /// Macaroon (LND).
    pub macaroon: Vec<u8>,
    /// Client certificate (CLN).
    pub certificate: Vec<u8>,
    /// Client key (CLN).
    pub key: Vec<u8>,
    /// Certificate authority (CLN).
    pub ca_certificate: Vec<u8>,
}

impl fmt::Debug for NodeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCredentials")
            .field("grpc_address", &self.grpc_address)
            .field("tls_certificate", &format_args!("{} bytes", self.tls_certificate.len()))
            .field("macaroon", &"<redacted>")
            .field("certificate", &format_args!("{} bytes", self.certificate.len()))
            .field("key", &"<redacted>")
            .field("ca_certificate", &format_args!("{} bytes", self.ca_certificate.len()))
            .finish()
    }
}

/// Everything needed to reach and supervise a managed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConnectionDetails {
    /// Surrogate id of the managed node.
    pub node_id: NodeId,
    /// Operator-assigned name.
    pub name: String,
    /// Daemon implementation.
    pub implementation: Implementation,
    /// Transport credentials.
    pub credentials: NodeCredentials,
    /// Feature switches.
    pub custom_settings: NodeCustomSettings,
    /// When the operator added the node; baseline for non-historic imports.
    pub created_on: DateTime<Utc>,
}
