// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Supervised service types, statuses and import kinds.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::NodeId;
use super::node::{Implementation, NodeCustomSettings};

/// Status of a supervised unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ServiceStatus {
    /// Not running.
    #[default]
    Inactive,
    /// Running and ready.
    Active,
    /// Start requested, cancel handle acquired.
    Pending,
    /// Started, bootstrapping.
    Initializing,
    /// Removed.
    Deleted,
    /// Archived.
    Archived,
    /// Gave up waiting.
    TimedOut,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Initializing => "initializing",
            Self::Deleted => "deleted",
            Self::Archived => "archived",
            Self::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// Services that are not bound to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CoreServiceType {
    /// The supervisor itself.
    Root,
    /// Periodic housekeeping imports.
    Maintenance,
    /// Interval-based workflow triggers.
    AutomationIntervalTrigger,
    /// Cron-based workflow triggers.
    AutomationCronTrigger,
    /// Scheduled-trigger queue consumer.
    AutomationEventTrigger,
    /// Outbound notifications (provided by the embedder).
    Notifier,
}

impl CoreServiceType {
    /// All core service types.
    pub const ALL: [CoreServiceType; 6] = [
        CoreServiceType::Root,
        CoreServiceType::Maintenance,
        CoreServiceType::AutomationIntervalTrigger,
        CoreServiceType::AutomationCronTrigger,
        CoreServiceType::AutomationEventTrigger,
        CoreServiceType::Notifier,
    ];
}

/// Services bound to a managed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeServiceType {
    /// Channel open/close/activity stream.
    ChannelEventStream,
    /// Channel graph stream.
    GraphEventStream,
    /// HTLC event stream.
    HtlcEventStream,
    /// Peer online/offline stream.
    PeerEventStream,
    /// Forwarding-history poller.
    ForwardsStream,
    /// Invoice stream.
    InvoiceStream,
    /// Payments poller.
    PaymentStream,
    /// On-chain transaction stream.
    TransactionStream,
    /// Channel balance snapshot maintenance.
    ChannelBalanceCacheStream,
}

impl NodeServiceType {
    /// All node service types.
    pub const ALL: [NodeServiceType; 9] = [
        NodeServiceType::ChannelEventStream,
        NodeServiceType::GraphEventStream,
        NodeServiceType::HtlcEventStream,
        NodeServiceType::PeerEventStream,
        NodeServiceType::ForwardsStream,
        NodeServiceType::InvoiceStream,
        NodeServiceType::PaymentStream,
        NodeServiceType::TransactionStream,
        NodeServiceType::ChannelBalanceCacheStream,
    ];

    /// Service types a daemon implementation can run.
    pub fn for_implementation(implementation: Implementation) -> &'static [NodeServiceType] {
        match implementation {
            Implementation::Lnd => &Self::ALL,
            Implementation::Cln => &[
                NodeServiceType::ChannelEventStream,
                NodeServiceType::GraphEventStream,
                NodeServiceType::PeerEventStream,
                NodeServiceType::ForwardsStream,
                NodeServiceType::InvoiceStream,
                NodeServiceType::PaymentStream,
                NodeServiceType::ChannelBalanceCacheStream,
            ],
        }
    }

    /// Service types whose activity the channel-balance cache depends on.
    pub fn channel_balance_cache_dependencies(
        implementation: Implementation,
    ) -> &'static [NodeServiceType] {
        match implementation {
            Implementation::Lnd => &[
                NodeServiceType::ChannelEventStream,
                NodeServiceType::PeerEventStream,
                NodeServiceType::ForwardsStream,
                NodeServiceType::InvoiceStream,
                NodeServiceType::PaymentStream,
            ],
            Implementation::Cln => &[
                NodeServiceType::ChannelEventStream,
                NodeServiceType::PeerEventStream,
                NodeServiceType::ForwardsStream,
            ],
        }
    }

    /// Whether the node's custom settings allow this service to run.
    pub fn enabled_by(self, settings: NodeCustomSettings) -> bool {
        match self {
            Self::HtlcEventStream => settings.has(NodeCustomSettings::IMPORT_HTLC_EVENTS),
            Self::PeerEventStream => settings.has(NodeCustomSettings::IMPORT_PEER_EVENTS),
            Self::TransactionStream => settings.has(NodeCustomSettings::IMPORT_TRANSACTIONS),
            Self::PaymentStream => settings.has(NodeCustomSettings::IMPORT_PAYMENTS),
            Self::InvoiceStream => settings.has(NodeCustomSettings::IMPORT_INVOICES),
            Self::ForwardsStream => settings.has(NodeCustomSettings::IMPORT_FORWARDS),
            Self::ChannelEventStream | Self::GraphEventStream | Self::ChannelBalanceCacheStream => {
                true
            }
        }
    }
}

/// Identity of a node-bound service unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeServiceKey {
    /// Daemon implementation.
    pub implementation: Implementation,
    /// Managed node.
    pub node_id: NodeId,
    /// Service type.
    pub service_type: NodeServiceType,
}

impl NodeServiceKey {
    /// Build a key.
    pub fn new(
        implementation: Implementation,
        node_id: NodeId,
        service_type: NodeServiceType,
    ) -> Self {
        Self {
            implementation,
            node_id,
            service_type,
        }
    }
}

/// Which of the two service-state worlds an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateWorld {
    /// What the operator asked for.
    Desired,
    /// What workers have achieved.
    Current,
}

/// Observable state of a supervised unit. The cancel handle stays inside the services cache.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceState {
    /// Status.
    pub status: ServiceStatus,
    /// Last move into Active.
    pub active_time: Option<DateTime<Utc>>,
    /// Last move into Pending.
    pub pending_time: Option<DateTime<Utc>>,
    /// Last move into (or refresh of) Initializing.
    pub initialization_time: Option<DateTime<Utc>>,
    /// Last move into Inactive.
    pub inactivation_time: Option<DateTime<Utc>>,
    /// Last failure.
    pub failure_time: Option<DateTime<Utc>>,
}

/// One-shot import kinds guarded by the skip window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportType {
    /// Open and closed channels.
    AllChannels,
    /// Waiting-close, pending-open and pending-force-close channels.
    PendingChannels,
    /// Routing policies of every open channel.
    ChannelRoutingPolicies,
    /// Node announcements of every channel peer.
    NodeInformation,
    /// Connected peers.
    PeerStatus,
}
