// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain model shared by every subsystem.
//!
//! Long-lived entities carry small integer surrogate ids. External identifiers
//! (public keys, channel points, short channel ids) travel alongside them.

pub mod channel;
pub mod events;
pub mod node;
pub mod services;
pub mod short_channel_id;
pub mod triggers;

/// Surrogate id of a node.
pub type NodeId = i32;
/// Surrogate id of a channel.
pub type ChannelId = i32;
/// Surrogate id of a tag.
pub type TagId = i32;
/// Surrogate id of a workflow version.
pub type WorkflowVersionId = i32;
/// Surrogate id of a node inside a workflow version.
pub type WorkflowVersionNodeId = i32;

pub use channel::{
    Channel, ChannelFlags, ChannelPoint, ChannelPointError, ChannelStatus, CloseType, Initiator,
    RoutingPolicy,
};
pub use events::{
    AutomationEvent, ChannelBalanceEvent, ChannelEventRecord, ChannelEventType,
    ChannelLifecycleEvent, ForwardRecord, HtlcEventKind, HtlcEventRecord, InvoiceHtlc,
    InvoiceRecord, InvoiceState, NodeConnectionHistoryRecord, NodeEventRecord,
    PaymentRecord, PaymentStatus, PeerConnectionEvent, RoutingPolicyRecord, TimeTriggerEvent,
    TransactionRecord,
};
pub use node::{
    Chain, ChannelPeerStatus, ConnectionStatus, Implementation, Network, Node,
    NodeConnectionDetails, NodeCredentials, NodeCustomSettings, NodeKey, NodeSettings,
};
pub use services::{
    CoreServiceType, ImportType, NodeServiceKey, NodeServiceType, ServiceState, ServiceStatus,
    StateWorld,
};
pub use short_channel_id::{ShortChannelId, ShortChannelIdError};
pub use triggers::{
    ScheduledTrigger, TimeSchedule, TriggerDefinition, TriggerState, WorkflowNodeType,
};
