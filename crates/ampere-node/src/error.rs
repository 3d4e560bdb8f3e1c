// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for ampere-node.

use std::time::Duration;

use ampere_core::domain::{ChannelId, NodeId};
use thiserror::Error;

use crate::client::ClientError;
use crate::resolver::ResolverError;

/// Node integration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Persistence or domain validation failed.
    #[error("Core error: {0}")]
    Core(#[from] ampere_core::CoreError),

    /// Daemon RPC failed.
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Block resolver failed.
    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    /// Daemon request exceeded its deadline.
    #[error("'{operation}' timed out after {after:?}")]
    Timeout {
        /// The request that timed out.
        operation: &'static str,
        /// Deadline.
        after: Duration,
    },

    /// The node has no stored connection details.
    #[error("No connection details for node {0}")]
    MissingConnectionDetails(NodeId),

    /// The node is not known to the caches.
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    /// The channel is not known to the caches.
    #[error("Unknown channel {0}")]
    UnknownChannel(ChannelId),

    /// Too many updates for the channel within the rate-limit window.
    #[error("Channel {channel_id} is rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Channel.
        channel_id: ChannelId,
        /// Until the oldest update leaves the window.
        retry_after: Duration,
    },

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The surrounding cancellation token fired.
    #[error("Cancelled")]
    Cancelled,
}

/// Result type using the node Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Run a daemon request with a deadline.
pub(crate) async fn with_timeout<T, E>(
    operation: &'static str,
    after: Duration,
    request: impl std::future::Future<Output = std::result::Result<T, E>>,
) -> Result<T>
where
    Error: From<E>,
{
    match tokio::time::timeout(after, request).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Timeout { operation, after }),
    }
}
