// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operator verbs against a managed node's daemon.
//!
//! Every verb runs with a deadline. Channel status and routing policy updates
//! are additionally rate limited per channel; a rejected update is reported
//! as an Inactive [`ControlResponse`] and never retried here.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use ampere_core::domain::{ChannelId, NodeId, RoutingPolicy, ServiceStatus};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::client::{GetInfo, PolicyUpdate, VerifyResult, WalletBalance};
use crate::context::ServiceContext;
use crate::error::{Error, Result, with_timeout};

/// Outcome of a rate-limited update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    /// Active when applied, Inactive when rejected.
    pub status: ServiceStatus,
    /// Why the update was rejected.
    pub message: Option<String>,
}

impl ControlResponse {
    fn applied() -> Self {
        Self {
            status: ServiceStatus::Active,
            message: None,
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            status: ServiceStatus::Inactive,
            message: Some(message.into()),
        }
    }
}

/// Requested routing policy change. Absent fields keep the current local policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingPolicyChange {
    /// Managed node.
    pub node_id: NodeId,
    /// Channel.
    pub channel_id: ChannelId,
    /// Base fee.
    pub fee_base_msat: Option<i64>,
    /// Proportional fee.
    pub fee_rate_ppm: Option<i64>,
    /// CLTV delta.
    pub time_lock_delta: Option<u32>,
    /// Minimum HTLC.
    pub min_htlc_msat: Option<i64>,
    /// Maximum HTLC.
    pub max_htlc_msat: Option<i64>,
}

/// Updates allowed per channel within a window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    /// Updates per window.
    pub max_updates: usize,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_updates: 2,
            window: Duration::from_secs(10 * 60),
        }
    }
}

/// Sliding-window limiter keyed by channel.
struct ChannelRateLimiter {
    limit: RateLimit,
    updates: Mutex<HashMap<ChannelId, VecDeque<Instant>>>,
}

impl ChannelRateLimiter {
    fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            updates: Mutex::new(HashMap::new()),
        }
    }

    /// Record an update for `channel_id`, or return how long to wait.
    async fn acquire(&self, channel_id: ChannelId) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        let mut updates = self.updates.lock().await;
        let recent = updates.entry(channel_id).or_default();
        while let Some(&oldest) = recent.front() {
            if now.duration_since(oldest) >= self.limit.window {
                recent.pop_front();
            } else {
                break;
            }
        }
        if recent.len() >= self.limit.max_updates {
            let retry_after = recent
                .front()
                .map(|oldest| self.limit.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or_default();
            return Err(retry_after);
        }
        recent.push_back(now);
        Ok(())
    }
}

/// Control verbs over the shared context.
pub struct NodeControl {
    ctx: ServiceContext,
    limiter: ChannelRateLimiter,
}

impl NodeControl {
    /// Control verbs with the default rate limit.
    pub fn new(ctx: ServiceContext) -> Self {
        Self::with_rate_limit(ctx, RateLimit::default())
    }

    /// Control verbs with a custom rate limit.
    pub fn with_rate_limit(ctx: ServiceContext, limit: RateLimit) -> Self {
        Self {
            ctx,
            limiter: ChannelRateLimiter::new(limit),
        }
    }

    /// Identity and sync state of the daemon.
    pub async fn get_info(&self, node_id: NodeId) -> Result<GetInfo> {
        let client = self.ctx.client(node_id).await?;
        with_timeout("get_info", self.ctx.timeouts.quick, client.get_info()).await
    }

    /// On-chain wallet balance.
    pub async fn wallet_balance(&self, node_id: NodeId) -> Result<WalletBalance> {
        let client = self.ctx.client(node_id).await?;
        with_timeout("wallet_balance", self.ctx.timeouts.quick, client.wallet_balance()).await
    }

    /// Connect to a peer at `host`.
    pub async fn connect_peer(&self, node_id: NodeId, public_key: &str, host: &str) -> Result<()> {
        if public_key.is_empty() || host.is_empty() {
            return Err(Error::InvalidRequest("public key and host are required".to_string()));
        }
        let client = self.ctx.client(node_id).await?;
        with_timeout(
            "connect_peer",
            self.ctx.timeouts.disconnect,
            client.connect_peer(public_key, host),
        )
        .await?;
        info!(node_id, public_key, host, "Peer connect requested");
        Ok(())
    }

    /// Disconnect a peer.
    pub async fn disconnect_peer(&self, node_id: NodeId, public_key: &str) -> Result<()> {
        if public_key.is_empty() {
            return Err(Error::InvalidRequest("public key is required".to_string()));
        }
        let client = self.ctx.client(node_id).await?;
        with_timeout(
            "disconnect_peer",
            self.ctx.timeouts.disconnect,
            client.disconnect_peer(public_key),
        )
        .await?;
        info!(node_id, public_key, "Peer disconnect requested");
        Ok(())
    }

    /// Sign `message` with the node key.
    pub async fn sign_message(&self, node_id: NodeId, message: &[u8]) -> Result<String> {
        let client = self.ctx.client(node_id).await?;
        with_timeout("sign_message", self.ctx.timeouts.quick, client.sign_message(message)).await
    }

    /// Verify a signature over `message`.
    pub async fn verify_message(
        &self,
        node_id: NodeId,
        message: &[u8],
        signature: &str,
    ) -> Result<VerifyResult> {
        let client = self.ctx.client(node_id).await?;
        with_timeout(
            "verify_message",
            self.ctx.timeouts.quick,
            client.verify_message(message, signature),
        )
        .await
    }

    /// Enable or disable forwarding over a channel.
    pub async fn update_channel_status(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        enable: bool,
    ) -> Result<ControlResponse> {
        let channel = self.open_channel_of(node_id, channel_id).await?;
        if let Err(retry_after) = self.limiter.acquire(channel_id).await {
            let e = Error::RateLimited {
                channel_id,
                retry_after,
            };
            warn!(node_id, channel_id, error = %e, "Channel status update rejected");
            return Ok(ControlResponse::rejected(e.to_string()));
        }

        let client = self.ctx.client(node_id).await?;
        with_timeout(
            "update_channel_status",
            self.ctx.timeouts.quick,
            client.update_channel_status(&channel.channel_point(), enable),
        )
        .await?;

        let mut policy = self.local_policy(node_id, channel_id).await;
        policy.disabled = !enable;
        self.ctx
            .caches
            .channel_states
            .set_routing_policy(node_id, channel_id, true, policy)
            .await;
        info!(node_id, channel_id, enable, "Channel status updated");
        Ok(ControlResponse::applied())
    }

    /// Change the local routing policy of a channel.
    pub async fn update_routing_policy(&self, change: RoutingPolicyChange) -> Result<ControlResponse> {
        let RoutingPolicyChange {
            node_id,
            channel_id,
            ..
        } = change;
        let channel = self.open_channel_of(node_id, channel_id).await?;
        if let Err(retry_after) = self.limiter.acquire(channel_id).await {
            let e = Error::RateLimited {
                channel_id,
                retry_after,
            };
            warn!(node_id, channel_id, error = %e, "Routing policy update rejected");
            return Ok(ControlResponse::rejected(e.to_string()));
        }

        let current = self.local_policy(node_id, channel_id).await;
        let update = PolicyUpdate {
            channel_point: channel.channel_point(),
            fee_base_msat: change.fee_base_msat.unwrap_or(current.fee_base_msat),
            fee_rate_ppm: change.fee_rate_ppm.unwrap_or(current.fee_rate_ppm),
            time_lock_delta: change.time_lock_delta.unwrap_or(current.time_lock_delta),
            min_htlc_msat: change.min_htlc_msat,
            max_htlc_msat: change.max_htlc_msat,
        };
        let client = self.ctx.client(node_id).await?;
        with_timeout(
            "update_channel_policy",
            self.ctx.timeouts.quick,
            client.update_channel_policy(&update),
        )
        .await?;

        let policy = RoutingPolicy {
            disabled: current.disabled,
            fee_base_msat: update.fee_base_msat,
            fee_rate_ppm: update.fee_rate_ppm,
            min_htlc_msat: update.min_htlc_msat.unwrap_or(current.min_htlc_msat),
            max_htlc_msat: update.max_htlc_msat.unwrap_or(current.max_htlc_msat),
            time_lock_delta: update.time_lock_delta,
        };
        self.ctx
            .caches
            .channel_states
            .set_routing_policy(node_id, channel_id, true, policy)
            .await;
        info!(
            node_id,
            channel_id,
            fee_base_msat = policy.fee_base_msat,
            fee_rate_ppm = policy.fee_rate_ppm,
            "Routing policy updated"
        );
        Ok(ControlResponse::applied())
    }

    async fn open_channel_of(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
    ) -> Result<ampere_core::domain::Channel> {
        let channel = self
            .ctx
            .caches
            .channels
            .get_channel_settings(channel_id)
            .await
            .ok_or(Error::UnknownChannel(channel_id))?;
        if !channel.involves(node_id) {
            return Err(Error::InvalidRequest(format!(
                "channel {} does not belong to node {}",
                channel_id, node_id
            )));
        }
        if channel.status.is_terminal() {
            return Err(Error::InvalidRequest(format!(
                "channel {} is closed",
                channel_id
            )));
        }
        Ok(channel)
    }

    async fn local_policy(&self, node_id: NodeId, channel_id: ChannelId) -> RoutingPolicy {
        self.ctx
            .caches
            .channel_states
            .get_state(node_id, channel_id)
            .await
            .map(|snapshot| snapshot.local_routing_policy)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_window() {
        tokio::time::pause();
        let limiter = ChannelRateLimiter::new(RateLimit::default());

        assert!(limiter.acquire(5).await.is_ok());
        assert!(limiter.acquire(5).await.is_ok());
        let retry_after = limiter.acquire(5).await.unwrap_err();
        assert_eq!(retry_after, Duration::from_secs(600));

        // Other channels have their own window.
        assert!(limiter.acquire(6).await.is_ok());

        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(limiter.acquire(5).await.is_ok());
    }
}
