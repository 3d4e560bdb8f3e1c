// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Short channel id lookup for channels the daemon reports without one.
//!
//! The funding transaction's block height and position inside the block are
//! fetched from a mempool.space-compatible REST API.

use std::time::Duration;

use ampere_core::domain::{ChannelPoint, Network, ShortChannelId};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Errors from the block resolver.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolverError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The explorer returned something unexpected.
    #[error("Unexpected explorer response: {0}")]
    InvalidResponse(String),
}

/// Resolves the packed short channel id of a funding outpoint.
#[async_trait]
pub trait ShortChannelIdResolver: Send + Sync {
    /// Packed short channel id, or None while the funding is unconfirmed or
    /// the network is not served.
    async fn resolve(
        &self,
        network: Network,
        channel_point: &ChannelPoint,
    ) -> Result<Option<u64>, ResolverError>;
}

/// Resolver that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResolver;

#[async_trait]
impl ShortChannelIdResolver for NoopResolver {
    async fn resolve(
        &self,
        _network: Network,
        _channel_point: &ChannelPoint,
    ) -> Result<Option<u64>, ResolverError> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct TxStatus {
    confirmed: bool,
    block_height: Option<u32>,
    block_hash: Option<String>,
}

/// Resolver backed by a mempool.space-compatible API.
#[derive(Debug, Clone)]
pub struct MempoolResolver {
    client: reqwest::Client,
    base_url: String,
    resolve_off_mainnet: bool,
}

impl MempoolResolver {
    /// Resolver for `base_url`, e.g. `https://mempool.space/api`.
    pub fn new(base_url: impl Into<String>, resolve_off_mainnet: bool) -> Result<Self, ResolverError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            resolve_off_mainnet,
        })
    }
}

#[async_trait]
impl ShortChannelIdResolver for MempoolResolver {
    async fn resolve(
        &self,
        network: Network,
        channel_point: &ChannelPoint,
    ) -> Result<Option<u64>, ResolverError> {
        if network != Network::MainNet && !self.resolve_off_mainnet {
            return Ok(None);
        }

        let status: TxStatus = self
            .client
            .get(format!("{}/tx/{}/status", self.base_url, channel_point.txid))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let (true, Some(block_height), Some(block_hash)) =
            (status.confirmed, status.block_height, status.block_hash)
        else {
            debug!(channel_point = %channel_point, "Funding transaction not confirmed yet");
            return Ok(None);
        };

        let txids: Vec<String> = self
            .client
            .get(format!("{}/block/{}/txids", self.base_url, block_hash))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let tx_index = txids
            .iter()
            .position(|txid| txid.eq_ignore_ascii_case(&channel_point.txid))
            .ok_or_else(|| {
                ResolverError::InvalidResponse(format!(
                    "{} missing from block {}",
                    channel_point.txid, block_hash
                ))
            })?;

        let output_index = u16::try_from(channel_point.output_index).map_err(|_| {
            ResolverError::InvalidResponse(format!("output index {} too large", channel_point.output_index))
        })?;
        let short_channel_id = u32::try_from(tx_index)
            .ok()
            .and_then(|tx_index| ShortChannelId::new(block_height, tx_index, output_index))
            .ok_or_else(|| {
                ResolverError::InvalidResponse(format!(
                    "position {tx_index} at height {block_height} out of range"
                ))
            })?;
        Ok(Some(short_channel_id.packed()))
    }
}
