// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ampere Node - Lightning daemon integration
//!
//! This crate connects the state held by `ampere-core` to the daemons of the
//! managed nodes. It owns everything that talks to a daemon:
//!
//! - **Connection pool**: one transport per node, reused while its
//!   credentials stay byte-identical.
//! - **Stream workers**: one task per (implementation, node, service type)
//!   translating daemon streams and polls into stored rows, cache updates and
//!   automation events.
//! - **Importers**: one-shot catch-up of channels, pending channels, routing
//!   policies, node information and peer status.
//! - **Supervisor**: reconciles desired and current service state every tick.
//! - **Control verbs**: peer management, signing, and rate-limited channel
//!   status and routing policy updates.
//!
//! # Architecture
//!
//! ```text
//!  operator ──▶ registration / control / activate helpers
//!                      │ desired state
//!                      ▼
//!  ┌──────────────┐  tick  ┌──────────────────────────────┐
//!  │  Supervisor  │───────▶│ workers · maintenance ·      │
//!  └──────────────┘        │ trigger services             │
//!                          └──────────────────────────────┘
//!                                │ NodeClient (pooled)
//!                                ▼
//!                          LND / CLN daemons
//! ```
//!
//! The daemon RPC itself sits behind the [`client::Connector`] and
//! [`client::NodeClient`] traits; [`client::MockConnector`] is a complete
//! in-memory daemon for tests and demos.
//!
//! # Embedding
//!
//! See [`runtime::AmpereRuntime`].

#![deny(missing_docs)]

pub mod client;
pub mod context;
pub mod control;
pub mod error;
pub mod importers;
pub mod ingest;
pub mod maintenance;
pub mod pool;
pub mod registration;
pub mod resolver;
pub mod runtime;
pub mod supervisor;
pub mod workers;

#[cfg(test)]
pub(crate) mod testing;

pub use context::ServiceContext;
pub use error::{Error, Result};
pub use runtime::AmpereRuntime;
