// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ampere Core - Lightning node management state
//!
//! This crate holds everything about a fleet of managed Lightning nodes that
//! does not talk to a daemon: the domain model, the persistence façade, the
//! in-memory cache actors and the workflow trigger scheduler.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            ampere-node                                   │
//! │     (Connection pool, stream workers, importers, service supervisor)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!            │ write-through                        │ publish events
//!            ▼                                      ▼
//! ┌───────────────────────┐   ┌───────────────────────────────────────────┐
//! │     persistence       │   │                 cache                     │
//! │  Persistence trait    │   │  channels · nodes · tags · services       │
//! │  PostgreSQL / SQLite  │   │  triggers · channel_states (actors)       │
//! └───────────────────────┘   └───────────────────────────────────────────┘
//!                                                   │ scheduled triggers
//!                                                   ▼
//!                             ┌───────────────────────────────────────────┐
//!                             │               scheduler                   │
//!                             │  event consumer · interval · cron         │
//!                             └───────────────────────────────────────────┘
//! ```
//!
//! # Cache actors
//!
//! | Actor | Owns |
//! |-------|------|
//! | [`ChannelCache`](cache::ChannelCache) | Channel settings, short-id and funding-point indexes |
//! | [`NodeCache`](cache::NodeCache) | Managed nodes, channel peers, connected peers |
//! | [`TagCache`](cache::TagCache) | Node and channel tag bindings |
//! | [`ServiceCache`](cache::ServiceCache) | Desired/current service state, import times, connection details |
//! | [`TriggerCache`](cache::TriggerCache) | Trigger state, definitions, scheduled-trigger queue |
//! | [`ChannelStateCache`](cache::ChannelStateCache) | Balance and policy snapshots |
//!
//! Writes are ordered per actor. A typical event is stored first, then
//! cached, then published, so trigger consumers can rely on the stored row.
//!
//! # Configuration
//!
//! See [`config::Config::from_env`] for the environment variables.

#![deny(missing_docs)]

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod migrations;
pub mod persistence;
pub mod scheduler;

pub use cache::Caches;
pub use config::Config;
pub use error::{CoreError, Result};
pub use persistence::Persistence;
