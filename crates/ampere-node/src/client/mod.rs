// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Daemon client module - the seam between the node runtime and LND/CLN.
//!
//! Concrete gRPC transports implement [`NodeClient`] and [`Connector`] outside
//! this crate. [`MockConnector`] backs the tests.

pub mod mock;
mod traits;

pub use mock::{MockConnector, MockNodeClient};
pub use traits::*;
