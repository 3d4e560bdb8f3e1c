// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for ampere-core.

use thiserror::Error;

use crate::domain::{ChannelPointError, ShortChannelIdError};

/// Result type using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by persistence and domain validation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Short channel id could not be decoded.
    #[error(transparent)]
    ShortChannelId(#[from] ShortChannelIdError),

    /// Channel point could not be decoded.
    #[error(transparent)]
    ChannelPoint(#[from] ChannelPointError),

    /// A stored value could not be mapped back into the domain model.
    #[error("Corrupt row in '{table}': {message}")]
    CorruptRow {
        /// Table the row came from.
        table: &'static str,
        /// What was wrong.
        message: String,
    },

    /// Input validation failed.
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: &'static str,
        /// The validation error message.
        message: String,
    },

    /// JSON payload could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Wrap a database error with the name of the operation.
    pub fn database(operation: impl Into<String>, err: sqlx::Error) -> Self {
        CoreError::Database {
            operation: operation.into(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::database("query", err)
    }
}
