// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for conveyor-engine.

use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Request store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] conveyor_core::error::CoreError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outbound event emission failed.
    #[error("Publish error: {0}")]
    Publish(String),

    /// Job registry call failed.
    #[error("Job registry error: {0}")]
    JobRegistry(String),

    /// Owner directory call failed.
    #[error("Owner directory error: {0}")]
    OwnerDirectory(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the engine Error.
pub type Result<T> = std::result::Result<T, Error>;
