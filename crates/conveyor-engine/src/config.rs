// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.
//!
//! All tunables live in explicit structs handed to the processors and the
//! scheduler at construction; nothing reads the environment after startup.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Per-target settings: which model the payload maps onto and which storage
/// backend the derived work writes to.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    /// Model identifier handed to workers.
    pub model: String,
    /// Storage backend identifier handed to workers.
    pub storage: String,
}

/// Intake processor settings.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Time-to-live applied when an intake event carries no hint.
    pub default_ttl: Duration,
    /// Upper bound on correlation id length; longer ids are denied.
    pub max_correlation_id_len: usize,
    /// Upper bound on the serialized payload size; larger payloads are denied.
    pub max_payload_bytes: usize,
    /// Known targets; submissions naming any other target are denied.
    pub targets: HashMap<String, TargetConfig>,
    /// Also notify owners when a request completes successfully.
    pub notify_on_done: bool,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(24 * 60 * 60),
            max_correlation_id_len: 255,
            max_payload_bytes: 1024 * 1024,
            targets: HashMap::new(),
            notify_on_done: false,
        }
    }
}

/// Lifecycle scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay before the first sweep cycle.
    pub initial_delay: Duration,
    /// Time between sweep cycles.
    pub poll_interval: Duration,
    /// Maximum rows per page; each page is its own transaction.
    pub page_size: i64,
    /// Lease put on the tenant lock; bounds staleness after a crash.
    pub lock_lease: Duration,
    /// Age after which a granted request with no linked job gets its derived
    /// work re-emitted.
    pub redispatch_after: Duration,
    /// When set, terminal requests older than this are purged by the sweep.
    pub retention: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
            page_size: 500,
            lock_lease: Duration::from_secs(60),
            redispatch_after: Duration::from_secs(600),
            retention: None,
        }
    }
}

/// Storage/locking backend selection. A small closed set picked at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Shared PostgreSQL; required for multi-instance deployments.
    Postgres,
    /// Process-local; only safe for single-instance embedded use.
    Memory,
}

impl BackendKind {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "postgres" => Some(BackendKind::Postgres),
            "memory" => Some(BackendKind::Memory),
            _ => None,
        }
    }
}

/// Conveyor engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Tenants this instance sweeps.
    pub tenants: Vec<String>,
    /// Store backend selection.
    pub store_backend: BackendKind,
    /// Tenant lock backend selection.
    pub lock_backend: BackendKind,
    /// Intake settings.
    pub intake: IntakeConfig,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
}

fn env_secs(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid(name, "must be a number of seconds")),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `CONVEYOR_DATABASE_URL`: PostgreSQL connection string
    /// - `CONVEYOR_TENANTS`: comma-separated tenant list
    ///
    /// Optional (with defaults):
    /// - `CONVEYOR_STORE_BACKEND` / `CONVEYOR_LOCK_BACKEND`: `postgres` (default) or `memory`
    /// - `CONVEYOR_TTL_SECS`: default request TTL (default: 86400)
    /// - `CONVEYOR_INITIAL_DELAY_SECS`: delay before the first sweep (default: 10)
    /// - `CONVEYOR_POLL_INTERVAL_SECS`: sweep period (default: 30)
    /// - `CONVEYOR_PAGE_SIZE`: sweep page size (default: 500)
    /// - `CONVEYOR_LOCK_LEASE_SECS`: tenant lock lease (default: 60)
    /// - `CONVEYOR_REDISPATCH_AFTER_SECS`: work re-emission age (default: 600)
    /// - `CONVEYOR_RETENTION_DAYS`: purge terminal requests older than this (default: off)
    /// - `CONVEYOR_TARGETS`: JSON map of target settings, e.g.
    ///   `{"DATA":{"model":"data_model","storage":"ATL"}}`
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("CONVEYOR_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("CONVEYOR_DATABASE_URL"))?;

        let tenants: Vec<String> = std::env::var("CONVEYOR_TENANTS")
            .map_err(|_| ConfigError::Missing("CONVEYOR_TENANTS"))?
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tenants.is_empty() {
            return Err(ConfigError::Invalid(
                "CONVEYOR_TENANTS",
                "must name at least one tenant",
            ));
        }

        let store_backend = match std::env::var("CONVEYOR_STORE_BACKEND") {
            Ok(value) => BackendKind::parse(&value).ok_or(ConfigError::Invalid(
                "CONVEYOR_STORE_BACKEND",
                "must be 'postgres' or 'memory'",
            ))?,
            Err(_) => BackendKind::Postgres,
        };
        let lock_backend = match std::env::var("CONVEYOR_LOCK_BACKEND") {
            Ok(value) => BackendKind::parse(&value).ok_or(ConfigError::Invalid(
                "CONVEYOR_LOCK_BACKEND",
                "must be 'postgres' or 'memory'",
            ))?,
            Err(_) => BackendKind::Postgres,
        };

        let page_size: i64 = std::env::var("CONVEYOR_PAGE_SIZE")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("CONVEYOR_PAGE_SIZE", "must be a positive integer"))?;
        if page_size <= 0 {
            return Err(ConfigError::Invalid(
                "CONVEYOR_PAGE_SIZE",
                "must be a positive integer",
            ));
        }

        let retention = match std::env::var("CONVEYOR_RETENTION_DAYS") {
            Ok(value) => {
                let days: u64 = value.parse().map_err(|_| {
                    ConfigError::Invalid("CONVEYOR_RETENTION_DAYS", "must be a number of days")
                })?;
                Some(Duration::from_secs(days * 24 * 60 * 60))
            }
            Err(_) => None,
        };

        let targets: HashMap<String, TargetConfig> = match std::env::var("CONVEYOR_TARGETS") {
            Ok(value) => serde_json::from_str(&value).map_err(|_| {
                ConfigError::Invalid("CONVEYOR_TARGETS", "must be a JSON map of target settings")
            })?,
            Err(_) => HashMap::new(),
        };

        let intake = IntakeConfig {
            default_ttl: env_secs("CONVEYOR_TTL_SECS", 24 * 60 * 60)?,
            targets,
            ..IntakeConfig::default()
        };

        let scheduler = SchedulerConfig {
            initial_delay: env_secs("CONVEYOR_INITIAL_DELAY_SECS", 10)?,
            poll_interval: env_secs("CONVEYOR_POLL_INTERVAL_SECS", 30)?,
            page_size,
            lock_lease: env_secs("CONVEYOR_LOCK_LEASE_SECS", 60)?,
            redispatch_after: env_secs("CONVEYOR_REDISPATCH_AFTER_SECS", 600)?,
            retention,
        };

        Ok(Self {
            database_url,
            tenants,
            store_backend,
            lock_backend,
            intake,
            scheduler,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
