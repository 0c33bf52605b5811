// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conveyor Engine daemon.
//!
//! Runs the lifecycle scheduler for the configured tenants against the
//! configured backends. Intake and worker-response batches are driven by the
//! embedding application through [`conveyor_engine::runtime::EngineRuntime`];
//! this binary is the standalone sweep deployment.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use conveyor_core::store::{MemoryRequestStore, PostgresRequestStore, RequestStore};
use conveyor_engine::config::{BackendKind, Config};
use conveyor_engine::lock::{MemoryTenantLock, PostgresTenantLock, TenantLock};
use conveyor_engine::publisher::LoggingPublisher;
use conveyor_engine::runtime::EngineRuntime;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("conveyor_engine=info".parse().unwrap()),
        )
        .init();

    info!("Starting Conveyor Engine");

    let config = Config::from_env()?;
    info!(
        tenants = config.tenants.len(),
        store_backend = ?config.store_backend,
        lock_backend = ?config.lock_backend,
        poll_interval_secs = config.scheduler.poll_interval.as_secs(),
        "Configuration loaded"
    );

    // The pool is only needed when a Postgres backend is selected.
    let needs_pool = config.store_backend == BackendKind::Postgres
        || config.lock_backend == BackendKind::Postgres;
    let pool = if needs_pool {
        info!("Connecting to database...");
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;

        // Verify connection
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await?;
        info!(result = row.0, "Database health check passed");

        info!("Running database migrations...");
        conveyor_core::migrations::run_postgres(&pool).await?;
        conveyor_engine::migrations::run_postgres(&pool).await?;
        info!("Migrations completed");

        Some(pool)
    } else {
        None
    };

    let require_pool = || anyhow::anyhow!("a Postgres backend requires a database pool");
    let store: Arc<dyn RequestStore> = match config.store_backend {
        BackendKind::Postgres => {
            let pool = pool.clone().ok_or_else(require_pool)?;
            Arc::new(PostgresRequestStore::new(pool))
        }
        BackendKind::Memory => Arc::new(MemoryRequestStore::new()),
    };
    let lock: Arc<dyn TenantLock> = match config.lock_backend {
        BackendKind::Postgres => {
            let pool = pool.clone().ok_or_else(require_pool)?;
            Arc::new(PostgresTenantLock::new(pool))
        }
        BackendKind::Memory => Arc::new(MemoryTenantLock::new()),
    };

    let runtime = EngineRuntime::builder()
        .store(store)
        .lock(lock)
        .publisher(Arc::new(LoggingPublisher::new()))
        .intake_config(config.intake)
        .scheduler_config(config.scheduler)
        .tenants(config.tenants)
        .build()?
        .start();

    info!("Conveyor Engine initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    runtime.shutdown().await?;
    if let Some(pool) = pool {
        pool.close().await;
    }
    info!("Shutdown complete");

    Ok(())
}
