// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for conveyor-engine.
//!
//! This module provides [`EngineRuntime`] which allows embedding the engine
//! into an existing tokio application: the embedder injects its backends
//! (store, lock, job registry, publisher), drives intake and response batches
//! through the exposed processors, and lets the runtime own the scheduler
//! loop.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use conveyor_engine::runtime::EngineRuntime;
//! use conveyor_core::store::PostgresRequestStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!
//!     let runtime = EngineRuntime::builder()
//!         .store(Arc::new(PostgresRequestStore::new(pool.clone())))
//!         .lock(Arc::new(conveyor_engine::lock::PostgresTenantLock::new(pool)))
//!         .publisher(my_broker_publisher)
//!         .tenants(vec!["alpha".to_string()])
//!         .build()?
//!         .start();
//!
//!     runtime.intake().process_batch(batch).await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use conveyor_core::store::RequestStore;

use crate::config::{IntakeConfig, SchedulerConfig};
use crate::intake::{IntakeProcessor, OwnerDirectory, StaticOwnerDirectory};
use crate::jobs::{JobRegistry, MemoryJobRegistry};
use crate::lock::TenantLock;
use crate::publisher::OutboundPublisher;
use crate::response::ResponseProcessor;
use crate::scheduler::LifecycleScheduler;

/// Builder for creating an [`EngineRuntime`].
pub struct EngineRuntimeBuilder {
    store: Option<Arc<dyn RequestStore>>,
    lock: Option<Arc<dyn TenantLock>>,
    jobs: Option<Arc<dyn JobRegistry>>,
    publisher: Option<Arc<dyn OutboundPublisher>>,
    owners: Option<Arc<dyn OwnerDirectory>>,
    intake_config: IntakeConfig,
    scheduler_config: SchedulerConfig,
    tenants: Vec<String>,
}

impl std::fmt::Debug for EngineRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntimeBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("lock", &self.lock.as_ref().map(|_| "..."))
            .field("tenants", &self.tenants)
            .finish()
    }
}

impl Default for EngineRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            lock: None,
            jobs: None,
            publisher: None,
            owners: None,
            intake_config: IntakeConfig::default(),
            scheduler_config: SchedulerConfig::default(),
            tenants: Vec::new(),
        }
    }
}

impl EngineRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request store (required).
    pub fn store(mut self, store: Arc<dyn RequestStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the tenant lock backend (required).
    pub fn lock(mut self, lock: Arc<dyn TenantLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Set the job registry.
    ///
    /// Default: a process-local [`MemoryJobRegistry`].
    pub fn jobs(mut self, jobs: Arc<dyn JobRegistry>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Set the outbound publisher (required).
    pub fn publisher(mut self, publisher: Arc<dyn OutboundPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Set the owner directory.
    ///
    /// Default: accept every non-empty owner.
    pub fn owners(mut self, owners: Arc<dyn OwnerDirectory>) -> Self {
        self.owners = Some(owners);
        self
    }

    /// Set the intake configuration.
    pub fn intake_config(mut self, config: IntakeConfig) -> Self {
        self.intake_config = config;
        self
    }

    /// Set the scheduler configuration.
    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    /// Set the tenants this instance sweeps (required, at least one).
    pub fn tenants(mut self, tenants: Vec<String>) -> Self {
        self.tenants = tenants;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<EngineRuntimeConfig> {
        let store = self.store.ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let lock = self.lock.ok_or_else(|| anyhow::anyhow!("lock is required"))?;
        let publisher = self
            .publisher
            .ok_or_else(|| anyhow::anyhow!("publisher is required"))?;
        if self.tenants.is_empty() {
            return Err(anyhow::anyhow!("at least one tenant is required"));
        }
        let jobs = self
            .jobs
            .unwrap_or_else(|| Arc::new(MemoryJobRegistry::new()));
        let owners = self
            .owners
            .unwrap_or_else(|| Arc::new(StaticOwnerDirectory::allow_all()));

        Ok(EngineRuntimeConfig {
            store,
            lock,
            jobs,
            publisher,
            owners,
            intake_config: self.intake_config,
            scheduler_config: self.scheduler_config,
            tenants: self.tenants,
        })
    }
}

/// Configuration for an [`EngineRuntime`].
pub struct EngineRuntimeConfig {
    store: Arc<dyn RequestStore>,
    lock: Arc<dyn TenantLock>,
    jobs: Arc<dyn JobRegistry>,
    publisher: Arc<dyn OutboundPublisher>,
    owners: Arc<dyn OwnerDirectory>,
    intake_config: IntakeConfig,
    scheduler_config: SchedulerConfig,
    tenants: Vec<String>,
}

impl EngineRuntimeConfig {
    /// Start the runtime, spawning the scheduler loop.
    pub fn start(self) -> EngineRuntime {
        let intake = Arc::new(IntakeProcessor::new(
            self.store.clone(),
            self.publisher.clone(),
            self.owners,
            self.intake_config.clone(),
        ));
        let responses = Arc::new(ResponseProcessor::new(
            self.store.clone(),
            self.publisher.clone(),
            self.intake_config.notify_on_done,
        ));

        let scheduler = Arc::new(LifecycleScheduler::new(
            self.store,
            self.lock,
            self.jobs,
            self.publisher,
            self.intake_config,
            self.scheduler_config,
            self.tenants.clone(),
        ));
        let shutdown = scheduler.shutdown_handle();
        let scheduler_handle = tokio::spawn(scheduler.run());

        info!(tenants = self.tenants.len(), "EngineRuntime started");

        EngineRuntime {
            intake,
            responses,
            scheduler_handle,
            shutdown,
        }
    }
}

/// A running engine instance embedded in an application.
///
/// The runtime owns the scheduler loop; intake and worker-response batches
/// are driven by the embedder through [`intake`](Self::intake) and
/// [`responses`](Self::responses).
pub struct EngineRuntime {
    intake: Arc<IntakeProcessor>,
    responses: Arc<ResponseProcessor>,
    scheduler_handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl EngineRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// The intake processor, for driving inbound submission batches.
    pub fn intake(&self) -> &Arc<IntakeProcessor> {
        &self.intake
    }

    /// The response processor, for driving worker response batches.
    pub fn responses(&self) -> &Arc<ResponseProcessor> {
        &self.responses
    }

    /// Check if the scheduler loop is still running.
    pub fn is_running(&self) -> bool {
        !self.scheduler_handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals the scheduler loop to stop and waits for it to finish its
    /// current cycle.
    pub async fn shutdown(self) -> Result<()> {
        info!("EngineRuntime shutting down...");
        // notify_one stores a permit, so the signal is not lost when the
        // scheduler is mid-cycle rather than parked on notified().
        self.shutdown.notify_one();

        match self.scheduler_handle.await {
            Ok(()) => {
                info!("EngineRuntime shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Scheduler task panicked during shutdown: {}", e);
                Err(anyhow::anyhow!("scheduler task panicked: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MemoryTenantLock;
    use crate::publisher::RecordingPublisher;
    use conveyor_core::store::MemoryRequestStore;

    fn memory_builder() -> EngineRuntimeBuilder {
        EngineRuntime::builder()
            .store(Arc::new(MemoryRequestStore::new()))
            .lock(Arc::new(MemoryTenantLock::new()))
            .publisher(Arc::new(RecordingPublisher::new()))
            .tenants(vec!["alpha".to_string()])
    }

    #[test]
    fn test_builder_default_is_empty() {
        let builder = EngineRuntimeBuilder::default();
        assert!(builder.store.is_none());
        assert!(builder.lock.is_none());
        assert!(builder.publisher.is_none());
        assert!(builder.tenants.is_empty());
    }

    #[test]
    fn test_builder_missing_store_fails() {
        let result = EngineRuntime::builder()
            .lock(Arc::new(MemoryTenantLock::new()))
            .publisher(Arc::new(RecordingPublisher::new()))
            .tenants(vec!["alpha".to_string()])
            .build();
        let err = result.err().expect("build must fail");
        assert!(err.to_string().contains("store is required"));
    }

    #[test]
    fn test_builder_missing_tenants_fails() {
        let result = EngineRuntime::builder()
            .store(Arc::new(MemoryRequestStore::new()))
            .lock(Arc::new(MemoryTenantLock::new()))
            .publisher(Arc::new(RecordingPublisher::new()))
            .build();
        let err = result.err().expect("build must fail");
        assert!(err.to_string().contains("tenant"));
    }

    #[test]
    fn test_builder_with_memory_backends_succeeds() {
        assert!(memory_builder().build().is_ok());
    }

    #[test]
    fn test_builder_debug_masks_backends() {
        let debug_str = format!("{:?}", memory_builder());
        assert!(debug_str.contains("EngineRuntimeBuilder"));
        assert!(debug_str.contains("..."));
    }

    #[tokio::test]
    async fn test_runtime_start_and_shutdown() {
        let runtime = memory_builder().build().unwrap().start();
        assert!(runtime.is_running());
        let _intake = runtime.intake();
        let _responses = runtime.responses();
        runtime.shutdown().await.unwrap();
    }
}
