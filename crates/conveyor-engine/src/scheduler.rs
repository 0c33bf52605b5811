// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle scheduler.
//!
//! Per-tenant periodic sweep that expires overdue requests, re-emits lost
//! derived work, and optionally purges old terminal rows. Each tenant's sweep
//! runs under a cluster lock with a bounded lease: if another instance holds
//! the lock the tenant is simply skipped this cycle. Every page is its own
//! transaction, so an aborted cycle leaves nothing half-done - a re-run only
//! re-matches rows still past the cutoff and still non-terminal.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use conveyor_core::events::StopJobSignal;
use conveyor_core::request::{ErrorType, RequestState};
use conveyor_core::store::RequestStore;

use crate::config::{IntakeConfig, SchedulerConfig};
use crate::error::Result;
use crate::intake::build_work_event;
use crate::jobs::{JobRegistry, JobStatus};
use crate::lock::TenantLock;
use crate::publisher::OutboundPublisher;

/// Task name the tenant lock is keyed under.
pub const LIFECYCLE_TASK: &str = "lifecycle-sweep";

const EXPIRED_CAUSE: &str = "Request expired before completion";

/// What one tenant sweep did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Lock was held elsewhere; nothing ran.
    pub skipped: bool,
    /// Requests moved to `ERROR(EXPIRED)`.
    pub expired: u64,
    /// Stop signals emitted for linked running jobs.
    pub stop_signals: usize,
    /// Granted requests whose derived work was re-emitted.
    pub redispatched: usize,
    /// Terminal requests purged by the retention pass.
    pub purged: u64,
}

impl SweepOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Periodic per-tenant sweep task.
///
/// Holds only its collaborators; construct one per process and inject the
/// backends picked at startup.
pub struct LifecycleScheduler {
    store: Arc<dyn RequestStore>,
    lock: Arc<dyn TenantLock>,
    jobs: Arc<dyn JobRegistry>,
    publisher: Arc<dyn OutboundPublisher>,
    intake_config: IntakeConfig,
    config: SchedulerConfig,
    tenants: Vec<String>,
    shutdown: Arc<Notify>,
}

impl LifecycleScheduler {
    /// Create a scheduler sweeping the given tenants.
    pub fn new(
        store: Arc<dyn RequestStore>,
        lock: Arc<dyn TenantLock>,
        jobs: Arc<dyn JobRegistry>,
        publisher: Arc<dyn OutboundPublisher>,
        intake_config: IntakeConfig,
        config: SchedulerConfig,
        tenants: Vec<String>,
    ) -> Self {
        Self {
            store,
            lock,
            jobs,
            publisher,
            intake_config,
            config,
            tenants,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop until shutdown is signalled.
    pub async fn run(self: Arc<Self>) {
        info!(
            tenants = self.tenants.len(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            page_size = self.config.page_size,
            "Lifecycle scheduler started"
        );

        tokio::select! {
            _ = self.shutdown.notified() => {
                info!("Lifecycle scheduler shutting down");
                return;
            }
            _ = tokio::time::sleep(self.config.initial_delay) => {}
        }

        loop {
            self.run_cycle().await;

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Lifecycle scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Sweep every tenant once; tenants run in parallel, failures are
    /// per-tenant and never abort the cycle for the others.
    async fn run_cycle(self: &Arc<Self>) {
        let mut sweeps = JoinSet::new();
        for tenant in self.tenants.clone() {
            let this = self.clone();
            sweeps.spawn(async move {
                let outcome = this.sweep_tenant(&tenant).await;
                (tenant, outcome)
            });
        }

        while let Some(joined) = sweeps.join_next().await {
            match joined {
                Ok((tenant, Ok(outcome))) => {
                    if !outcome.skipped {
                        debug!(
                            tenant = %tenant,
                            expired = outcome.expired,
                            stop_signals = outcome.stop_signals,
                            redispatched = outcome.redispatched,
                            purged = outcome.purged,
                            "Tenant sweep finished"
                        );
                    }
                }
                Ok((tenant, Err(e))) => {
                    error!(tenant = %tenant, error = %e, "Tenant sweep failed");
                }
                Err(e) => {
                    error!(error = %e, "Tenant sweep task panicked");
                }
            }
        }
    }

    /// Run one sweep for one tenant under the cluster lock. Skips without
    /// waiting when the lock is held elsewhere.
    pub async fn sweep_tenant(&self, tenant: &str) -> Result<SweepOutcome> {
        if !self
            .lock
            .try_acquire(tenant, LIFECYCLE_TASK, self.config.lock_lease)
            .await?
        {
            debug!(tenant = %tenant, "Tenant lock held elsewhere, skipping cycle");
            return Ok(SweepOutcome::skipped());
        }

        let outcome = self.sweep_locked(tenant).await;

        // The lease expires on its own if this release is never reached.
        if let Err(e) = self.lock.release(tenant, LIFECYCLE_TASK).await {
            warn!(tenant = %tenant, error = %e, "Failed to release tenant lock");
        }
        outcome
    }

    async fn sweep_locked(&self, tenant: &str) -> Result<SweepOutcome> {
        let mut outcome = SweepOutcome::default();
        self.expire_pass(tenant, &mut outcome).await?;
        self.redispatch_pass(tenant, &mut outcome).await?;
        if self.config.retention.is_some() {
            self.purge_pass(tenant, &mut outcome).await?;
        }
        Ok(outcome)
    }

    /// Move overdue non-terminal requests to `ERROR(EXPIRED)`, page by page,
    /// and signal stop for their linked jobs still running.
    async fn expire_pass(&self, tenant: &str, outcome: &mut SweepOutcome) -> Result<()> {
        let cutoff = Utc::now();
        loop {
            let page = self
                .store
                .find_due_for_expiry(tenant, cutoff, self.config.page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();

            let ids: Vec<Uuid> = page.iter().map(|r| r.id).collect();
            let updated = self
                .store
                .bulk_update_state(
                    tenant,
                    &ids,
                    RequestState::Error,
                    Some((ErrorType::Expired, EXPIRED_CAUSE.to_string())),
                    Utc::now(),
                )
                .await?;
            outcome.expired += updated;

            // Stop signals only for jobs the registry still reports running;
            // terminal jobs get no redundant signal.
            let mut signals = Vec::new();
            for request in &page {
                let Some(job_id) = request.linked_job_id else {
                    continue;
                };
                match self.jobs.status(job_id).await {
                    Ok(Some(JobStatus::Running)) => signals.push(StopJobSignal { job_id }),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            tenant = %tenant,
                            job_id = %job_id,
                            error = %e,
                            "Could not query linked job status"
                        );
                    }
                }
            }
            if !signals.is_empty() {
                let count = signals.len();
                // Advisory and fire-and-forget; the requests are already in
                // ERROR whether or not the jobs acknowledge.
                match self.publisher.publish_stop_signals(tenant, signals).await {
                    Ok(()) => outcome.stop_signals += count,
                    Err(e) => {
                        warn!(tenant = %tenant, error = %e, "Failed to emit stop-job signals");
                    }
                }
            }

            if page_len < self.config.page_size as usize {
                break;
            }
        }
        Ok(())
    }

    /// Re-emit derived work for granted requests whose work event was lost
    /// (no linked job after the redispatch window).
    async fn redispatch_pass(&self, tenant: &str, outcome: &mut SweepOutcome) -> Result<()> {
        let threshold = Utc::now()
            - chrono::Duration::from_std(self.config.redispatch_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));
        loop {
            let page = self
                .store
                .find_redispatchable(tenant, threshold, self.config.page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();

            let mut work_events = Vec::with_capacity(page.len());
            for request in &page {
                match build_work_event(request, &self.intake_config) {
                    Some(event) => work_events.push(event),
                    None => {
                        warn!(
                            tenant = %tenant,
                            correlation_id = %request.correlation_id,
                            target = %request.target,
                            "Cannot redispatch request: target no longer configured"
                        );
                    }
                }
            }
            let emitted = work_events.len();
            if emitted > 0 {
                self.publisher
                    .publish_work_requests(tenant, work_events)
                    .await?;
            }

            // Refresh the whole page so the same rows are not re-picked until
            // the next redispatch window; rows stay GRANTED.
            let ids: Vec<Uuid> = page.iter().map(|r| r.id).collect();
            self.store
                .bulk_update_state(tenant, &ids, RequestState::Granted, None, Utc::now())
                .await?;
            outcome.redispatched += emitted;

            if page_len < self.config.page_size as usize {
                break;
            }
        }
        Ok(())
    }

    /// Purge terminal requests older than the retention window.
    async fn purge_pass(&self, tenant: &str, outcome: &mut SweepOutcome) -> Result<()> {
        let Some(retention) = self.config.retention else {
            return Ok(());
        };
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(30));
        loop {
            let deleted = self
                .store
                .delete_terminal_older_than(tenant, cutoff, self.config.page_size)
                .await?;
            outcome.purged += deleted;
            if deleted < self.config.page_size as u64 {
                break;
            }
        }
        Ok(())
    }
}

/// Convenience for embedding: spawn the scheduler loop on the current tokio
/// runtime and return its shutdown handle.
pub fn spawn(scheduler: LifecycleScheduler) -> (Arc<Notify>, tokio::task::JoinHandle<()>) {
    let shutdown = scheduler.shutdown_handle();
    let scheduler = Arc::new(scheduler);
    let handle = tokio::spawn(scheduler.run());
    (shutdown, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sweep_outcome_skipped() {
        let outcome = SweepOutcome::skipped();
        assert!(outcome.skipped);
        assert_eq!(outcome.expired, 0);
        assert_eq!(outcome.stop_signals, 0);
    }

    #[test]
    fn test_scheduler_config_defaults_for_sweep() {
        let config = SchedulerConfig::default();
        assert!(config.poll_interval >= Duration::from_secs(1));
        assert!(config.page_size > 0);
        assert!(config.retention.is_none());
    }
}
