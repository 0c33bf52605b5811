// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job registry interface.
//!
//! The registry runs the long-lived asynchronous work items that requests
//! link to. It is an external service; the engine only ever asks it two
//! things: what state a job is in, and (advisorily) to stop one. A stop is
//! fire-and-forget - the request's own state is already terminal whether or
//! not the job acknowledges.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// Execution state of a registry job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Accepted, not yet running.
    Queued,
    /// Currently executing. The only state a stop signal is issued for.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Stopped before completion.
    Cancelled,
}

impl JobStatus {
    /// True once the job can no longer be stopped.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// External service running long-lived asynchronous jobs.
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Current status of a job, or `None` for an unknown job id.
    async fn status(&self, job_id: Uuid) -> Result<Option<JobStatus>>;

    /// Ask the registry to stop a job. Advisory; does not wait for the job
    /// to actually terminate.
    async fn stop(&self, job_id: Uuid) -> Result<()>;
}

/// Process-local registry for embedded deployments and tests.
#[derive(Default)]
pub struct MemoryJobRegistry {
    jobs: Mutex<HashMap<Uuid, JobStatus>>,
    stopped: Mutex<Vec<Uuid>>,
}

impl MemoryJobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a job in the given status.
    pub fn register(&self, job_id: Uuid, status: JobStatus) {
        self.jobs.lock().unwrap().insert(job_id, status);
    }

    /// Job ids stop was requested for, in order.
    pub fn stop_requests(&self) -> Vec<Uuid> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobRegistry for MemoryJobRegistry {
    async fn status(&self, job_id: Uuid) -> Result<Option<JobStatus>> {
        Ok(self.jobs.lock().unwrap().get(&job_id).copied())
    }

    async fn stop(&self, job_id: Uuid) -> Result<()> {
        self.stopped.lock().unwrap().push(job_id);
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(status) = jobs.get_mut(&job_id) {
            if !status.is_terminal() {
                *status = JobStatus::Cancelled;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_cancels_running_job() {
        let registry = MemoryJobRegistry::new();
        let job = Uuid::new_v4();
        registry.register(job, JobStatus::Running);

        registry.stop(job).await.unwrap();
        assert_eq!(registry.status(job).await.unwrap(), Some(JobStatus::Cancelled));
        assert_eq!(registry.stop_requests(), vec![job]);
    }

    #[tokio::test]
    async fn test_stop_leaves_terminal_job_untouched() {
        let registry = MemoryJobRegistry::new();
        let job = Uuid::new_v4();
        registry.register(job, JobStatus::Succeeded);

        registry.stop(job).await.unwrap();
        assert_eq!(registry.status(job).await.unwrap(), Some(JobStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_unknown_job_has_no_status() {
        let registry = MemoryJobRegistry::new();
        assert_eq!(registry.status(Uuid::new_v4()).await.unwrap(), None);
    }
}
