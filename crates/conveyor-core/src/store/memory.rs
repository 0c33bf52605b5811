// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory request store.
//!
//! Backend for embedded single-process deployments and tests. Implements the
//! same terminal-state guard semantics as the Postgres adapter; queries scan
//! the full map, which is fine for the volumes this backend is meant for.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreError;
use crate::request::{truncate_cause, ErrorType, NewRequest, Request, RequestState};
use crate::store::RequestStore;

/// Request store backed by a process-local map.
#[derive(Default)]
pub struct MemoryRequestStore {
    requests: Mutex<HashMap<Uuid, Request>>,
}

impl MemoryRequestStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored requests for a tenant, unordered.
    pub fn all_for_tenant(&self, tenant: &str) -> Vec<Request> {
        let requests = self.requests.lock().unwrap();
        requests
            .values()
            .filter(|r| r.tenant == tenant)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn get(
        &self,
        tenant: &str,
        correlation_id: &str,
    ) -> Result<Option<Request>, CoreError> {
        let requests = self.requests.lock().unwrap();
        Ok(requests
            .values()
            .find(|r| r.tenant == tenant && r.correlation_id == correlation_id)
            .cloned())
    }

    async fn find_by_correlation_ids(
        &self,
        tenant: &str,
        correlation_ids: &[String],
    ) -> Result<HashMap<String, Request>, CoreError> {
        let requests = self.requests.lock().unwrap();
        Ok(requests
            .values()
            .filter(|r| r.tenant == tenant && correlation_ids.contains(&r.correlation_id))
            .map(|r| (r.correlation_id.clone(), r.clone()))
            .collect())
    }

    async fn insert_batch(&self, new: Vec<NewRequest>) -> Result<Vec<Request>, CoreError> {
        let mut requests = self.requests.lock().unwrap();
        let now = Utc::now();

        for candidate in &new {
            let exists = requests.values().any(|r| {
                r.tenant == candidate.tenant && r.correlation_id == candidate.correlation_id
            });
            if exists {
                return Err(CoreError::DuplicateCorrelationId {
                    tenant: candidate.tenant.clone(),
                    correlation_id: candidate.correlation_id.clone(),
                });
            }
        }

        let mut inserted = Vec::with_capacity(new.len());
        for candidate in new {
            let request = Request {
                id: Uuid::new_v4(),
                correlation_id: candidate.correlation_id,
                tenant: candidate.tenant,
                owner: candidate.owner,
                session: candidate.session,
                target: candidate.target,
                payload: candidate.payload,
                state: candidate.state,
                priority: candidate.priority,
                linked_job_id: None,
                error_type: None,
                error_cause: None,
                created_at: now,
                updated_at: now,
                expiry_date: candidate.expiry_date,
            };
            requests.insert(request.id, request.clone());
            inserted.push(request);
        }
        Ok(inserted)
    }

    async fn find_due_for_expiry(
        &self,
        tenant: &str,
        cutoff: DateTime<Utc>,
        page_size: i64,
    ) -> Result<Vec<Request>, CoreError> {
        let requests = self.requests.lock().unwrap();
        let mut due: Vec<Request> = requests
            .values()
            .filter(|r| r.tenant == tenant && !r.is_terminal() && r.expiry_date <= cutoff)
            .cloned()
            .collect();
        due.sort_by_key(|r| (r.priority, r.expiry_date));
        due.truncate(page_size.max(0) as usize);
        Ok(due)
    }

    async fn find_redispatchable(
        &self,
        tenant: &str,
        older_than: DateTime<Utc>,
        page_size: i64,
    ) -> Result<Vec<Request>, CoreError> {
        let requests = self.requests.lock().unwrap();
        let mut stalled: Vec<Request> = requests
            .values()
            .filter(|r| {
                r.tenant == tenant
                    && r.state == RequestState::Granted
                    && r.linked_job_id.is_none()
                    && r.updated_at <= older_than
            })
            .cloned()
            .collect();
        stalled.sort_by_key(|r| (r.priority, r.updated_at));
        stalled.truncate(page_size.max(0) as usize);
        Ok(stalled)
    }

    async fn find_by_request_ids(
        &self,
        tenant: &str,
        correlation_ids: &[String],
        eligible: &[RequestState],
    ) -> Result<Vec<Request>, CoreError> {
        let requests = self.requests.lock().unwrap();
        Ok(requests
            .values()
            .filter(|r| {
                r.tenant == tenant
                    && correlation_ids.contains(&r.correlation_id)
                    && eligible.contains(&r.state)
            })
            .cloned()
            .collect())
    }

    async fn bulk_update_state(
        &self,
        tenant: &str,
        ids: &[Uuid],
        state: RequestState,
        error: Option<(ErrorType, String)>,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let mut requests = self.requests.lock().unwrap();
        let mut updated = 0;
        for id in ids {
            let Some(request) = requests.get_mut(id) else {
                continue;
            };
            // Terminal rows are never touched, whatever the caller asks for.
            if request.tenant != tenant || request.is_terminal() {
                continue;
            }
            request.state = state;
            if let Some((error_type, cause)) = &error {
                request.error_type = Some(*error_type);
                request.error_cause = Some(truncate_cause(cause));
            }
            request.updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }

    async fn set_linked_job(
        &self,
        tenant: &str,
        id: Uuid,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let mut requests = self.requests.lock().unwrap();
        let Some(request) = requests.get_mut(&id).filter(|r| r.tenant == tenant) else {
            return Err(CoreError::RequestNotFound {
                correlation_id: id.to_string(),
            });
        };
        if request.linked_job_id.is_some() {
            return Ok(false);
        }
        request.linked_job_id = Some(job_id);
        request.updated_at = now;
        Ok(true)
    }

    async fn delete_terminal_older_than(
        &self,
        tenant: &str,
        cutoff: DateTime<Utc>,
        page_size: i64,
    ) -> Result<u64, CoreError> {
        let mut requests = self.requests.lock().unwrap();
        let doomed: Vec<Uuid> = requests
            .values()
            .filter(|r| r.tenant == tenant && r.is_terminal() && r.updated_at <= cutoff)
            .map(|r| r.id)
            .take(page_size.max(0) as usize)
            .collect();
        for id in &doomed {
            requests.remove(id);
        }
        Ok(doomed.len() as u64)
    }
}
