// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request store interfaces and backends.
//!
//! The store is the only mutable resource shared between the intake path,
//! the response path and the lifecycle scheduler. All mutations are targeted
//! bulk statements (by id set or predicate); there is no read-modify-write of
//! individual rows, which is what makes concurrent schedulers and response
//! handlers safe against lost updates.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryRequestStore;
pub use self::postgres::PostgresRequestStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreError;
use crate::request::{ErrorType, NewRequest, Request, RequestState};

/// Durable keyed storage for [`Request`] records.
///
/// Every operation is scoped to exactly one tenant. Bulk state updates never
/// touch rows already in a terminal state, so a stale or concurrent update
/// silently affects zero rows instead of regressing a finished request.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Look up a single request by correlation id.
    async fn get(&self, tenant: &str, correlation_id: &str)
        -> Result<Option<Request>, CoreError>;

    /// Bulk lookup by correlation ids, returning a map keyed by correlation
    /// id. Missing ids are simply absent from the map.
    async fn find_by_correlation_ids(
        &self,
        tenant: &str,
        correlation_ids: &[String],
    ) -> Result<HashMap<String, Request>, CoreError>;

    /// Persist a batch of new requests in one transaction, assigning ids and
    /// timestamps. A correlation id conflict aborts the whole batch with
    /// [`CoreError::DuplicateCorrelationId`]; the caller's dedup pass plus
    /// redelivery converges on exactly one stored row.
    async fn insert_batch(&self, requests: Vec<NewRequest>) -> Result<Vec<Request>, CoreError>;

    /// Non-terminal requests whose expiry date is at or before `cutoff`,
    /// ordered by priority then expiry, bounded by `page_size`.
    async fn find_due_for_expiry(
        &self,
        tenant: &str,
        cutoff: DateTime<Utc>,
        page_size: i64,
    ) -> Result<Vec<Request>, CoreError>;

    /// Granted requests with no linked job whose last update is at or before
    /// `older_than` - candidates for work re-emission, ordered by priority
    /// then last update, bounded by `page_size`.
    async fn find_redispatchable(
        &self,
        tenant: &str,
        older_than: DateTime<Utc>,
        page_size: i64,
    ) -> Result<Vec<Request>, CoreError>;

    /// Bulk lookup by correlation ids filtered to the given current states.
    /// Requests in other states (or unknown ids) are absent from the result.
    async fn find_by_request_ids(
        &self,
        tenant: &str,
        correlation_ids: &[String],
        eligible: &[RequestState],
    ) -> Result<Vec<Request>, CoreError>;

    /// Move the given requests to `state` in one statement, recording the
    /// error taxonomy for terminal failures. Rows already terminal are left
    /// untouched. Returns the number of rows actually updated.
    async fn bulk_update_state(
        &self,
        tenant: &str,
        ids: &[Uuid],
        state: RequestState,
        error: Option<(ErrorType, String)>,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError>;

    /// Record the job reference performing the work for a request. Returns
    /// false when the request already carries a linked job, and
    /// [`CoreError::RequestNotFound`] when no such request exists.
    async fn set_linked_job(
        &self,
        tenant: &str,
        id: Uuid,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// Delete terminal requests last updated at or before `cutoff`, bounded
    /// by `page_size` per call. Returns the number of rows deleted.
    async fn delete_terminal_older_than(
        &self,
        tenant: &str,
        cutoff: DateTime<Utc>,
        page_size: i64,
    ) -> Result<u64, CoreError>;
}
